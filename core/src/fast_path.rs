//! # Fast Path
//!
//! Unchecked HF clock requests for one latency-critical caller class (the
//! radio stack). There is no spec negotiation, no notification and no
//! validation:
//!
//! - the first [`FastPath::fast_request`] starts the oscillator and returns
//!   without waiting for it to be ready; the caller budgets for startup;
//! - the last [`FastPath::fast_release`] stops it, unless the reservation
//!   engine still holds it through the shared gate.
//!
//! # Contract
//!
//! Every `fast_request` MUST be paired with exactly one `fast_release`.
//! Unbalanced calls leave the oscillator in an undefined power state. This
//! is not checked.
//!
//! The counter is a bare atomic and no lock is taken on this path. The
//! caller class is expected to serialize its own first request against its
//! own last release.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use clockwork_hal::GatedDevice;

/// Unchecked request/release counter on the HF oscillator
pub struct FastPath {
    count: AtomicU32,
    gate: Arc<GatedDevice>,
}

impl FastPath {
    /// Fast path driving `gate`
    pub fn new(gate: Arc<GatedDevice>) -> Self {
        Self {
            count: AtomicU32::new(0),
            gate,
        }
    }

    /// Take one reference; starts the oscillator on the first one
    pub fn fast_request(&self) {
        if self.count.fetch_add(1, Ordering::AcqRel) == 0 {
            self.gate.acquire_fast();
        }
    }

    /// Drop one reference; stops the oscillator with the last one
    pub fn fast_release(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.gate.release_fast();
        }
    }

    /// Outstanding references
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

impl fmt::Debug for FastPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastPath")
            .field("count", &self.count())
            .field("gate", &self.gate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clockwork_hal::sim::SimClock;
    use clockwork_hal::ClockDevice;

    fn fast_path(sim: &Arc<SimClock>) -> FastPath {
        FastPath::new(Arc::new(GatedDevice::new(sim.clone())))
    }

    #[test]
    fn test_nested_pairs_start_once() {
        let sim = Arc::new(SimClock::hf());
        let fast = fast_path(&sim);

        fast.fast_request();
        fast.fast_request();
        fast.fast_release();
        fast.fast_request();
        fast.fast_release();
        assert_eq!(sim.starts(), 1);
        assert!(sim.is_running());

        fast.fast_release();
        assert_eq!(fast.count(), 0);
        assert_eq!(sim.stops(), 1);
        assert!(!sim.is_running());
    }

    #[test]
    fn test_one_start_per_busy_interval() {
        let sim = Arc::new(SimClock::hf());
        let fast = fast_path(&sim);

        for interval in 1..=4u32 {
            for _ in 0..interval {
                fast.fast_request();
            }
            for _ in 0..interval {
                fast.fast_release();
            }
            assert_eq!(sim.starts(), interval);
            assert_eq!(sim.stops(), interval);
        }
        assert!(!sim.is_running());
    }

    #[test]
    fn test_matched_pairs_across_threads() {
        let sim = Arc::new(SimClock::hf());
        let fast = Arc::new(fast_path(&sim));
        fast.fast_request();

        let workers: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let fast = fast.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        fast.fast_request();
                        fast.fast_release();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(fast.count(), 1);
        assert_eq!(sim.starts(), 1);

        fast.fast_release();
        assert_eq!(sim.stops(), 1);
        assert!(!sim.is_running());
    }
}
