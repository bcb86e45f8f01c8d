//! # Execution Context
//!
//! What the engine needs from the scheduler: whether the caller may block,
//! a millisecond uptime, a way to give up the CPU while waiting, and
//! interrupt masking for the state guards.

/// Saved interrupt state returned by [`ExecContext::irq_save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqState(pub usize);

/// Scheduler and interrupt controller services
pub trait ExecContext: Send + Sync {
    /// Whether the caller runs in interrupt (non-blocking) context
    fn in_isr(&self) -> bool;

    /// Milliseconds since boot
    fn uptime_ms(&self) -> u64;

    /// Give up the CPU while waiting for a condition
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// Mask interrupts and return the previous state
    fn irq_save(&self) -> IrqState {
        IrqState::default()
    }

    /// Restore a state returned by [`ExecContext::irq_save`]
    fn irq_restore(&self, _state: IrqState) {}
}

/// How long a synchronous wait may last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Do not wait at all
    NoWait,
    /// Wait at most this many milliseconds
    Millis(u64),
    /// Wait until the condition holds
    Forever,
}

impl Timeout {
    /// Absolute deadline for a wait starting at `now_ms`, `None` for forever
    pub fn deadline(self, now_ms: u64) -> Option<u64> {
        match self {
            Timeout::NoWait => Some(now_ms),
            Timeout::Millis(ms) => Some(now_ms.saturating_add(ms)),
            Timeout::Forever => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines() {
        assert_eq!(Timeout::NoWait.deadline(10), Some(10));
        assert_eq!(Timeout::Millis(5).deadline(10), Some(15));
        assert_eq!(Timeout::Millis(u64::MAX).deadline(10), Some(u64::MAX));
        assert_eq!(Timeout::Forever.deadline(10), None);
    }
}
