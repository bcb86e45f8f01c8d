//! # User Gate
//!
//! One physical oscillator shared by two user classes: the managed
//! reservation engine and the unchecked fast path. Each class owns one bit;
//! the oscillator is started when the first bit is set and stopped only when
//! the last bit clears.
//!
//! ```text
//!   managed start ──┐                      ┌── fast acquire
//!                   ▼                      ▼
//!              ┌─────────────────────────────────┐
//!              │ users: MANAGED | FAST (atomic)  │
//!              └───────────────┬─────────────────┘
//!                              │ 0 -> non-zero: start
//!                              │ non-zero -> 0: stop
//!                              ▼
//!                        inner ClockDevice
//! ```

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

use crate::device::{ClockDevice, ClockOption, DeviceCaps, HwError, Started, Ticket};

bitflags! {
    /// User classes holding a gated oscillator
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GateUsers: u8 {
        /// The reservation engine
        const MANAGED = 1 << 0;
        /// The unchecked fast path
        const FAST    = 1 << 1;
    }
}

/// Oscillator shared between the managed path and the fast path
///
/// The managed side sees a regular [`ClockDevice`]; the fast side uses
/// [`GatedDevice::acquire_fast`] and [`GatedDevice::release_fast`].
pub struct GatedDevice {
    inner: Arc<dyn ClockDevice>,
    users: AtomicU8,
}

impl GatedDevice {
    /// Wrap a device
    pub fn new(inner: Arc<dyn ClockDevice>) -> Self {
        Self {
            inner,
            users: AtomicU8::new(0),
        }
    }

    /// Current holders
    pub fn users(&self) -> GateUsers {
        GateUsers::from_bits_truncate(self.users.load(Ordering::Acquire))
    }

    /// Claim the oscillator for the fast path without waiting for it
    pub fn acquire_fast(&self) {
        let prev = GateUsers::from_bits_truncate(
            self.users.fetch_or(GateUsers::FAST.bits(), Ordering::AcqRel),
        );
        if prev.is_empty() {
            let Some(option) = self.inner.options().first().copied() else {
                log::error!("Gate: device publishes no options");
                return;
            };
            if let Err(err) = self.inner.start(&option, Ticket::DETACHED) {
                log::error!("Gate: fast start failed: {}", err);
            }
        }
    }

    /// Drop the fast path's claim
    pub fn release_fast(&self) {
        let prev = GateUsers::from_bits_truncate(
            self.users
                .fetch_and(!GateUsers::FAST.bits(), Ordering::AcqRel),
        );
        if prev == GateUsers::FAST {
            self.inner.stop();
        }
    }
}

impl ClockDevice for GatedDevice {
    fn options(&self) -> &[ClockOption] {
        self.inner.options()
    }

    fn caps(&self) -> DeviceCaps {
        self.inner.caps()
    }

    fn start(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError> {
        let prev = GateUsers::from_bits_truncate(
            self.users
                .fetch_or(GateUsers::MANAGED.bits(), Ordering::AcqRel),
        );
        if prev.contains(GateUsers::FAST) && self.inner.is_running() {
            return self.inner.configure(option, ticket);
        }
        self.inner.start(option, ticket)
    }

    fn stop(&self) {
        let prev = GateUsers::from_bits_truncate(
            self.users
                .fetch_and(!GateUsers::MANAGED.bits(), Ordering::AcqRel),
        );
        if !prev.contains(GateUsers::FAST) {
            self.inner.stop();
        }
    }

    fn configure(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError> {
        self.inner.configure(option, ticket)
    }

    fn calibrate(&self) -> Result<(), HwError> {
        self.inner.calibrate()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

impl fmt::Debug for GatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatedDevice")
            .field("users", &self.users())
            .finish()
    }
}
