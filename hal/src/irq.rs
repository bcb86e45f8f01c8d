//! # Interrupt-Safe Guard
//!
//! A `spin::Mutex` taken with interrupts masked through the
//! [`ExecContext`], so state shared with interrupt handlers can never
//! deadlock against its own ISR on the same core.

use core::fmt;

use spin::Mutex;

use crate::context::ExecContext;

/// Spin lock held with interrupts masked
pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    /// Create a new guard around `value`
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `f` on the protected value
    ///
    /// The lock is released before this returns, so `f` must only mutate
    /// state; anything that can re-enter the owner runs after `with`.
    pub fn with<R>(&self, ctx: &dyn ExecContext, f: impl FnOnce(&mut T) -> R) -> R {
        let saved = ctx.irq_save();
        let result = {
            let mut guard = self.inner.lock();
            f(&mut guard)
        };
        ctx.irq_restore(saved);
        result
    }

    /// Whether the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T> fmt::Debug for IrqMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqMutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}
