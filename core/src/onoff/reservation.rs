//! # Reservations
//!
//! A [`Reservation`] is one client's claim on a clock. The handle is shared
//! between the client and the state machine; its phase lives in an atomic so
//! that completion and cancellation resolve it exactly once, and so blocking
//! waiters can poll it without taking the machine's guard.
//!
//! ```text
//!            request                complete
//!   Idle ─────────────▶ Pending ──────────────▶ Satisfied ──release──▶ Released
//!     ▲                   │  │                      │
//!     │             cancel│  │hw error              │restart
//!     │                   ▼  ▼                      ▼
//!     └──── reuse ── Cancelled / Failed          Pending
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};

use super::OnOffState;
use crate::error::ClockError;

/// Result delivered to a reservation: the observed state, or the failure
pub type Outcome = Result<OnOffState, ClockError>;

/// Asynchronous notification target
pub type Callback = Box<dyn Fn(Outcome) + Send + Sync>;

/// Phase of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReservationState {
    /// Not submitted
    Idle      = 0,
    /// Waiting for the clock
    Pending   = 1,
    /// Clock delivered
    Satisfied = 2,
    /// Withdrawn before completion
    Cancelled = 3,
    /// Returned after satisfaction
    Released  = 4,
    /// Resource failed while pending
    Failed    = 5,
}

impl ReservationState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ReservationState::Pending,
            2 => ReservationState::Satisfied,
            3 => ReservationState::Cancelled,
            4 => ReservationState::Released,
            5 => ReservationState::Failed,
            _ => ReservationState::Idle,
        }
    }

    /// Whether the reservation is still outstanding
    pub const fn is_live(self) -> bool {
        matches!(self, ReservationState::Pending | ReservationState::Satisfied)
    }
}

enum Notify {
    Blocking,
    Callback(Callback),
}

const NO_OWNER: u32 = 0;
const NO_OUTCOME: i32 = i32::MIN;

fn encode(outcome: Outcome) -> i32 {
    match outcome {
        Ok(state) => state.raw() as i32,
        Err(err) => -(err.index() as i32) - 1,
    }
}

fn decode(raw: i32) -> Option<Outcome> {
    if raw == NO_OUTCOME {
        None
    } else if raw >= 0 {
        OnOffState::from_raw(raw as u32).map(Ok)
    } else {
        ClockError::from_index((-raw - 1) as u8).map(Err)
    }
}

/// Shared reservation state
pub(crate) struct Slot {
    phase: AtomicU8,
    outcome: AtomicI32,
    owner: AtomicU32,
    /// No client handle tracks the claim; spec-only release may retire it
    detached: AtomicBool,
    notify: Notify,
}

impl Slot {
    fn new(notify: Notify) -> Self {
        Self {
            phase: AtomicU8::new(ReservationState::Idle as u8),
            outcome: AtomicI32::new(NO_OUTCOME),
            owner: AtomicU32::new(NO_OWNER),
            detached: AtomicBool::new(false),
            notify,
        }
    }

    pub(crate) fn phase(&self) -> ReservationState {
        ReservationState::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn owner(&self) -> u32 {
        self.owner.load(Ordering::Acquire)
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Claim the slot for `owner`; fails if it is still outstanding
    pub(crate) fn arm(&self, owner: u32) -> bool {
        let armed = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                if ReservationState::from_u8(raw).is_live() {
                    None
                } else {
                    Some(ReservationState::Pending as u8)
                }
            })
            .is_ok();
        if armed {
            self.outcome.store(NO_OUTCOME, Ordering::Release);
            self.detached.store(false, Ordering::Release);
            self.owner.store(owner, Ordering::Release);
        }
        armed
    }

    /// Move from `from` to `to`, recording `outcome` when given
    pub(crate) fn settle(
        &self,
        from: ReservationState,
        to: ReservationState,
        outcome: Option<Outcome>,
    ) -> bool {
        if let Some(outcome) = outcome {
            self.outcome.store(encode(outcome), Ordering::Release);
        }
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Invoke the asynchronous target; blocking waiters poll instead
    pub(crate) fn deliver(&self, outcome: Outcome) {
        if let Notify::Callback(callback) = &self.notify {
            callback(outcome);
        }
    }
}

/// Client handle for one outstanding claim on a clock
///
/// Cloning yields another handle to the same claim. A handle may be reused
/// once its previous claim has resolved.
#[derive(Clone)]
pub struct Reservation {
    pub(crate) slot: Arc<Slot>,
}

impl Reservation {
    /// Reservation waited on by polling
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::new(Notify::Blocking)),
        }
    }

    /// Reservation notified through `callback`
    ///
    /// The callback may run in interrupt context and must not block. It is
    /// invoked without any internal guard held, so it may issue new requests.
    pub fn with_callback(callback: impl Fn(Outcome) + Send + Sync + 'static) -> Self {
        Self {
            slot: Arc::new(Slot::new(Notify::Callback(Box::new(callback)))),
        }
    }

    /// Current phase
    pub fn state(&self) -> ReservationState {
        self.slot.phase()
    }

    /// Last delivered result, if any
    pub fn outcome(&self) -> Option<Outcome> {
        decode(self.slot.outcome.load(Ordering::Acquire))
    }

    /// Whether the claim is still waiting for the clock
    pub fn is_pending(&self) -> bool {
        self.state() == ReservationState::Pending
    }

    /// Hand the claim over to the clock
    ///
    /// A detached claim is no longer tracked by any handle and is retired by
    /// a spec-only `release`. Claims still tracked by a handle are only ever
    /// retired through that handle. Other clones of this handle must not be
    /// used to cancel the claim afterwards.
    pub fn detach(self) {
        self.slot.detached.store(true, Ordering::Release);
    }

    /// Whether both handles refer to the same claim
    pub fn same_as(&self, other: &Reservation) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Default for Reservation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("state", &self.state())
            .field("outcome", &self.outcome())
            .field("owner", &self.slot.owner())
            .field("detached", &self.slot.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    #[test]
    fn test_outcome_encoding() {
        for state in [
            OnOffState::Off,
            OnOffState::Error,
            OnOffState::On,
            OnOffState::Stopping,
            OnOffState::Starting,
        ] {
            assert_eq!(decode(encode(Ok(state))), Some(Ok(state)));
        }
        for err in ClockError::ALL {
            assert_eq!(decode(encode(Err(err))), Some(Err(err)));
        }
        assert_eq!(decode(NO_OUTCOME), None);
    }

    #[test]
    fn test_arm_rejects_live_handle() {
        let res = Reservation::new();
        assert!(res.slot.arm(7));
        assert!(res.is_pending());
        assert!(!res.slot.arm(7));

        assert!(res.slot.settle(
            ReservationState::Pending,
            ReservationState::Cancelled,
            Some(Ok(OnOffState::Starting)),
        ));
        assert!(res.slot.arm(9));
        assert_eq!(res.slot.owner(), 9);
        assert_eq!(res.outcome(), None);
    }

    #[test]
    fn test_rearm_clears_detach() {
        let res = Reservation::new();
        let clone = res.clone();
        res.slot.arm(3);
        res.detach();
        assert!(clone.slot.is_detached());

        clone.slot.settle(
            ReservationState::Pending,
            ReservationState::Cancelled,
            None,
        );
        assert!(clone.slot.arm(3));
        assert!(!clone.slot.is_detached());
    }

    #[test]
    fn test_settle_wins_once() {
        let res = Reservation::new();
        res.slot.arm(1);
        assert!(res.slot.settle(
            ReservationState::Pending,
            ReservationState::Satisfied,
            Some(Ok(OnOffState::On)),
        ));
        assert!(!res.slot.settle(
            ReservationState::Pending,
            ReservationState::Cancelled,
            None,
        ));
        assert_eq!(res.state(), ReservationState::Satisfied);
        assert_eq!(res.outcome(), Some(Ok(OnOffState::On)));
    }

    #[test]
    fn test_callback_delivery() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let res = Reservation::with_callback(move |outcome| {
            assert_eq!(outcome, Ok(OnOffState::On));
            seen.fetch_add(1, Ordering::SeqCst);
        });
        res.slot.deliver(Ok(OnOffState::On));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        Reservation::new().slot.deliver(Ok(OnOffState::On));
    }
}
