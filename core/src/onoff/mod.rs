//! # On/Off Reservation State Machine
//!
//! One [`OnOffManager`] owns one physical oscillator. It reference-counts
//! client reservations, drives the device through start, reconfigure and
//! stop, and fans completions out to every waiting client.
//!
//! ## State Diagram
//!
//! ```text
//!              request                    hw ready
//!   ┌─────┐ ─────────────▶ ┌──────────┐ ──────────────▶ ┌──────┐
//!   │ OFF │                │ STARTING │                 │  ON  │◀─┐ request
//!   └─────┘ ◀───────────── └──────────┘ ◀── restart ─── └──────┘──┘ (satisfied
//!      ▲       hw stopped        │          (upgrade)       │        or retune)
//!      │                         │ hw error                 │ last release
//!   ┌──────────┐            ┌───────┐                       │
//!   │ STOPPING │◀───────────┼───────┼───────────────────────┘
//!   └──────────┘            │ ERROR │ ── reset ──▶ OFF
//!                           └───────┘
//! ```
//!
//! ## Two-Phase Protocol
//!
//! Every operation runs in two phases. Phase one mutates the state under the
//! interrupt-safe guard and captures the hardware action plus the batch of
//! reservations to notify. Phase two drops the guard, performs the hardware
//! action and invokes the notifications, so a callback may immediately issue
//! a new request. A device that reports readiness synchronously feeds its
//! completion straight back into phase one.
//!
//! Hardware actions are queued in the machine. The caller that finds the
//! queue idle runs it until empty; every other caller only queues, so the
//! device never sees a start overtake a later reconfiguration.

mod machine;
mod reservation;

pub use reservation::{Callback, Outcome, Reservation, ReservationState};

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use clockwork_hal::{
    ClockDevice, ClockOption, ExecContext, HwError, IrqMutex, Started, Ticket,
};
use static_assertions::const_assert;

use self::machine::{Action, Machine, Step};
use crate::error::{ClockError, ClockResult};
use crate::spec::ClockSpec;

/// Capacity of each resource's reservation table
pub const MAX_RESERVATIONS: usize = 64;

const_assert!(MAX_RESERVATIONS >= crate::config::DEFAULT_MAX_REFS);
const_assert!(MAX_RESERVATIONS <= u8::MAX as usize);

// =============================================================================
// States
// =============================================================================

/// Lifecycle state of a resource
///
/// The discriminants are the on/off service state codes of the legacy ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OnOffState {
    /// Powered down
    Off      = 0,
    /// Hardware failed; sticky until reset
    Error    = 1,
    /// Running
    On       = 2,
    /// Powering down
    Stopping = 4,
    /// Powering up or restarting
    Starting = 6,
}

impl OnOffState {
    /// Legacy state code
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Decode a legacy state code
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(OnOffState::Off),
            1 => Some(OnOffState::Error),
            2 => Some(OnOffState::On),
            4 => Some(OnOffState::Stopping),
            6 => Some(OnOffState::Starting),
            _ => None,
        }
    }

    /// State name
    pub const fn name(self) -> &'static str {
        match self {
            OnOffState::Off => "off",
            OnOffState::Error => "error",
            OnOffState::On => "on",
            OnOffState::Stopping => "stopping",
            OnOffState::Starting => "starting",
        }
    }
}

impl fmt::Display for OnOffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Unique manager identifier, used as reservation owner tag
fn next_manager_id() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn notify(step: &mut Step) {
    for (slot, outcome) in core::mem::take(&mut step.notify) {
        slot.deliver(outcome);
    }
}

enum Completion {
    Ticket(Ticket, Result<(), HwError>),
    Stopped,
}

/// Reservation state machine for one oscillator
pub struct OnOffManager {
    id: u32,
    name: &'static str,
    device: Arc<dyn ClockDevice>,
    ctx: Arc<dyn ExecContext>,
    machine: IrqMutex<Machine>,
}

impl OnOffManager {
    /// Create a manager for `device`
    ///
    /// `max_refs` bounds the outstanding reservations and must not exceed
    /// [`MAX_RESERVATIONS`].
    pub fn new(
        name: &'static str,
        device: Arc<dyn ClockDevice>,
        ctx: Arc<dyn ExecContext>,
        max_refs: usize,
    ) -> ClockResult<Self> {
        if max_refs == 0 || max_refs > MAX_RESERVATIONS || device.options().is_empty() {
            return Err(ClockError::Invalid);
        }
        let id = next_manager_id();
        let caps = device.caps();
        Ok(Self {
            id,
            name,
            device,
            ctx,
            machine: IrqMutex::new(Machine::new(name, id, caps, max_refs)),
        })
    }

    /// Clock name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Underlying device
    pub fn device(&self) -> &Arc<dyn ClockDevice> {
        &self.device
    }

    /// Current state
    pub fn state(&self) -> OnOffState {
        self.machine.with(&*self.ctx, |m| m.state)
    }

    /// Satisfied reservations
    pub fn refs(&self) -> usize {
        self.machine.with(&*self.ctx, |m| m.refs())
    }

    /// Reservations still waiting for the clock
    pub fn pending(&self) -> usize {
        self.machine.with(&*self.ctx, |m| m.pending.len())
    }

    /// Strictest requirement over all outstanding reservations
    pub fn aggregate(&self) -> ClockSpec {
        self.machine.with(&*self.ctx, |m| m.aggregate())
    }

    /// Option currently delivered
    pub fn configured(&self) -> Option<ClockOption> {
        let index = self.machine.with(&*self.ctx, |m| m.configured)?;
        self.device.options().get(index).copied()
    }

    /// Generation of the latest hardware transition
    pub fn generation(&self) -> u32 {
        self.machine.with(&*self.ctx, |m| m.generation)
    }

    /// Reserve the clock with requirement `spec`
    ///
    /// Returns the state observed before the request. `res` is notified once
    /// the clock delivers `spec`, possibly before this returns.
    pub fn request(&self, res: &Reservation, spec: ClockSpec) -> ClockResult<OnOffState> {
        self.transact(|m, options, step| m.request(&res.slot, spec, options, step))
    }

    /// Retire one satisfied, detached reservation made with exactly `spec`
    ///
    /// Claims still tracked by a [`Reservation`] handle are never picked;
    /// they are retired through [`cancel_or_release`](Self::cancel_or_release).
    pub fn release(&self, spec: ClockSpec) -> ClockResult<OnOffState> {
        self.transact(|m, options, step| m.release(spec, options, step))
    }

    /// Withdraw `res` if still pending, else release it
    ///
    /// Returns [`OnOffState::Starting`] (or `Stopping` while a stop is in
    /// progress) when the reservation was withdrawn, [`OnOffState::On`] when
    /// it was released. When `spec` is given it must match the reservation's.
    pub fn cancel_or_release(
        &self,
        res: &Reservation,
        spec: Option<ClockSpec>,
    ) -> ClockResult<OnOffState> {
        self.transact(|m, options, step| m.cancel_or_release(&res.slot, spec, options, step))
    }

    /// Report the end of a start or reconfiguration from interrupt context
    pub fn complete(&self, ticket: Ticket, result: Result<(), HwError>) {
        self.transact(|m, options, step| m.complete(ticket, result, options, step));
    }

    /// Leave the error state, dropping every reservation
    pub fn reset(&self) -> ClockResult<OnOffState> {
        let result = self.transact(|m, _, step| m.reset(step));
        if result.is_ok() {
            log::info!("Clock {}: reset", self.name);
        }
        result
    }

    /// Phase one under the guard, then phase two
    fn transact<R>(&self, op: impl FnOnce(&mut Machine, &[ClockOption], &mut Step) -> R) -> R {
        let options = self.device.options();
        let mut step = Step::default();
        let (result, runner) = self.machine.with(&*self.ctx, |m| {
            let result = op(m, options, &mut step);
            (result, m.enqueue(&mut step))
        });
        notify(&mut step);
        if runner {
            self.run_queue();
        }
        result
    }

    /// Hand queued actions to the device in order, feeding back completions
    fn run_queue(&self) {
        let options = self.device.options();
        while let Some(action) = self.machine.with(&*self.ctx, |m| m.next_action()) {
            let Some(completion) = self.execute(action) else {
                continue;
            };
            let mut step = Step::default();
            self.machine.with(&*self.ctx, |m| {
                match completion {
                    Completion::Ticket(ticket, result) => {
                        m.complete(ticket, result, options, &mut step)
                    }
                    Completion::Stopped => m.stopped(options, &mut step),
                }
                m.enqueue(&mut step);
            });
            notify(&mut step);
        }
    }

    fn execute(&self, action: Action) -> Option<Completion> {
        let options = self.device.options();
        let initiated = match action {
            Action::Stop => {
                log::debug!("Clock {}: stop", self.name);
                self.device.stop();
                return Some(Completion::Stopped);
            }
            Action::Start(index, ticket) => {
                let option = options.get(index)?;
                log::debug!("Clock {}: start with {}", self.name, option);
                (ticket, self.device.start(option, ticket))
            }
            Action::Restart(index, ticket) => {
                let option = options.get(index)?;
                log::debug!("Clock {}: restart with {}", self.name, option);
                self.device.stop();
                (ticket, self.device.start(option, ticket))
            }
            Action::Reconfigure(index, ticket) => {
                let option = options.get(index)?;
                log::debug!("Clock {}: reconfigure to {}", self.name, option);
                (ticket, self.device.configure(option, ticket))
            }
        };
        match initiated {
            (_, Ok(Started::Pending)) => None,
            (ticket, Ok(Started::Ready)) => Some(Completion::Ticket(ticket, Ok(()))),
            (ticket, Err(err)) => Some(Completion::Ticket(ticket, Err(err))),
        }
    }
}

impl fmt::Debug for OnOffManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnOffManager")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("refs", &self.refs())
            .finish()
    }
}
