//! # Transition Logic
//!
//! The state of one resource, mutated only under its manager's guard. Every
//! operation returns a [`Step`]: the hardware action to perform and the
//! reservations to notify once the guard is dropped.
//!
//! Hardware actions go through the machine's action queue. Only the caller
//! that finds the queue idle runs it, so the device sees actions in the
//! order the machine issued them even when several callers race through
//! phase two.

use alloc::sync::Arc;

use clockwork_hal::{ClockOption, DeviceCaps, HwError, Ticket};
use heapless::{Deque, Vec};

use super::reservation::{Outcome, ReservationState, Slot};
use super::{OnOffState, MAX_RESERVATIONS};
use crate::error::{ClockError, ClockResult};
use crate::spec::ClockSpec;

/// One outstanding claim and its requirement
pub(crate) struct Entry {
    pub(crate) slot: Arc<Slot>,
    pub(crate) spec: ClockSpec,
}

/// Hardware work to perform outside the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    /// Power up with option index
    Start(usize, Ticket),
    /// Apply option index while running
    Reconfigure(usize, Ticket),
    /// Power down, then up with option index
    Restart(usize, Ticket),
    /// Power down
    Stop,
}

impl Action {
    /// Fold `next` into `self` while neither has reached the device
    fn merge(self, next: Action) -> Option<Action> {
        match (self, next) {
            (Action::Start(..), Action::Reconfigure(i, t) | Action::Restart(i, t)) => {
                Some(Action::Start(i, t))
            }
            (Action::Restart(..), Action::Reconfigure(i, t) | Action::Restart(i, t))
            | (Action::Reconfigure(..), Action::Restart(i, t)) => Some(Action::Restart(i, t)),
            (Action::Reconfigure(..), Action::Reconfigure(i, t)) => {
                Some(Action::Reconfigure(i, t))
            }
            _ => None,
        }
    }
}

/// Depth of the hardware action queue
///
/// A queued stop blocks further actions until it runs, so the queue holds
/// at most a start chain, a stop and the start that follows a reset.
const ACTION_QUEUE: usize = 4;

/// Work captured under the guard
#[derive(Default)]
pub(crate) struct Step {
    pub(crate) action: Option<Action>,
    pub(crate) notify: Vec<(Arc<Slot>, Outcome), MAX_RESERVATIONS>,
}

impl Step {
    fn push_notify(&mut self, slot: &Arc<Slot>, outcome: Outcome) {
        if self.notify.push((slot.clone(), outcome)).is_err() {
            log::error!("Clock: notification batch full");
        }
    }
}

type Entries = Vec<Entry, MAX_RESERVATIONS>;

fn push_entry(list: &mut Entries, entry: Entry) {
    if list.push(entry).is_err() {
        log::error!("Clock: reservation table full");
    }
}

fn take_slot(list: &mut Entries, slot: &Arc<Slot>) -> Option<Entry> {
    let index = list.iter().position(|e| Arc::ptr_eq(&e.slot, slot))?;
    Some(list.swap_remove(index))
}

/// State of one resource
pub(crate) struct Machine {
    pub(crate) name: &'static str,
    pub(crate) owner: u32,
    pub(crate) caps: DeviceCaps,
    pub(crate) max_refs: usize,
    pub(crate) state: OnOffState,
    pub(crate) generation: u32,
    /// Option being delivered, or targeted by an in-flight start
    pub(crate) configured: Option<usize>,
    /// Option targeted by the in-flight start or reconfiguration
    pub(crate) target: Option<usize>,
    pub(crate) in_flight: bool,
    /// Reconfiguration in flight while ON
    pub(crate) retuning: bool,
    /// Start again once the current stop completes
    pub(crate) restart_pending: bool,
    pub(crate) pending: Entries,
    pub(crate) active: Entries,
    /// Actions not yet handed to the device, oldest first
    pub(crate) queue: Deque<Action, ACTION_QUEUE>,
    /// A caller is running the action queue
    pub(crate) processing: bool,
}

impl Machine {
    pub(crate) fn new(name: &'static str, owner: u32, caps: DeviceCaps, max_refs: usize) -> Self {
        Self {
            name,
            owner,
            caps,
            max_refs,
            state: OnOffState::Off,
            generation: 0,
            configured: None,
            target: None,
            in_flight: false,
            retuning: false,
            restart_pending: false,
            pending: Vec::new(),
            active: Vec::new(),
            queue: Deque::new(),
            processing: false,
        }
    }

    /// Satisfied claims
    pub(crate) fn refs(&self) -> usize {
        self.active.len()
    }

    /// Strictest requirement over all outstanding claims
    pub(crate) fn aggregate(&self) -> ClockSpec {
        ClockSpec::aggregate(self.active.iter().chain(self.pending.iter()).map(|e| &e.spec))
    }

    // =========================================================================
    // Action Queue
    // =========================================================================

    /// Queue the step's action
    ///
    /// Returns true when the caller became the one running the queue.
    pub(crate) fn enqueue(&mut self, step: &mut Step) -> bool {
        if let Some(action) = step.action.take() {
            self.push_action(action);
        }
        if self.processing || self.queue.is_empty() {
            return false;
        }
        self.processing = true;
        true
    }

    /// Next action for the running caller; ends its turn when none is left
    pub(crate) fn next_action(&mut self) -> Option<Action> {
        let action = self.queue.pop_front();
        if action.is_none() {
            self.processing = false;
        }
        action
    }

    fn push_action(&mut self, action: Action) {
        if let Some(last) = self.queue.back_mut() {
            if let Some(merged) = last.merge(action) {
                *last = merged;
                return;
            }
        }
        if self.queue.push_back(action).is_err() {
            log::error!("Clock {}: action queue full, dropping {:?}", self.name, action);
        }
    }

    fn next_ticket(&mut self) -> Ticket {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.generation = 1;
        }
        Ticket::new(self.generation)
    }

    fn set_state(&mut self, state: OnOffState) {
        if self.state != state {
            log::debug!("Clock {}: {} -> {}", self.name, self.state, state);
            self.state = state;
        }
    }

    fn covers(&self, spec: &ClockSpec, options: &[ClockOption]) -> bool {
        self.configured
            .and_then(|index| options.get(index))
            .is_some_and(|option| spec.normalize(options).is_satisfied_by(option))
    }

    fn target_covers(&self, spec: &ClockSpec, options: &[ClockOption]) -> bool {
        self.target
            .and_then(|index| options.get(index))
            .is_some_and(|option| spec.normalize(options).is_satisfied_by(option))
    }

    // =========================================================================
    // Client Operations
    // =========================================================================

    pub(crate) fn request(
        &mut self,
        slot: &Arc<Slot>,
        spec: ClockSpec,
        options: &[ClockOption],
        step: &mut Step,
    ) -> ClockResult<OnOffState> {
        spec.validate()?;
        if self.state == OnOffState::Error {
            return Err(ClockError::ServiceError);
        }
        if self.aggregate().tighten(spec).resolve(options).is_none() {
            return Err(ClockError::Invalid);
        }
        if self.active.len() + self.pending.len() >= self.max_refs {
            return Err(ClockError::Overflow);
        }
        if !slot.arm(self.owner) {
            return Err(ClockError::Invalid);
        }

        let observed = self.state;
        let entry = Entry {
            slot: slot.clone(),
            spec,
        };
        match self.state {
            OnOffState::Off => {
                push_entry(&mut self.pending, entry);
                self.begin_start(options, step);
            }
            OnOffState::Starting => {
                push_entry(&mut self.pending, entry);
                if !self.target_covers(&self.aggregate(), options) {
                    self.retarget(options, step);
                }
            }
            OnOffState::Stopping => {
                push_entry(&mut self.pending, entry);
                self.restart_pending = true;
            }
            OnOffState::On => {
                if self.covers(&spec, options) {
                    slot.settle(
                        ReservationState::Pending,
                        ReservationState::Satisfied,
                        Some(Ok(OnOffState::On)),
                    );
                    step.push_notify(slot, Ok(OnOffState::On));
                    push_entry(&mut self.active, entry);
                } else {
                    push_entry(&mut self.pending, entry);
                    if !self.retuning {
                        self.upgrade(options, step);
                    }
                }
            }
            OnOffState::Error => {}
        }
        Ok(observed)
    }

    pub(crate) fn release(
        &mut self,
        spec: ClockSpec,
        options: &[ClockOption],
        step: &mut Step,
    ) -> ClockResult<OnOffState> {
        if self.state == OnOffState::Error {
            return Err(ClockError::ServiceError);
        }
        let index = self
            .active
            .iter()
            .position(|e| e.spec == spec && e.slot.is_detached())
            .ok_or(ClockError::NotSupported)?;
        let entry = self.active.swap_remove(index);
        entry.slot.settle(
            ReservationState::Satisfied,
            ReservationState::Released,
            None,
        );
        let observed = self.state;
        self.after_release(options, step);
        Ok(observed)
    }

    pub(crate) fn cancel_or_release(
        &mut self,
        slot: &Arc<Slot>,
        spec: Option<ClockSpec>,
        options: &[ClockOption],
        step: &mut Step,
    ) -> ClockResult<OnOffState> {
        if slot.owner() != self.owner {
            return Err(ClockError::Invalid);
        }
        if self.state == OnOffState::Error {
            return Err(ClockError::ServiceError);
        }
        let matches =
            |e: &Entry| Arc::ptr_eq(&e.slot, slot) && spec.map_or(true, |s| s == e.spec);

        if self.pending.iter().any(matches) {
            let observed = match self.state {
                OnOffState::Stopping => OnOffState::Stopping,
                _ => OnOffState::Starting,
            };
            take_slot(&mut self.pending, slot);
            slot.settle(
                ReservationState::Pending,
                ReservationState::Cancelled,
                Some(Ok(observed)),
            );
            if self.pending.is_empty() {
                self.restart_pending = false;
            }
            self.after_release(options, step);
            return Ok(observed);
        }

        if self.active.iter().any(matches) {
            take_slot(&mut self.active, slot);
            slot.settle(
                ReservationState::Satisfied,
                ReservationState::Released,
                None,
            );
            self.after_release(options, step);
            return Ok(OnOffState::On);
        }

        Err(ClockError::Invalid)
    }

    pub(crate) fn reset(&mut self, step: &mut Step) -> ClockResult<OnOffState> {
        if self.state != OnOffState::Error {
            return Err(ClockError::NotSupported);
        }
        for entry in self.active.iter() {
            entry.slot.settle(
                ReservationState::Satisfied,
                ReservationState::Released,
                None,
            );
        }
        self.active.clear();
        self.pending.clear();
        self.configured = None;
        self.target = None;
        self.in_flight = false;
        self.retuning = false;
        self.restart_pending = false;
        self.next_ticket();
        self.set_state(OnOffState::Off);
        step.action = Some(Action::Stop);
        Ok(OnOffState::Off)
    }

    // =========================================================================
    // Hardware Completion
    // =========================================================================

    pub(crate) fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<(), HwError>,
        options: &[ClockOption],
        step: &mut Step,
    ) {
        if !self.in_flight || ticket.generation() != self.generation {
            log::warn!(
                "Clock {}: stale completion {} (current {})",
                self.name,
                ticket.generation(),
                self.generation
            );
            return;
        }
        self.in_flight = false;

        if let Err(err) = result {
            log::error!("Clock {}: hardware failure: {}", self.name, err);
            self.retuning = false;
            self.restart_pending = false;
            self.set_state(OnOffState::Error);
            for entry in self.pending.iter() {
                entry.slot.settle(
                    ReservationState::Pending,
                    ReservationState::Failed,
                    Some(Err(ClockError::ServiceError)),
                );
                step.push_notify(&entry.slot, Err(ClockError::ServiceError));
            }
            self.pending.clear();
            return;
        }

        self.configured = self.target;
        self.retuning = false;
        self.set_state(OnOffState::On);

        let mut index = 0;
        while index < self.pending.len() {
            if self.covers(&self.pending[index].spec, options) {
                let entry = self.pending.swap_remove(index);
                entry.slot.settle(
                    ReservationState::Pending,
                    ReservationState::Satisfied,
                    Some(Ok(OnOffState::On)),
                );
                step.push_notify(&entry.slot, Ok(OnOffState::On));
                push_entry(&mut self.active, entry);
            } else {
                index += 1;
            }
        }

        if self.active.is_empty() && self.pending.is_empty() {
            self.begin_stop(step);
        } else if !self.pending.is_empty() {
            self.upgrade(options, step);
        }
    }

    pub(crate) fn stopped(&mut self, options: &[ClockOption], step: &mut Step) {
        if self.state != OnOffState::Stopping {
            return;
        }
        self.configured = None;
        self.set_state(OnOffState::Off);
        if self.restart_pending && !self.pending.is_empty() {
            self.restart_pending = false;
            self.begin_start(options, step);
        }
    }

    // =========================================================================
    // Internal Transitions
    // =========================================================================

    fn begin_start(&mut self, options: &[ClockOption], step: &mut Step) {
        let Some(target) = self.aggregate().resolve(options) else {
            return;
        };
        let ticket = self.next_ticket();
        self.target = Some(target);
        self.configured = None;
        self.in_flight = true;
        self.set_state(OnOffState::Starting);
        step.action = Some(Action::Start(target, ticket));
    }

    fn begin_stop(&mut self, step: &mut Step) {
        self.next_ticket();
        self.in_flight = false;
        self.retuning = false;
        self.target = None;
        self.set_state(OnOffState::Stopping);
        step.action = Some(Action::Stop);
    }

    /// Reach an option covering every pending claim
    fn upgrade(&mut self, options: &[ClockOption], step: &mut Step) {
        let Some(target) = self.aggregate().resolve(options) else {
            return;
        };
        let ticket = self.next_ticket();
        self.target = Some(target);
        self.in_flight = true;

        if self.caps.contains(DeviceCaps::RESTART_TO_RECONFIGURE) {
            while let Some(entry) = self.active.pop() {
                entry.slot.settle(
                    ReservationState::Satisfied,
                    ReservationState::Pending,
                    None,
                );
                push_entry(&mut self.pending, entry);
            }
            self.configured = None;
            self.set_state(OnOffState::Starting);
            step.action = Some(Action::Restart(target, ticket));
        } else {
            self.retuning = true;
            step.action = Some(Action::Reconfigure(target, ticket));
        }
    }

    /// Aim the in-flight start at a better option
    fn retarget(&mut self, options: &[ClockOption], step: &mut Step) {
        let Some(target) = self.aggregate().resolve(options) else {
            return;
        };
        let ticket = self.next_ticket();
        self.target = Some(target);
        self.in_flight = true;
        step.action = Some(if self.caps.contains(DeviceCaps::RESTART_TO_RECONFIGURE) {
            Action::Restart(target, ticket)
        } else {
            Action::Reconfigure(target, ticket)
        });
    }

    fn after_release(&mut self, options: &[ClockOption], step: &mut Step) {
        if self.state != OnOffState::On {
            return;
        }
        if self.active.is_empty() && self.pending.is_empty() {
            self.begin_stop(step);
            return;
        }
        if self.retuning || !self.caps.contains(DeviceCaps::RELAX) {
            return;
        }
        let Some(target) = self.aggregate().resolve(options) else {
            return;
        };
        if self.configured.is_some_and(|current| target < current) {
            let ticket = self.next_ticket();
            self.target = Some(target);
            self.configured = Some(target);
            self.in_flight = true;
            self.retuning = true;
            step.action = Some(Action::Reconfigure(target, ticket));
        }
    }
}
