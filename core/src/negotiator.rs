//! # Clock Spec Negotiator
//!
//! Client-facing surface of one clock. Maps optional per-client
//! requirements onto the reservation state machine, offers the synchronous
//! wrapper used from thread context, and the plain on/off/rate/status calls
//! of the standard clock-control interface.

use alloc::sync::Arc;
use core::fmt;

use clockwork_hal::{ClockType, ExecContext, Timeout};

use crate::error::{ClockError, ClockResult};
use crate::onoff::{OnOffManager, OnOffState, Reservation, ReservationState};
use crate::spec::ClockSpec;

/// Negotiating front end of one clock
pub struct ClockNegotiator {
    clock: ClockType,
    manager: Arc<OnOffManager>,
    ctx: Arc<dyn ExecContext>,
}

fn spec_or_default(spec: Option<&ClockSpec>) -> ClockSpec {
    spec.copied().unwrap_or(ClockSpec::DEFAULT)
}

impl ClockNegotiator {
    /// Wrap the state machine of `clock`
    pub fn new(clock: ClockType, manager: Arc<OnOffManager>, ctx: Arc<dyn ExecContext>) -> Self {
        Self {
            clock,
            manager,
            ctx,
        }
    }

    /// Clock this negotiator serves
    pub fn clock_type(&self) -> ClockType {
        self.clock
    }

    /// Underlying on/off service
    pub fn onoff(&self) -> &Arc<OnOffManager> {
        &self.manager
    }

    /// Request the clock with `spec` (`None`: no requirement)
    pub fn request(&self, spec: Option<&ClockSpec>, res: &Reservation) -> ClockResult<OnOffState> {
        self.manager.request(res, spec_or_default(spec))
    }

    /// Release one detached request made with the same `spec`
    ///
    /// Detached requests are those taken by [`request_sync`](Self::request_sync),
    /// [`on`](Self::on) or handed over with [`Reservation::detach`].
    pub fn release(&self, spec: Option<&ClockSpec>) -> ClockResult<OnOffState> {
        self.manager.release(spec_or_default(spec))
    }

    /// Withdraw or release the request made with `spec` through `res`
    pub fn cancel_or_release(
        &self,
        spec: Option<&ClockSpec>,
        res: &Reservation,
    ) -> ClockResult<OnOffState> {
        self.manager
            .cancel_or_release(res, Some(spec_or_default(spec)))
    }

    /// Request the clock and wait until it delivers `spec`
    ///
    /// Fails with [`ClockError::WouldBlock`] from interrupt context. On
    /// timeout the request is withdrawn before returning
    /// [`ClockError::Timeout`]. On success the caller holds one reference,
    /// returned with [`release`](Self::release).
    pub fn request_sync(&self, spec: Option<&ClockSpec>, timeout: Timeout) -> ClockResult<()> {
        if self.ctx.in_isr() {
            return Err(ClockError::WouldBlock);
        }

        let res = Reservation::new();
        self.request(spec, &res)?;
        let deadline = timeout.deadline(self.ctx.uptime_ms());

        loop {
            match res.state() {
                ReservationState::Satisfied => {
                    res.detach();
                    return Ok(());
                }
                ReservationState::Pending => {}
                _ => {
                    return Err(res
                        .outcome()
                        .and_then(Result::err)
                        .unwrap_or(ClockError::ServiceError))
                }
            }
            if deadline.is_some_and(|d| self.ctx.uptime_ms() >= d) {
                log::debug!("Clock {}: synchronous request timed out", self.clock);
                return match self.cancel_or_release(spec, &res) {
                    Ok(_) => Err(ClockError::Timeout),
                    Err(ClockError::Invalid) => Err(res
                        .outcome()
                        .and_then(Result::err)
                        .unwrap_or(ClockError::Timeout)),
                    Err(err) => Err(err),
                };
            }
            self.ctx.relax();
        }
    }

    /// Turn the clock on with no requirement and wait for it
    pub fn on(&self) -> ClockResult<()> {
        self.request_sync(None, Timeout::Forever)
    }

    /// Drop one reference taken with [`on`](Self::on)
    pub fn off(&self) -> ClockResult<OnOffState> {
        self.release(None)
    }

    /// Frequency currently delivered, 0 when not running
    pub fn rate(&self) -> u32 {
        match self.manager.state() {
            OnOffState::On => self.manager.configured().map_or(0, |o| o.frequency),
            _ => 0,
        }
    }

    /// Lifecycle state
    pub fn status(&self) -> OnOffState {
        self.manager.state()
    }
}

impl fmt::Debug for ClockNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockNegotiator")
            .field("clock", &self.clock)
            .field("manager", &self.manager)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clockwork_hal::sim::{SimClock, SimContext};
    use clockwork_hal::Precision;
    use std::thread;

    fn negotiator(sim: &Arc<SimClock>, ctx: &Arc<SimContext>) -> ClockNegotiator {
        let manager = OnOffManager::new("lfclk", sim.clone(), ctx.clone(), 8).unwrap();
        ClockNegotiator::new(ClockType::Lf, Arc::new(manager), ctx.clone())
    }

    #[test]
    fn test_request_sync_would_block_in_isr() {
        let sim = Arc::new(SimClock::lf());
        let ctx = Arc::new(SimContext::new());
        let clock = negotiator(&sim, &ctx);

        ctx.set_isr(true);
        assert_eq!(
            clock.request_sync(None, Timeout::Forever),
            Err(ClockError::WouldBlock)
        );
        assert_eq!(clock.on(), Err(ClockError::WouldBlock));
        assert_eq!(clock.status(), OnOffState::Off);
        assert_eq!(sim.starts(), 0);
    }

    #[test]
    fn test_request_sync_immediate() {
        let sim = Arc::new(SimClock::lf());
        let ctx = Arc::new(SimContext::new());
        let clock = negotiator(&sim, &ctx);
        let spec = ClockSpec::new(32_768, 50, Precision::High);

        assert_eq!(clock.request_sync(Some(&spec), Timeout::NoWait), Ok(()));
        assert_eq!(clock.status(), OnOffState::On);
        assert_eq!(clock.rate(), 32_768);
        assert_eq!(clock.onoff().refs(), 1);

        assert_eq!(clock.release(Some(&spec)), Ok(OnOffState::On));
        assert_eq!(clock.status(), OnOffState::Off);
        assert_eq!(clock.rate(), 0);
    }

    #[test]
    fn test_request_sync_timeout_withdraws() {
        let sim = Arc::new(SimClock::lf());
        sim.set_deferred(true);
        let ctx = Arc::new(SimContext::new());
        let clock = negotiator(&sim, &ctx);

        assert_eq!(
            clock.request_sync(None, Timeout::Millis(10)),
            Err(ClockError::Timeout)
        );
        assert!(ctx.uptime_ms() >= 10);
        assert_eq!(clock.onoff().pending(), 0);
        assert_eq!(clock.onoff().refs(), 0);

        clock.onoff().complete(sim.last_ticket(), Ok(()));
        assert_eq!(clock.status(), OnOffState::Off);
        assert_eq!(sim.stops(), 1);
    }

    #[test]
    fn test_request_sync_reports_failure() {
        let sim = Arc::new(SimClock::lf());
        sim.fail_start(true);
        let ctx = Arc::new(SimContext::new());
        let clock = negotiator(&sim, &ctx);

        assert_eq!(clock.on(), Err(ClockError::ServiceError));
        assert_eq!(clock.status(), OnOffState::Error);
    }

    #[test]
    fn test_request_sync_completed_from_other_thread() {
        let sim = Arc::new(SimClock::lf());
        sim.set_deferred(true);
        let ctx = Arc::new(SimContext::new());
        let clock = Arc::new(negotiator(&sim, &ctx));

        let irq = {
            let clock = clock.clone();
            let sim = sim.clone();
            thread::spawn(move || {
                while sim.last_ticket() == clockwork_hal::Ticket::DETACHED {
                    thread::yield_now();
                }
                clock.onoff().complete(sim.last_ticket(), Ok(()));
            })
        };

        assert_eq!(clock.on(), Ok(()));
        irq.join().unwrap();
        assert_eq!(clock.off(), Ok(OnOffState::On));
        assert_eq!(clock.status(), OnOffState::Off);
    }

    #[test]
    fn test_release_after_sync_keeps_handle_claims() {
        let sim = Arc::new(SimClock::lf());
        let ctx = Arc::new(SimContext::new());
        let clock = negotiator(&sim, &ctx);
        let res = Reservation::new();

        clock.request(None, &res).unwrap();
        assert_eq!(clock.on(), Ok(()));
        assert_eq!(clock.off(), Ok(OnOffState::On));
        assert_eq!(clock.off(), Err(ClockError::NotSupported));
        assert_eq!(res.state(), ReservationState::Satisfied);

        assert_eq!(clock.cancel_or_release(None, &res), Ok(OnOffState::On));
        assert_eq!(clock.status(), OnOffState::Off);
    }

    #[test]
    fn test_cancel_or_release_checks_spec() {
        let sim = Arc::new(SimClock::lf());
        let ctx = Arc::new(SimContext::new());
        let clock = negotiator(&sim, &ctx);
        let spec = ClockSpec::new(0, 0, Precision::High);
        let res = Reservation::new();

        clock.request(Some(&spec), &res).unwrap();
        assert_eq!(clock.cancel_or_release(None, &res), Err(ClockError::Invalid));
        assert_eq!(clock.cancel_or_release(Some(&spec), &res), Ok(OnOffState::On));
        assert_eq!(clock.status(), OnOffState::Off);
    }
}
