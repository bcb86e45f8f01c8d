//! # LF Calibration Controller
//!
//! Keeps a free-running RC low-frequency oscillator within its drift bound
//! by periodically borrowing the HF clock for a calibration burst.
//!
//! ```text
//!   tick ──▶ LF on? ── no ──▶ re-arm
//!              │ yes
//!              ▼
//!        drift bound exceeded? ── no ──▶ skipped += 1, re-arm
//!        (forced, temp change,
//!         too many skips,
//!         sensor failure)
//!              │ yes
//!              ▼
//!        request HF ─▶ HF ready ─▶ calibrate LF ─▶ release HF ─▶ performed += 1
//! ```
//!
//! The platform timer calls [`CalibrationController::tick`] and re-arms
//! itself with the returned period.

use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use clockwork_hal::TemperatureSensor;
use spin::Mutex;

use crate::config::CalibrationConfig;
use crate::negotiator::ClockNegotiator;
use crate::onoff::{OnOffManager, OnOffState, Outcome, Reservation};

cfg_if::cfg_if! {
    if #[cfg(feature = "calibration-debug")] {
        use core::sync::atomic::AtomicU32;

        /// Diagnostic counters
        #[derive(Debug, Default)]
        struct Counters {
            performed: AtomicU32,
            skipped: AtomicU32,
        }

        impl Counters {
            fn performed(&self) {
                self.performed.fetch_add(1, Ordering::Relaxed);
            }

            fn skipped(&self) {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }

            fn performed_count(&self) -> i32 {
                self.performed.load(Ordering::Relaxed) as i32
            }

            fn skipped_count(&self) -> i32 {
                self.skipped.load(Ordering::Relaxed) as i32
            }
        }
    } else {
        /// Counters compiled out
        #[derive(Debug, Default)]
        struct Counters;

        impl Counters {
            fn performed(&self) {}

            fn skipped(&self) {}

            fn performed_count(&self) -> i32 {
                -1
            }

            fn skipped_count(&self) -> i32 {
                -1
            }
        }
    }
}

#[derive(Debug, Default)]
struct Drift {
    /// Temperature at the last calibration, 0.25 °C units
    last_temp: Option<i32>,
    /// Temperature sampled for the calibration in progress
    sample: Option<i32>,
    /// Consecutive skipped ticks
    skipped_in_row: u32,
}

/// Periodic LF calibration against the HF clock
pub struct CalibrationController {
    lf: Arc<OnOffManager>,
    hf: Arc<ClockNegotiator>,
    sensor: Option<Arc<dyn TemperatureSensor>>,
    config: CalibrationConfig,
    drift: Mutex<Drift>,
    forced: AtomicBool,
    /// Waiting for the HF clock or calibrating
    busy: AtomicBool,
    hf_res: Reservation,
    counters: Counters,
}

impl CalibrationController {
    /// Create a controller calibrating `lf` with `hf` as reference
    pub fn new(
        lf: Arc<OnOffManager>,
        hf: Arc<ClockNegotiator>,
        sensor: Option<Arc<dyn TemperatureSensor>>,
        config: CalibrationConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            Self {
                lf,
                hf,
                sensor,
                config,
                drift: Mutex::new(Drift::default()),
                forced: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                hf_res: Reservation::with_callback(move |outcome| {
                    if let Some(controller) = weak.upgrade() {
                        controller.on_hf_ready(outcome);
                    }
                }),
                counters: Counters::default(),
            }
        })
    }

    /// Run one period; returns the delay before the next tick in ms
    pub fn tick(&self) -> u32 {
        let period = self.config.period_ms;
        if self.lf.state() != OnOffState::On || self.busy.load(Ordering::Acquire) {
            return period;
        }

        if !self.drift_exceeded() {
            self.counters.skipped();
            return period;
        }

        self.busy.store(true, Ordering::Release);
        log::debug!("Calibration: requesting {}", self.hf.clock_type());
        if let Err(err) = self.hf.request(Some(&self.config.hf_spec), &self.hf_res) {
            log::warn!("Calibration: HF request failed: {}", err);
            self.busy.store(false, Ordering::Release);
            self.counters.skipped();
        }
        period
    }

    /// Calibrate on the next tick regardless of drift
    pub fn force_start(&self) {
        self.forced.store(true, Ordering::Release);
    }

    /// Calibrations performed, -1 when counters are compiled out
    pub fn calibration_count(&self) -> i32 {
        self.counters.performed_count()
    }

    /// Ticks skipped, -1 when counters are compiled out
    pub fn skip_count(&self) -> i32 {
        self.counters.skipped_count()
    }

    /// Whether a calibration is in progress
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Configured tick period
    pub fn period_ms(&self) -> u32 {
        self.config.period_ms
    }

    fn drift_exceeded(&self) -> bool {
        let forced = self.forced.swap(false, Ordering::AcqRel);
        let temp = self.sensor.as_ref().map(|s| s.read_quarter_celsius());

        let mut drift = self.drift.lock();
        drift.sample = None;
        let exceeded = match temp {
            None => true,
            Some(Err(err)) => {
                log::warn!("Calibration: temperature read failed: {}", err);
                true
            }
            Some(Ok(now)) => {
                drift.sample = Some(now);
                let moved = drift.last_temp.map_or(true, |last| {
                    now.abs_diff(last) >= u32::from(self.config.temp_diff)
                });
                moved || drift.skipped_in_row >= self.config.max_skip
            }
        } || forced;
        if !exceeded {
            drift.skipped_in_row += 1;
        }
        exceeded
    }

    fn on_hf_ready(&self, outcome: Outcome) {
        if let Err(err) = outcome {
            log::warn!("Calibration: HF clock unavailable: {}", err);
            self.counters.skipped();
            self.busy.store(false, Ordering::Release);
            return;
        }

        let result = self.lf.device().calibrate();
        if let Err(err) = self.hf.cancel_or_release(Some(&self.config.hf_spec), &self.hf_res) {
            log::warn!("Calibration: HF release failed: {}", err);
        }

        match result {
            Ok(()) => {
                let mut drift = self.drift.lock();
                if drift.sample.is_some() {
                    drift.last_temp = drift.sample;
                }
                drift.skipped_in_row = 0;
                drop(drift);
                self.counters.performed();
                log::debug!("Calibration: done");
            }
            Err(err) => {
                log::warn!("Calibration: {}", err);
                self.counters.skipped();
            }
        }
        self.busy.store(false, Ordering::Release);
    }
}

impl fmt::Debug for CalibrationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibrationController")
            .field("busy", &self.is_busy())
            .field("performed", &self.calibration_count())
            .field("skipped", &self.skip_count())
            .finish()
    }
}

#[cfg(all(test, feature = "calibration-debug"))]
mod tests {
    use super::*;
    use clockwork_hal::sim::{SimClock, SimContext, SimSensor};
    use clockwork_hal::ClockType;

    struct Rig {
        lf_sim: Arc<SimClock>,
        hf_sim: Arc<SimClock>,
        sensor: Arc<SimSensor>,
        lf: Arc<OnOffManager>,
        cc: Arc<CalibrationController>,
    }

    fn rig() -> Rig {
        rig_with(CalibrationConfig::default())
    }

    fn rig_with(config: CalibrationConfig) -> Rig {
        let ctx = Arc::new(SimContext::new());
        let lf_sim = Arc::new(SimClock::lf());
        let hf_sim = Arc::new(SimClock::hf());
        let sensor = Arc::new(SimSensor::new(25));
        let lf = Arc::new(OnOffManager::new("lfclk", lf_sim.clone(), ctx.clone(), 8).unwrap());
        let hf_mgr = Arc::new(OnOffManager::new("hfclk", hf_sim.clone(), ctx.clone(), 8).unwrap());
        let hf = Arc::new(ClockNegotiator::new(ClockType::Hf, hf_mgr, ctx));
        let cc = CalibrationController::new(
            lf.clone(),
            hf,
            Some(sensor.clone()),
            config,
        );
        Rig {
            lf_sim,
            hf_sim,
            sensor,
            lf,
            cc,
        }
    }

    fn lf_on(rig: &Rig) {
        rig.lf
            .request(&Reservation::new(), crate::spec::ClockSpec::DEFAULT)
            .unwrap();
    }

    #[test]
    fn test_tick_with_lf_off_does_nothing() {
        let rig = rig();
        assert_eq!(rig.cc.tick(), 4000);
        assert_eq!(rig.cc.calibration_count(), 0);
        assert_eq!(rig.cc.skip_count(), 0);
        assert_eq!(rig.sensor.reads(), 0);
    }

    #[test]
    fn test_first_tick_calibrates() {
        let rig = rig();
        lf_on(&rig);
        rig.cc.tick();
        assert_eq!(rig.cc.calibration_count(), 1);
        assert_eq!(rig.lf_sim.calibrations(), 1);
        assert_eq!(rig.hf_sim.starts(), 1);
        assert_eq!(rig.hf_sim.stops(), 1);
        assert!(!rig.cc.is_busy());
    }

    #[test]
    fn test_stable_temperature_skips_then_calibrates() {
        let rig = rig();
        lf_on(&rig);
        rig.cc.tick();

        rig.cc.tick();
        assert_eq!(rig.cc.calibration_count(), 1);
        assert_eq!(rig.cc.skip_count(), 1);

        rig.cc.tick();
        assert_eq!(rig.cc.calibration_count(), 2);
        assert_eq!(rig.cc.skip_count(), 1);
    }

    #[test]
    fn test_temperature_change_calibrates() {
        let rig = rig();
        lf_on(&rig);
        rig.cc.tick();

        rig.sensor.set_quarter_celsius(25 * 4 + 2);
        rig.cc.tick();
        assert_eq!(rig.cc.calibration_count(), 2);
        assert_eq!(rig.cc.skip_count(), 0);
    }

    #[test]
    fn test_force_start() {
        let rig = rig();
        lf_on(&rig);
        rig.cc.tick();
        let skipped = rig.cc.skip_count();

        rig.cc.force_start();
        rig.cc.tick();
        assert_eq!(rig.cc.calibration_count(), 2);
        assert_eq!(rig.cc.skip_count(), skipped);
    }

    #[test]
    fn test_sensor_failure_calibrates() {
        let rig = rig();
        lf_on(&rig);
        rig.cc.tick();
        rig.sensor.fail(true);
        rig.cc.tick();
        assert_eq!(rig.cc.calibration_count(), 2);
    }

    #[test]
    fn test_failed_calibration_counts_as_skipped() {
        let rig = rig();
        lf_on(&rig);
        rig.lf_sim.fail_calibration(true);
        rig.cc.tick();
        assert_eq!(rig.cc.calibration_count(), 0);
        assert_eq!(rig.cc.skip_count(), 1);
        assert_eq!(rig.hf_sim.stops(), 1);
        assert!(!rig.cc.is_busy());
    }

    #[test]
    fn test_busy_while_waiting_for_hf() {
        let rig = rig();
        lf_on(&rig);
        rig.hf_sim.set_deferred(true);
        rig.cc.tick();
        assert!(rig.cc.is_busy());

        rig.cc.tick();
        assert_eq!(rig.cc.skip_count(), 0);

        let hf = rig.cc.hf.onoff().clone();
        hf.complete(rig.hf_sim.last_ticket(), Ok(()));
        assert!(!rig.cc.is_busy());
        assert_eq!(rig.cc.calibration_count(), 1);
    }

    #[test]
    fn test_skip_run_bounded_by_max_skip() {
        let rig = rig_with(CalibrationConfig {
            max_skip: u32::MAX,
            ..CalibrationConfig::default()
        });
        lf_on(&rig);
        rig.cc.tick();
        rig.cc.drift.lock().skipped_in_row = u32::MAX - 1;

        rig.cc.tick();
        assert_eq!(rig.cc.drift.lock().skipped_in_row, u32::MAX);
        assert_eq!(rig.cc.calibration_count(), 1);

        rig.cc.tick();
        assert_eq!(rig.cc.drift.lock().skipped_in_row, 0);
        assert_eq!(rig.cc.calibration_count(), 2);
    }
}
