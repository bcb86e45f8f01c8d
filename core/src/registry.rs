//! # Clock Registry
//!
//! Explicit registry of every clock present on the device, indexed by
//! [`ClockType`]. Built once at init and passed by reference; tests build
//! isolated registries on simulated hardware.
//!
//! ```text
//!   RegistryBuilder
//!     .with_hf(hfxo)  ──▶ GatedDevice ──┬──▶ OnOffManager ──▶ ClockNegotiator
//!                                       └──▶ FastPath
//!     .with_lf(lfrc)  ─────────────────────▶ OnOffManager ──▶ ClockNegotiator
//!     .with_temperature_sensor(temp) ──────▶ CalibrationController (RC source)
//!     .build()
//! ```

use alloc::sync::Arc;
use core::fmt;

use clockwork_hal::{ClockDevice, ClockType, ExecContext, GatedDevice, TemperatureSensor};

use crate::config::ClockControlConfig;
use crate::error::{ClockError, ClockResult};
use crate::fast_path::FastPath;
use crate::negotiator::ClockNegotiator;
use crate::onoff::{OnOffManager, Reservation, ReservationState};

#[cfg(feature = "calibration")]
use crate::calibration::CalibrationController;

/// How long [`ClockRegistry::lf_on`] waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfStartMode {
    /// Return once the request is issued
    NoWait,
    /// Wait until the oscillator runs
    Available,
    /// Wait until the clock is delivered
    Stable,
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`ClockRegistry`]
pub struct RegistryBuilder {
    ctx: Arc<dyn ExecContext>,
    config: ClockControlConfig,
    devices: [Option<Arc<dyn ClockDevice>>; ClockType::SLOTS],
    gate: Option<Arc<GatedDevice>>,
    sensor: Option<Arc<dyn TemperatureSensor>>,
}

impl RegistryBuilder {
    /// Empty builder with the default configuration
    pub fn new(ctx: Arc<dyn ExecContext>) -> Self {
        Self {
            ctx,
            config: ClockControlConfig::default(),
            devices: [const { None }; ClockType::SLOTS],
            gate: None,
            sensor: None,
        }
    }

    /// Use `config`
    pub fn config(mut self, config: ClockControlConfig) -> Self {
        self.config = config;
        self
    }

    /// HF oscillator, shared with the fast path
    pub fn with_hf(mut self, device: Arc<dyn ClockDevice>) -> Self {
        let gate = Arc::new(GatedDevice::new(device));
        self.devices[ClockType::Hf.index()] = Some(gate.clone());
        self.gate = Some(gate);
        self
    }

    /// LF oscillator
    pub fn with_lf(self, device: Arc<dyn ClockDevice>) -> Self {
        self.with_clock(ClockType::Lf, device)
    }

    /// Oscillator for `clock`
    pub fn with_clock(mut self, clock: ClockType, device: Arc<dyn ClockDevice>) -> Self {
        if clock == ClockType::Hf {
            return self.with_hf(device);
        }
        self.devices[clock.index()] = Some(device);
        self
    }

    /// Temperature source for the calibration drift check
    pub fn with_temperature_sensor(mut self, sensor: Arc<dyn TemperatureSensor>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Create every manager and negotiator
    pub fn build(self) -> ClockResult<ClockRegistry> {
        self.config.validate()?;

        let mut clocks: [Option<Arc<ClockNegotiator>>; ClockType::SLOTS] =
            [const { None }; ClockType::SLOTS];
        for &clock in ClockType::ALL {
            let Some(device) = self.devices[clock.index()].clone() else {
                continue;
            };
            let manager = OnOffManager::new(
                clock.name(),
                device,
                self.ctx.clone(),
                self.config.max_refs,
            )?;
            clocks[clock.index()] = Some(Arc::new(ClockNegotiator::new(
                clock,
                Arc::new(manager),
                self.ctx.clone(),
            )));
            log::info!("Clock: registered {}", clock);
        }

        let fast_path = self.gate.map(FastPath::new);

        #[cfg(feature = "calibration")]
        let calibration = match (
            &clocks[ClockType::Lf.index()],
            &clocks[ClockType::Hf.index()],
        ) {
            (Some(lf), Some(hf)) if self.config.lf_source.needs_calibration() => {
                log::info!(
                    "Clock: calibrating {} every {} ms",
                    self.config.lf_source,
                    self.config.calibration.period_ms
                );
                Some(CalibrationController::new(
                    lf.onoff().clone(),
                    hf.clone(),
                    self.sensor.clone(),
                    self.config.calibration,
                ))
            }
            _ => None,
        };

        Ok(ClockRegistry {
            config: self.config,
            ctx: self.ctx,
            clocks,
            fast_path,
            #[cfg(feature = "calibration")]
            calibration,
            lf_reservation: Reservation::new(),
        })
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("config", &self.config)
            .field("has_sensor", &self.sensor.is_some())
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Every clock of the device
pub struct ClockRegistry {
    config: ClockControlConfig,
    ctx: Arc<dyn ExecContext>,
    clocks: [Option<Arc<ClockNegotiator>>; ClockType::SLOTS],
    fast_path: Option<FastPath>,
    #[cfg(feature = "calibration")]
    calibration: Option<Arc<CalibrationController>>,
    /// Claim taken by `lf_on`; live while the request stands
    lf_reservation: Reservation,
}

impl ClockRegistry {
    /// Start a builder
    pub fn builder(ctx: Arc<dyn ExecContext>) -> RegistryBuilder {
        RegistryBuilder::new(ctx)
    }

    /// Active configuration
    pub fn config(&self) -> &ClockControlConfig {
        &self.config
    }

    /// Negotiator of `clock`, if present
    pub fn clock(&self, clock: ClockType) -> Option<&Arc<ClockNegotiator>> {
        self.clocks[clock.index()].as_ref()
    }

    /// Negotiator for a legacy subsystem selector
    pub fn clock_by_subsys(&self, subsys: u32) -> Option<&Arc<ClockNegotiator>> {
        ClockType::from_subsys(subsys).and_then(|clock| self.clock(clock))
    }

    /// On/off service of `clock`, if present
    pub fn onoff(&self, clock: ClockType) -> Option<&Arc<OnOffManager>> {
        self.clock(clock).map(|c| c.onoff())
    }

    /// Unchecked HF path, present when an HF clock is registered
    pub fn fast_path(&self) -> Option<&FastPath> {
        self.fast_path.as_ref()
    }

    /// Calibration controller, present for an RC LF source
    #[cfg(feature = "calibration")]
    pub fn calibration(&self) -> Option<&Arc<CalibrationController>> {
        self.calibration.as_ref()
    }

    /// Calibrations performed, -1 when unsupported
    pub fn calibration_count(&self) -> i32 {
        #[cfg(feature = "calibration")]
        {
            if let Some(cc) = &self.calibration {
                return cc.calibration_count();
            }
        }
        -1
    }

    /// Calibration ticks skipped, -1 when unsupported
    pub fn calibration_skip_count(&self) -> i32 {
        #[cfg(feature = "calibration")]
        {
            if let Some(cc) = &self.calibration {
                return cc.skip_count();
            }
        }
        -1
    }

    /// Calibrate on the next tick regardless of drift
    pub fn force_calibration(&self) -> ClockResult<()> {
        #[cfg(feature = "calibration")]
        {
            if let Some(cc) = &self.calibration {
                cc.force_start();
                return Ok(());
            }
        }
        Err(ClockError::NotSupported)
    }

    /// Keep the LF clock on for good
    ///
    /// The request is issued once and never released. It is issued again
    /// only after the clock failed or was reset. Waiting modes do not spin
    /// in interrupt context.
    pub fn lf_on(&self, mode: LfStartMode) -> ClockResult<()> {
        let lf = self.clock(ClockType::Lf).ok_or(ClockError::NotSupported)?;
        if !self.lf_reservation.state().is_live() {
            let spec = self.config.lf_spec();
            match lf.request(Some(&spec), &self.lf_reservation) {
                Ok(_) => {}
                // Lost the race against a concurrent first call
                Err(ClockError::Invalid) if self.lf_reservation.state().is_live() => {}
                Err(err) => return Err(err),
            }
        }

        if mode == LfStartMode::NoWait || self.ctx.in_isr() {
            return Ok(());
        }
        loop {
            let done = match mode {
                LfStartMode::Available => lf.onoff().device().is_running(),
                _ => self.lf_reservation.state() == ReservationState::Satisfied,
            };
            if done {
                return Ok(());
            }
            if self.lf_reservation.state() == ReservationState::Failed {
                return Err(ClockError::ServiceError);
            }
            self.ctx.relax();
        }
    }
}

impl fmt::Debug for ClockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockRegistry")
            .field("config", &self.config)
            .field("clocks", &self.clocks)
            .field("fast_path", &self.fast_path)
            .finish()
    }
}
