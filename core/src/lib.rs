//! # Clockwork Core
//!
//! Arbitration of shared, slow-to-start oscillators among independent
//! clients on a real-time device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            ClockRegistry                                 │
//! │                                                                          │
//! │  ┌───────────────────┐  ┌───────────────────┐  ┌──────────────────────┐  │
//! │  │  ClockNegotiator  │  │  ClockNegotiator  │  │ CalibrationController│  │
//! │  │      (hfclk)      │  │      (lfclk)      │  │  tick / force_start  │  │
//! │  └─────────┬─────────┘  └─────────┬─────────┘  └──────────┬───────────┘  │
//! │            │                      │      HF reservation   │              │
//! │  ┌─────────▼─────────┐  ┌─────────▼─────────┐◀────────────┘              │
//! │  │   OnOffManager    │  │   OnOffManager    │                            │
//! │  │ reservations, agg │  │ reservations, agg │                            │
//! │  └─────────┬─────────┘  └─────────┬─────────┘                            │
//! │            │     ┌──────────┐     │                                      │
//! │            │     │ FastPath │     │                                      │
//! │            │     └────┬─────┘     │                                      │
//! └────────────┼──────────┼───────────┼──────────────────────────────────────┘
//!              ▼          ▼           ▼
//!          GatedDevice (HF)      ClockDevice (LF)          clockwork-hal
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ClockRegistry::builder(ctx)
//!     .config(ClockControlConfig::from_params(cmdline))
//!     .with_hf(hfxo)
//!     .with_lf(lfrc)
//!     .build()?;
//!
//! registry.lf_on(LfStartMode::Available)?;
//! let hf = registry.clock(ClockType::Hf).ok_or(ClockError::NotSupported)?;
//! hf.request_sync(Some(&spec), Timeout::Millis(2))?;
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod error;
pub mod fast_path;
pub mod negotiator;
pub mod onoff;
pub mod registry;
pub mod spec;

#[cfg(feature = "calibration")]
pub mod calibration;

pub use clockwork_hal::{ClockType, Precision, Timeout};

#[cfg(feature = "calibration")]
pub use calibration::CalibrationController;
pub use config::{
    peripheral_frequency, CalibrationConfig, ClockControlConfig, LfAccuracy, LfSource,
};
pub use error::{ClockError, ClockResult};
pub use fast_path::FastPath;
pub use negotiator::ClockNegotiator;
pub use onoff::{OnOffManager, OnOffState, Outcome, Reservation, ReservationState};
pub use registry::{ClockRegistry, LfStartMode, RegistryBuilder};
pub use spec::{
    accuracy_ppm, ClockSpec, ACCURACY_MAX, FREQUENCY_MAX, PRECISION_DEFAULT, PRECISION_HIGH,
};

/// Core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
