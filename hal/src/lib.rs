//! # Clockwork Hardware Abstraction Layer
//!
//! The contract between the clock reservation engine and the register-level
//! oscillator drivers it arbitrates.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         clockwork-core                                   │
//! │     OnOffManager ─── ClockNegotiator ─── Calibration ─── FastPath        │
//! └───────────┬──────────────────┬────────────────┬─────────────┬───────────┘
//!             │                  │                │             │
//! ┌───────────▼──────────────────▼────────────────▼─────────────▼───────────┐
//! │                         clockwork-hal                                    │
//! │                                                                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │ ClockDevice  │  │ ExecContext  │  │  IrqMutex   │  │ GatedDevice  │   │
//! │  │ start/stop/  │  │ in_isr, time │  │ irq-safe    │  │ managed/fast │   │
//! │  │ configure/   │  │ relax, irq   │  │ guard       │  │ user bits    │   │
//! │  │ calibrate    │  │ masking      │  │             │  │              │   │
//! │  └──────────────┘  └──────────────┘  └─────────────┘  └──────────────┘   │
//! └──────────────────────────────────────────────────────────────────────────┘
//!             │
//!   register-level oscillator drivers (HFXO, LFRC, LFXO, ...)
//! ```
//!
//! ## Completion Model
//!
//! Every start or reconfiguration is handed a [`Ticket`]. A device either
//! reports [`Started::Ready`] synchronously, or returns [`Started::Pending`]
//! and later hands the ticket back to the owning state machine from its
//! interrupt handler. Tickets carry the state machine's generation, so a
//! completion that arrives after the machine moved on is recognised as stale.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod context;
pub mod device;
pub mod gate;
pub mod irq;
pub mod sensor;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use context::{ExecContext, IrqState, Timeout};
pub use device::{
    ClockDevice, ClockOption, ClockType, DeviceCaps, HwError, Precision, Started, Ticket,
};
pub use gate::{GateUsers, GatedDevice};
pub use irq::IrqMutex;
pub use sensor::TemperatureSensor;

/// HAL version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
