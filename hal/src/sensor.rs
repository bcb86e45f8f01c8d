//! Temperature source used to bound low-frequency oscillator drift.

use crate::device::HwError;

/// Die temperature sensor
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature in 0.25 °C units
    fn read_quarter_celsius(&self) -> Result<i32, HwError>;
}
