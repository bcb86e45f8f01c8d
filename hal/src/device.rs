//! # Clock Device Contract
//!
//! The abstract oscillator driver the reservation engine drives. A driver
//! publishes an ordered table of [`ClockOption`]s it can deliver and exposes
//! start/stop/configure/calibrate operations.

use alloc::sync::Arc;
use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

// =============================================================================
// Clock Types
// =============================================================================

/// Clocks handled by the clock peripheral
///
/// The discriminants double as the legacy subsystem selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ClockType {
    /// High-frequency clock
    Hf         = 0,
    /// Low-frequency (32.768 kHz) clock
    Lf         = 1,
    /// 192 MHz high-frequency clock
    #[cfg(feature = "hfclk192m")]
    Hf192m     = 2,
    /// High-frequency audio clock
    #[cfg(feature = "hfclkaudio")]
    HfAudio    = 3,
}

impl ClockType {
    /// Number of clock slots, including variants compiled out on this device
    pub const SLOTS: usize = 4;

    /// All clock types present on this device
    pub const ALL: &'static [ClockType] = &[
        ClockType::Hf,
        ClockType::Lf,
        #[cfg(feature = "hfclk192m")]
        ClockType::Hf192m,
        #[cfg(feature = "hfclkaudio")]
        ClockType::HfAudio,
    ];

    /// Decode a legacy subsystem selector
    pub fn from_subsys(subsys: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u32 == subsys)
    }

    /// Slot index of this clock
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            ClockType::Hf => "hfclk",
            ClockType::Lf => "lfclk",
            #[cfg(feature = "hfclk192m")]
            ClockType::Hf192m => "hfclk192m",
            #[cfg(feature = "hfclkaudio")]
            ClockType::HfAudio => "hfclkaudio",
        }
    }
}

impl fmt::Display for ClockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Options
// =============================================================================

/// Clock precision class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Precision {
    /// Default precision is sufficient
    #[default]
    Default = 0,
    /// High precision is required
    High    = 1,
}

/// One concrete configuration a device can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockOption {
    /// Output frequency in Hz
    pub frequency: u32,
    /// Accuracy in parts-per-million (0 if unspecified)
    pub accuracy_ppm: u16,
    /// Precision class
    pub precision: Precision,
}

impl ClockOption {
    /// Create a new option
    pub const fn new(frequency: u32, accuracy_ppm: u16, precision: Precision) -> Self {
        Self {
            frequency,
            accuracy_ppm,
            precision,
        }
    }
}

impl fmt::Display for ClockOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz/{} ppm/{:?}",
            self.frequency, self.accuracy_ppm, self.precision
        )
    }
}

bitflags! {
    /// Static capabilities of a clock device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCaps: u8 {
        /// Changing option while running needs a full stop/start cycle
        const RESTART_TO_RECONFIGURE = 1 << 0;
        /// Device may be relaxed to a cheaper option while running
        const RELAX                  = 1 << 1;
        /// Device supports calibration bursts
        const CALIBRATION            = 1 << 2;
    }
}

// =============================================================================
// Completion
// =============================================================================

/// Generation token handed to a device with each start or reconfiguration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u32);

impl Ticket {
    /// Ticket for starts nobody waits on; never matches a live generation
    pub const DETACHED: Ticket = Ticket(0);

    /// Create a ticket for a generation
    pub const fn new(generation: u32) -> Self {
        Self(generation)
    }

    /// Generation this ticket belongs to
    pub const fn generation(self) -> u32 {
        self.0
    }
}

// Devices stash the ticket in a register-width slot
const_assert_eq!(core::mem::size_of::<Ticket>(), 4);
const_assert_eq!(core::mem::size_of::<ClockType>(), 1);

/// Result of initiating a start or reconfiguration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Started {
    /// The clock already runs with the requested option
    Ready,
    /// Completion will be reported later with the ticket
    Pending,
}

/// Hardware error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwError {
    /// Oscillator failed to start
    StartFailed,
    /// Option could not be applied
    ConfigureFailed,
    /// Calibration burst failed
    CalibrationFailed,
    /// Sensor read failed
    SensorFailed,
    /// Operation not supported by this device
    Unsupported,
}

impl fmt::Display for HwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwError::StartFailed => write!(f, "Oscillator failed to start"),
            HwError::ConfigureFailed => write!(f, "Clock option could not be applied"),
            HwError::CalibrationFailed => write!(f, "Calibration failed"),
            HwError::SensorFailed => write!(f, "Sensor read failed"),
            HwError::Unsupported => write!(f, "Operation not supported"),
        }
    }
}

// =============================================================================
// Device Trait
// =============================================================================

/// Register-level oscillator driver
///
/// `start` and `configure` may be called from interrupt context when a
/// completion triggers the next transition, so implementations must not block.
pub trait ClockDevice: Send + Sync {
    /// Options this device can deliver, ordered from cheapest to best
    fn options(&self) -> &[ClockOption];

    /// Static capabilities
    fn caps(&self) -> DeviceCaps {
        DeviceCaps::empty()
    }

    /// Begin powering and stabilizing the oscillator with `option`
    fn start(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError>;

    /// Power the oscillator down
    fn stop(&self);

    /// Apply `option` while running
    fn configure(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError>;

    /// Perform one calibration burst
    fn calibrate(&self) -> Result<(), HwError> {
        Err(HwError::Unsupported)
    }

    /// Whether the oscillator is currently running
    fn is_running(&self) -> bool;
}

impl<T: ClockDevice + ?Sized> ClockDevice for Arc<T> {
    fn options(&self) -> &[ClockOption] {
        (**self).options()
    }

    fn caps(&self) -> DeviceCaps {
        (**self).caps()
    }

    fn start(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError> {
        (**self).start(option, ticket)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn configure(&self, option: &ClockOption, ticket: Ticket) -> Result<Started, HwError> {
        (**self).configure(option, ticket)
    }

    fn calibrate(&self) -> Result<(), HwError> {
        (**self).calibrate()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsys_selectors() {
        assert_eq!(ClockType::from_subsys(0), Some(ClockType::Hf));
        assert_eq!(ClockType::from_subsys(1), Some(ClockType::Lf));
        assert_eq!(ClockType::from_subsys(7), None);
        assert_eq!(ClockType::Lf.index(), 1);
    }

    #[cfg(not(feature = "hfclk192m"))]
    #[test]
    fn test_absent_variant_selector() {
        assert_eq!(ClockType::from_subsys(2), None);
    }

    #[test]
    fn test_detached_ticket() {
        assert_eq!(Ticket::DETACHED.generation(), 0);
        assert_ne!(Ticket::new(1), Ticket::DETACHED);
    }

    #[test]
    fn test_precision_order() {
        assert!(Precision::High > Precision::Default);
        assert_eq!(Precision::default(), Precision::Default);
    }
}
