//! # Clock Control Configuration
//!
//! Run-time knobs for the engine, with defaults matching a stock board:
//! crystal LF source, 500 ppm accuracy class, calibration every 4 s.
//!
//! Boot parameters override individual fields:
//!
//! ```text
//! lfclk.src=rc lfclk.accuracy=50 calib.period_ms=2000 calib.temp_diff=4
//! calib.max_skip=2 clock.max_refs=16
//! ```

use core::fmt;

use clockwork_hal::Precision;

use crate::error::{ClockError, ClockResult};
use crate::onoff::MAX_RESERVATIONS;
use crate::spec::ClockSpec;

/// Frequency a peripheral runs at when its clock node names none
pub const DEFAULT_PERIPHERAL_FREQUENCY: u32 = 16_000_000;

/// Default reference-count ceiling
pub const DEFAULT_MAX_REFS: usize = 64;

/// Default calibration period
pub const DEFAULT_CALIBRATION_PERIOD_MS: u32 = 4000;

// =============================================================================
// LF Source
// =============================================================================

/// Low-frequency clock source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LfSource {
    /// Internal RC oscillator
    Rc,
    /// External crystal
    #[default]
    Xtal,
    /// Synthesized from the high-frequency clock
    Synth,
    /// External low-swing signal
    ExtLowSwing,
    /// External full-swing signal
    ExtFullSwing,
}

impl LfSource {
    /// Parameter spelling
    pub const fn name(self) -> &'static str {
        match self {
            LfSource::Rc => "rc",
            LfSource::Xtal => "xtal",
            LfSource::Synth => "synth",
            LfSource::ExtLowSwing => "ext_low_swing",
            LfSource::ExtFullSwing => "ext_full_swing",
        }
    }

    /// Parse a parameter spelling
    pub fn from_name(name: &str) -> Option<Self> {
        [
            LfSource::Rc,
            LfSource::Xtal,
            LfSource::Synth,
            LfSource::ExtLowSwing,
            LfSource::ExtFullSwing,
        ]
        .into_iter()
        .find(|s| s.name() == name)
    }

    /// Whether this source drifts and must be calibrated against HF
    pub const fn needs_calibration(self) -> bool {
        matches!(self, LfSource::Rc)
    }
}

impl fmt::Display for LfSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// LF Accuracy
// =============================================================================

/// Accuracy class of the LF source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LfAccuracy {
    /// 500 ppm
    #[default]
    Ppm500 = 0,
    /// 250 ppm
    Ppm250 = 1,
    /// 150 ppm
    Ppm150 = 2,
    /// 100 ppm
    Ppm100 = 3,
    /// 75 ppm
    Ppm75  = 4,
    /// 50 ppm
    Ppm50  = 5,
    /// 30 ppm
    Ppm30  = 6,
    /// 20 ppm
    Ppm20  = 7,
}

impl LfAccuracy {
    const ALL: [LfAccuracy; 8] = [
        LfAccuracy::Ppm500,
        LfAccuracy::Ppm250,
        LfAccuracy::Ppm150,
        LfAccuracy::Ppm100,
        LfAccuracy::Ppm75,
        LfAccuracy::Ppm50,
        LfAccuracy::Ppm30,
        LfAccuracy::Ppm20,
    ];

    /// Accuracy in ppm
    pub const fn ppm(self) -> u16 {
        match self {
            LfAccuracy::Ppm500 => 500,
            LfAccuracy::Ppm250 => 250,
            LfAccuracy::Ppm150 => 150,
            LfAccuracy::Ppm100 => 100,
            LfAccuracy::Ppm75 => 75,
            LfAccuracy::Ppm50 => 50,
            LfAccuracy::Ppm30 => 30,
            LfAccuracy::Ppm20 => 20,
        }
    }

    /// Register encoding of the class
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Class with exactly `ppm`
    pub fn from_ppm(ppm: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.ppm() == ppm)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Calibration controller parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationConfig {
    /// Tick period
    pub period_ms: u32,
    /// Temperature change that forces a calibration, in 0.25 °C units
    pub temp_diff: u16,
    /// Consecutive skipped ticks that force a calibration
    pub max_skip: u32,
    /// HF requirement of the calibration sequence
    pub hf_spec: ClockSpec,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_CALIBRATION_PERIOD_MS,
            temp_diff: 2, // 0.5 °C
            max_skip: 1,
            hf_spec: ClockSpec::DEFAULT,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockControlConfig {
    /// Reference-count ceiling per clock
    pub max_refs: usize,
    /// LF source
    pub lf_source: LfSource,
    /// LF accuracy class
    pub lf_accuracy: LfAccuracy,
    /// Calibration parameters
    pub calibration: CalibrationConfig,
}

impl Default for ClockControlConfig {
    fn default() -> Self {
        Self {
            max_refs: DEFAULT_MAX_REFS,
            lf_source: LfSource::default(),
            lf_accuracy: LfAccuracy::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl ClockControlConfig {
    /// Defaults overridden by `key=value` boot parameters
    ///
    /// Unknown keys are ignored; malformed values keep the default and are
    /// logged.
    pub fn from_params(params: &str) -> Self {
        let mut config = Self::default();
        for (key, value) in params
            .split_whitespace()
            .filter_map(|param| param.split_once('='))
        {
            let applied = match key {
                "lfclk.src" => LfSource::from_name(value).map(|s| config.lf_source = s),
                "lfclk.accuracy" => value
                    .parse()
                    .ok()
                    .and_then(LfAccuracy::from_ppm)
                    .map(|a| config.lf_accuracy = a),
                "calib.period_ms" => value
                    .parse()
                    .ok()
                    .map(|v| config.calibration.period_ms = v),
                "calib.temp_diff" => value
                    .parse()
                    .ok()
                    .map(|v| config.calibration.temp_diff = v),
                "calib.max_skip" => value
                    .parse()
                    .ok()
                    .map(|v| config.calibration.max_skip = v),
                "clock.max_refs" => value.parse().ok().map(|v| config.max_refs = v),
                _ => Some(()),
            };
            if applied.is_none() {
                log::warn!("Clock: ignoring bad parameter {}={}", key, value);
            }
        }
        config
    }

    /// Check ranges
    pub fn validate(&self) -> ClockResult<()> {
        if self.max_refs == 0 || self.max_refs > MAX_RESERVATIONS {
            return Err(ClockError::Invalid);
        }
        if self.calibration.period_ms == 0 {
            return Err(ClockError::Invalid);
        }
        self.calibration.hf_spec.validate()
    }

    /// Requirement issued by [`lf_on`](crate::ClockRegistry::lf_on)
    pub fn lf_spec(&self) -> ClockSpec {
        ClockSpec::new(0, self.lf_accuracy.ppm(), Precision::Default)
    }
}

/// Frequency a peripheral derives from its clock node
///
/// An explicit `clock_frequency` wins, then the last listed supported
/// frequency, then [`DEFAULT_PERIPHERAL_FREQUENCY`].
pub fn peripheral_frequency(clock_frequency: Option<u32>, supported: &[u32]) -> u32 {
    clock_frequency
        .or_else(|| supported.last().copied())
        .unwrap_or(DEFAULT_PERIPHERAL_FREQUENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClockControlConfig::default();
        assert_eq!(config.max_refs, 64);
        assert_eq!(config.lf_source, LfSource::Xtal);
        assert_eq!(config.calibration.period_ms, 4000);
        assert_eq!(config.calibration.temp_diff, 2);
        assert_eq!(config.calibration.max_skip, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_params() {
        let config = ClockControlConfig::from_params(
            "quiet lfclk.src=rc lfclk.accuracy=50 calib.period_ms=2000 \
             calib.temp_diff=4 calib.max_skip=3 clock.max_refs=8",
        );
        assert_eq!(config.lf_source, LfSource::Rc);
        assert_eq!(config.lf_accuracy, LfAccuracy::Ppm50);
        assert_eq!(config.calibration.period_ms, 2000);
        assert_eq!(config.calibration.temp_diff, 4);
        assert_eq!(config.calibration.max_skip, 3);
        assert_eq!(config.max_refs, 8);
    }

    #[test]
    fn test_bad_params_keep_defaults() {
        let config = ClockControlConfig::from_params("lfclk.src=solar lfclk.accuracy=42 clock.max_refs=x");
        assert_eq!(config, ClockControlConfig::default());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = ClockControlConfig::default();
        config.max_refs = MAX_RESERVATIONS + 1;
        assert_eq!(config.validate(), Err(ClockError::Invalid));
        config.max_refs = 0;
        assert_eq!(config.validate(), Err(ClockError::Invalid));
    }

    #[test]
    fn test_accuracy_classes() {
        assert_eq!(LfAccuracy::Ppm500.code(), 0);
        assert_eq!(LfAccuracy::Ppm20.code(), 7);
        assert_eq!(LfAccuracy::from_ppm(75), Some(LfAccuracy::Ppm75));
        assert!(LfSource::Rc.needs_calibration());
        assert!(!LfSource::Synth.needs_calibration());
    }

    #[test]
    fn test_peripheral_frequency() {
        assert_eq!(peripheral_frequency(Some(32_000_000), &[8_000_000]), 32_000_000);
        assert_eq!(peripheral_frequency(None, &[8_000_000, 64_000_000]), 64_000_000);
        assert_eq!(peripheral_frequency(None, &[]), 16_000_000);
    }
}
