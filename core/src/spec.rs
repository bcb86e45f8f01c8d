//! # Clock Specifications
//!
//! A [`ClockSpec`] is a client's minimum requirement on a clock. Every field
//! uses zero for "no requirement". Specs combine component-wise into the
//! aggregate requirement of a resource, which is then resolved against the
//! device's ordered option table:
//!
//! ```text
//!   {32768 Hz, 0 ppm, Default} ┐
//!   {32768 Hz, 20 ppm, Default}├─ tighten ─▶ {32768 Hz, 20 ppm, High}
//!   {0 Hz, 0 ppm, High}        ┘                       │
//!                                                      │ first option that
//!   options: [250 ppm/Default, 50 ppm/High, 20 ppm/High] ◀─ satisfies it
//!                                            ▲
//!                                        index 2
//! ```

use core::fmt;

use clockwork_hal::{ClockOption, Precision};

use crate::error::{ClockError, ClockResult};

/// Request the highest frequency the device offers
pub const FREQUENCY_MAX: u32 = u32::MAX;

/// Request the best accuracy the device offers
pub const ACCURACY_MAX: u16 = 1;

/// Largest accuracy value the spec field can carry
pub const ACCURACY_FIELD_MAX: u16 = 0x7FFF;

/// Default precision
pub const PRECISION_DEFAULT: Precision = Precision::Default;

/// High precision
pub const PRECISION_HIGH: Precision = Precision::High;

/// Accuracy requirement of `ppm` parts-per-million
pub const fn accuracy_ppm(ppm: u16) -> u16 {
    ppm
}

/// Minimum clock requirement of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClockSpec {
    /// Minimum frequency in Hz (0: any)
    pub frequency: u32,
    /// Maximum tolerated error in ppm (0: any)
    pub accuracy: u16,
    /// Minimum precision class
    pub precision: Precision,
}

impl ClockSpec {
    /// No requirement at all
    pub const DEFAULT: ClockSpec = ClockSpec::new(0, 0, Precision::Default);

    /// Create a spec
    pub const fn new(frequency: u32, accuracy: u16, precision: Precision) -> Self {
        Self {
            frequency,
            accuracy,
            precision,
        }
    }

    /// Check field ranges
    pub fn validate(&self) -> ClockResult<()> {
        if self.accuracy > ACCURACY_FIELD_MAX {
            return Err(ClockError::Invalid);
        }
        Ok(())
    }

    /// Component-wise strictest combination of two specs
    pub fn tighten(self, other: ClockSpec) -> ClockSpec {
        let accuracy = match (self.accuracy, other.accuracy) {
            (0, a) | (a, 0) => a,
            (a, b) => a.min(b),
        };
        ClockSpec {
            frequency: self.frequency.max(other.frequency),
            accuracy,
            precision: self.precision.max(other.precision),
        }
    }

    /// Strictest combination of many specs
    pub fn aggregate<'a>(specs: impl IntoIterator<Item = &'a ClockSpec>) -> ClockSpec {
        specs
            .into_iter()
            .fold(ClockSpec::DEFAULT, |acc, spec| acc.tighten(*spec))
    }

    /// Replace the "best available" markers with concrete values from `options`
    pub fn normalize(self, options: &[ClockOption]) -> ClockSpec {
        let mut spec = self;
        if spec.frequency == FREQUENCY_MAX {
            if let Some(best) = options.iter().map(|o| o.frequency).max() {
                spec.frequency = best;
            }
        }
        if spec.accuracy == ACCURACY_MAX {
            if let Some(best) = options
                .iter()
                .map(|o| o.accuracy_ppm)
                .filter(|ppm| *ppm != 0)
                .min()
            {
                spec.accuracy = best;
            }
        }
        spec
    }

    /// Whether `option` meets this spec
    pub fn is_satisfied_by(&self, option: &ClockOption) -> bool {
        let accuracy_ok = self.accuracy == 0
            || (option.accuracy_ppm != 0 && option.accuracy_ppm <= self.accuracy);
        option.frequency >= self.frequency && accuracy_ok && option.precision >= self.precision
    }

    /// Index of the cheapest option meeting this spec
    pub fn resolve(&self, options: &[ClockOption]) -> Option<usize> {
        let spec = self.normalize(options);
        options.iter().position(|o| spec.is_satisfied_by(o))
    }
}

impl fmt::Display for ClockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} Hz, {} ppm, {:?}}}",
            self.frequency, self.accuracy, self.precision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LF: [ClockOption; 3] = [
        ClockOption::new(32_768, 250, Precision::Default),
        ClockOption::new(32_768, 50, Precision::High),
        ClockOption::new(32_768, 20, Precision::High),
    ];

    #[test]
    fn test_aggregate_takes_strictest_fields() {
        let specs = [
            ClockSpec::new(32_768, 0, PRECISION_DEFAULT),
            ClockSpec::new(32_768, accuracy_ppm(20), PRECISION_DEFAULT),
            ClockSpec::new(0, 0, PRECISION_HIGH),
        ];
        assert_eq!(
            ClockSpec::aggregate(&specs),
            ClockSpec::new(32_768, 20, Precision::High)
        );
        assert_eq!(ClockSpec::aggregate(&[] as &[ClockSpec]), ClockSpec::DEFAULT);
    }

    #[test]
    fn test_zero_accuracy_does_not_loosen() {
        let tight = ClockSpec::new(0, 50, Precision::Default);
        assert_eq!(tight.tighten(ClockSpec::DEFAULT).accuracy, 50);
        assert_eq!(ClockSpec::DEFAULT.tighten(tight).accuracy, 50);
        assert_eq!(tight.tighten(ClockSpec::new(0, 30, Precision::Default)).accuracy, 30);
    }

    #[test]
    fn test_resolve_picks_cheapest() {
        assert_eq!(ClockSpec::DEFAULT.resolve(&LF), Some(0));
        assert_eq!(ClockSpec::new(0, 0, Precision::High).resolve(&LF), Some(1));
        assert_eq!(ClockSpec::new(32_768, 20, Precision::Default).resolve(&LF), Some(2));
        assert_eq!(ClockSpec::new(32_768, 10, Precision::Default).resolve(&LF), None);
        assert_eq!(ClockSpec::new(64_000, 0, Precision::Default).resolve(&LF), None);
    }

    #[test]
    fn test_max_markers_resolve_to_best() {
        let best = ClockSpec::new(FREQUENCY_MAX, ACCURACY_MAX, Precision::Default);
        assert_eq!(best.normalize(&LF), ClockSpec::new(32_768, 20, Precision::Default));
        assert_eq!(best.resolve(&LF), Some(2));
    }

    #[test]
    fn test_validate_accuracy_range() {
        assert!(ClockSpec::new(0, ACCURACY_FIELD_MAX, Precision::Default)
            .validate()
            .is_ok());
        assert_eq!(
            ClockSpec::new(0, ACCURACY_FIELD_MAX + 1, Precision::Default).validate(),
            Err(ClockError::Invalid)
        );
    }
}
