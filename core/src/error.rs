//! # Clock Control Errors
//!
//! | Error | errno | Recoverable | Meaning |
//! |-------|-------|-------------|---------|
//! | Invalid | -22 | Yes | Malformed argument or foreign reservation |
//! | Overflow | -11 | Yes | Reference count ceiling reached |
//! | ServiceError | -5 | No | Resource is in the sticky error state |
//! | WouldBlock | -11 | Yes | Blocking wait requested from interrupt context |
//! | Timeout | -116 | Yes | Synchronous wait expired |
//! | NotSupported | -134 | Yes | Operation not valid in the current state |

use core::fmt;

use clockwork_hal::HwError;

/// Clock control error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockError {
    /// Malformed arguments, unsatisfiable spec, or a reservation not owned here
    Invalid,
    /// Reference count ceiling reached
    Overflow,
    /// Resource is in the error state
    ServiceError,
    /// Blocking operation attempted where blocking is not allowed
    WouldBlock,
    /// Wait expired
    Timeout,
    /// Operation not valid in the current state
    NotSupported,
}

impl ClockError {
    /// Every error, in encoding order
    pub const ALL: [ClockError; 6] = [
        ClockError::Invalid,
        ClockError::Overflow,
        ClockError::ServiceError,
        ClockError::WouldBlock,
        ClockError::Timeout,
        ClockError::NotSupported,
    ];

    /// Negative errno of the legacy driver ABI
    pub const fn errno(&self) -> i32 {
        match self {
            ClockError::Invalid => -22,
            ClockError::Overflow => -11,
            ClockError::ServiceError => -5,
            ClockError::WouldBlock => -11,
            ClockError::Timeout => -116,
            ClockError::NotSupported => -134,
        }
    }

    /// Error category
    pub const fn category(&self) -> &'static str {
        match self {
            ClockError::Invalid | ClockError::NotSupported => "Usage",
            ClockError::Overflow => "Resource",
            ClockError::ServiceError => "Hardware",
            ClockError::WouldBlock | ClockError::Timeout => "Wait",
        }
    }

    /// Check if the caller can recover locally
    pub const fn is_recoverable(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if the resource is unusable until reset
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ClockError::ServiceError)
    }

    pub(crate) const fn index(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::Invalid => write!(f, "Invalid argument"),
            ClockError::Overflow => write!(f, "Reference count overflow"),
            ClockError::ServiceError => write!(f, "Clock service in error state"),
            ClockError::WouldBlock => write!(f, "Operation would block"),
            ClockError::Timeout => write!(f, "Timed out"),
            ClockError::NotSupported => write!(f, "Operation not supported"),
        }
    }
}

impl From<HwError> for ClockError {
    fn from(_: HwError) -> Self {
        ClockError::ServiceError
    }
}

/// Result type for clock control operations
pub type ClockResult<T> = Result<T, ClockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_values() {
        assert_eq!(ClockError::Invalid.errno(), -22);
        assert_eq!(ClockError::Overflow.errno(), -11);
        assert_eq!(ClockError::ServiceError.errno(), -5);
        assert_eq!(ClockError::WouldBlock.errno(), -11);
        assert_eq!(ClockError::Timeout.errno(), -116);
        assert_eq!(ClockError::NotSupported.errno(), -134);
    }

    #[test]
    fn test_only_service_error_is_terminal() {
        for err in ClockError::ALL {
            assert_eq!(err.is_terminal(), err == ClockError::ServiceError);
            assert_eq!(err.is_recoverable(), !err.is_terminal());
        }
    }

    #[test]
    fn test_index_round_trip() {
        for err in ClockError::ALL {
            assert_eq!(ClockError::from_index(err.index()), Some(err));
        }
        assert_eq!(ClockError::from_index(6), None);
    }

    #[test]
    fn test_hw_error_maps_to_service_error() {
        assert_eq!(
            ClockError::from(HwError::StartFailed),
            ClockError::ServiceError
        );
    }
}
