//! Domain errors for the scoring and optimization pipeline.

use thiserror::Error;

/// Result type alias using the engine error type.
pub type Result<T> = std::result::Result<T, MacroError>;

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// Indicator, scenario, sector and asset scoring
    Scoring,
    /// Covariance estimation and portfolio optimization
    Optimization,
}

/// Errors raised by the scoring and optimization core.
///
/// Non-convergence is not an error: it is reported through
/// [`crate::portfolio::SolveStatus`] alongside the best iterate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MacroError {
    /// Missing or invalid indicator or price input
    #[error("Data unavailable for {subject}: {reason}")]
    DataUnavailable { subject: String, reason: String },

    /// Sector is not part of the configured taxonomy
    #[error("Unknown sector: {0}")]
    UnknownSector(String),

    /// Too few return observations for covariance estimation
    #[error("Insufficient data: {observations} observations, need at least {required}")]
    InsufficientData { observations: usize, required: usize },

    /// Target return outside the achievable range
    #[error("Infeasible target return {target:.6}: achievable range is [{min:.6}, {max:.6}]")]
    InfeasibleTarget { target: f64, min: f64, max: f64 },

    /// Malformed covariance input
    #[error("Invalid covariance: {0}")]
    InvalidCovariance(String),

    /// Constraint set admits no fully invested portfolio
    #[error("Invalid constraints: {0}")]
    InvalidConstraints(String),

    /// Malformed request (dimension mismatch, non-finite numbers)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MacroError {
    /// Build a [`MacroError::DataUnavailable`].
    pub fn data_unavailable(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Stage of the pipeline the error comes from.
    pub const fn stage(&self) -> ErrorStage {
        match self {
            Self::DataUnavailable { .. } | Self::UnknownSector(_) => ErrorStage::Scoring,
            Self::InsufficientData { .. }
            | Self::InfeasibleTarget { .. }
            | Self::InvalidCovariance(_)
            | Self::InvalidConstraints(_)
            | Self::InvalidInput(_) => ErrorStage::Optimization,
        }
    }

    /// Check if a neutral default or omission can recover from this error.
    ///
    /// Only missing data qualifies; everything else needs a config or input fix.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::DataUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_stages() {
        assert_eq!(
            MacroError::data_unavailable("inflation", "NaN").stage(),
            ErrorStage::Scoring
        );
        assert_eq!(
            MacroError::UnknownSector("Shipping".into()).stage(),
            ErrorStage::Scoring
        );
        assert_eq!(
            MacroError::InsufficientData {
                observations: 1,
                required: 2
            }
            .stage(),
            ErrorStage::Optimization
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(MacroError::data_unavailable("PETR4", "no price").is_recoverable());
        assert!(!MacroError::UnknownSector("X".into()).is_recoverable());
        assert!(!MacroError::InvalidCovariance("diag".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = MacroError::InfeasibleTarget {
            target: 0.5,
            min: 0.05,
            max: 0.2,
        };
        let msg = err.to_string();
        assert!(msg.contains("0.500000"));
        assert!(msg.contains("[0.050000, 0.200000]"));
    }
}
