//! Configuration validation.
//!
//! Provides the [`Validate`] trait implemented by every configuration table
//! and a few helpers for the numeric range checks the engine tables need.

use thiserror::Error;

use crate::config::{Config, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Collapse a list of errors into a single result.
    pub fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// Require a finite number.
pub fn ensure_finite(field: &str, value: f64) -> ValidationResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::invalid(field, format!("must be finite, got {value}")))
    }
}

/// Require a finite number inside `[min, max]`.
pub fn ensure_in_range(field: &str, value: f64, min: f64, max: f64) -> ValidationResult<()> {
    ensure_finite(field, value)?;
    if value < min || value > max {
        return Err(ValidationError::invalid(
            field,
            format!("must be between {min} and {max}, got {value}"),
        ));
    }
    Ok(())
}

/// Require a finite, non-negative number.
pub fn ensure_non_negative(field: &str, value: f64) -> ValidationResult<()> {
    ensure_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::invalid(
            field,
            format!("must be non-negative, got {value}"),
        ));
    }
    Ok(())
}

impl Config {
    /// Validate the infrastructure part of the configuration.
    ///
    /// The engine section is validated by the engine crate once typed.
    pub fn validate(&self) -> ValidationResult<()> {
        self.observability.validate()
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "invalid".into();
        let result = config.validate();
        assert!(result.is_err());
        if let Err(ValidationError::InvalidValue { field, .. }) = result {
            assert_eq!(field, "observability.log_level");
        }
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.observability.log_format = "xml".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test_case(0.5, true ; "inside")]
    #[test_case(0.0, true ; "lower edge")]
    #[test_case(1.0, true ; "upper edge")]
    #[test_case(1.5, false ; "above")]
    #[test_case(f64::NAN, false ; "nan")]
    fn test_ensure_in_range(value: f64, ok: bool) {
        assert_eq!(ensure_in_range("x", value, 0.0, 1.0).is_ok(), ok);
    }

    #[test]
    fn test_collect_errors() {
        assert!(ValidationError::collect(vec![]).is_ok());
        let single = ValidationError::collect(vec![ValidationError::invalid("a", "b")]);
        assert!(matches!(single, Err(ValidationError::InvalidValue { .. })));
        let many = ValidationError::collect(vec![
            ValidationError::invalid("a", "b"),
            ValidationError::invalid("c", "d"),
        ]);
        assert!(matches!(many, Err(ValidationError::Multiple(ref v)) if v.len() == 2));
    }
}
