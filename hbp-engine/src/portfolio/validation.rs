//! Post-optimization portfolio checks.

use hbp_common::validation::{ensure_in_range, Validate, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};

use super::optimizer::PortfolioWeights;

/// Diversification and concentration thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Fewest significant holdings before warning
    #[serde(default = "default_min_diversification")]
    pub min_diversification: usize,
    /// Weight above which a holding counts as significant
    #[serde(default = "default_significant_weight")]
    pub significant_weight: f64,
    /// Largest single weight before warning
    #[serde(default = "default_max_concentration")]
    pub max_concentration: f64,
    #[serde(default = "default_sum_tolerance")]
    pub sum_tolerance: f64,
}

fn default_min_diversification() -> usize {
    5
}

fn default_significant_weight() -> f64 {
    0.01
}

fn default_max_concentration() -> f64 {
    0.40
}

fn default_sum_tolerance() -> f64 {
    1e-3
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_diversification: default_min_diversification(),
            significant_weight: default_significant_weight(),
            max_concentration: default_max_concentration(),
            sum_tolerance: default_sum_tolerance(),
        }
    }
}

impl Validate for ValidationPolicy {
    fn validate(&self) -> ValidationResult<()> {
        ensure_in_range("validation.significant_weight", self.significant_weight, 0.0, 1.0)?;
        ensure_in_range("validation.max_concentration", self.max_concentration, 0.0, 1.0)?;
        ensure_in_range("validation.sum_tolerance", self.sum_tolerance, 0.0, 0.5)?;
        if self.sum_tolerance == 0.0 {
            return Err(ValidationError::invalid(
                "validation.sum_tolerance",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Outcome of [`ValidationPolicy::check`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioValidation {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationPolicy {
    /// Weight-sum violations are errors; thin diversification and heavy
    /// concentration are warnings.
    pub fn check(&self, weights: &PortfolioWeights) -> PortfolioValidation {
        let mut report = PortfolioValidation {
            is_valid: true,
            ..Default::default()
        };

        let significant = weights
            .iter()
            .filter(|(_, w)| *w > self.significant_weight)
            .count();
        if significant < self.min_diversification {
            report.warnings.push(format!(
                "Low diversification: {significant} holdings above {:.1}%, recommended at least {}",
                self.significant_weight * 100.0,
                self.min_diversification
            ));
        }

        let largest = weights
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)));
        if let Some((ticker, weight)) = largest {
            if weight > self.max_concentration {
                report.warnings.push(format!(
                    "High concentration: {ticker} at {:.1}%, recommended at most {:.1}%",
                    weight * 100.0,
                    self.max_concentration * 100.0
                ));
            }
        }

        let total = weights.total();
        if (total - 1.0).abs() > self.sum_tolerance {
            report
                .errors
                .push(format!("Weights sum to {total:.4}, expected 1.0"));
            report.is_valid = false;
        }

        tracing::debug!(
            valid = report.is_valid,
            warnings = report.warnings.len(),
            errors = report.errors.len(),
            "Portfolio validated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn weights(values: &[f64]) -> PortfolioWeights {
        let tickers: Vec<String> = (0..values.len()).map(|i| format!("T{i}")).collect();
        PortfolioWeights::from_vector(&tickers, &DVector::from_row_slice(values))
    }

    #[test]
    fn test_diversified_portfolio_passes() {
        let report = ValidationPolicy::default().check(&weights(&[0.2; 5]));
        assert!(report.is_valid);
        assert!(report.warnings.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_concentration_and_diversification_warnings() {
        let report = ValidationPolicy::default().check(&weights(&[0.7, 0.3]));
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[1].contains("T0"));
    }

    #[test]
    fn test_bad_sum_is_error() {
        let report = ValidationPolicy::default().check(&weights(&[0.2, 0.2, 0.2, 0.2, 0.1]));
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
    }
}
