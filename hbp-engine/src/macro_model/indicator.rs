//! Single-indicator scoring.
//!
//! An indicator scores 10 at its ideal value, holds 10 inside the tolerance
//! band, then decays linearly to 0 at the band's maximum deviation. The
//! lower and upper bands are configured separately so that, for example,
//! inflation above target can be penalized more steeply than below it.

use hbp_common::validation::{ensure_finite, ensure_non_negative, Validate, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{MacroError, Result};

/// Highest score an indicator can reach.
pub const MAX_SCORE: f64 = 10.0;

/// One side of an indicator's tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBand {
    /// Distance from the ideal that still scores 10
    pub tolerance: f64,
    /// Distance from the ideal at which the score reaches 0
    pub max_deviation: f64,
}

impl ToleranceBand {
    pub const fn new(tolerance: f64, max_deviation: f64) -> Self {
        Self {
            tolerance,
            max_deviation,
        }
    }

    /// Linear decay with a flat top; never leaves `[0, MAX_SCORE]`.
    fn score(&self, distance: f64) -> f64 {
        if distance <= self.tolerance {
            return MAX_SCORE;
        }
        if distance >= self.max_deviation {
            return 0.0;
        }
        let span = self.max_deviation - self.tolerance;
        (MAX_SCORE * (self.max_deviation - distance) / span).clamp(0.0, MAX_SCORE)
    }

    fn validate_as(&self, field: &str) -> ValidationResult<()> {
        ensure_non_negative(&format!("{field}.tolerance"), self.tolerance)?;
        ensure_finite(&format!("{field}.max_deviation"), self.max_deviation)?;
        if self.max_deviation <= self.tolerance {
            return Err(ValidationError::invalid(
                format!("{field}.max_deviation"),
                format!(
                    "must exceed tolerance ({} <= {})",
                    self.max_deviation, self.tolerance
                ),
            ));
        }
        Ok(())
    }
}

/// Where an indicator's ideal value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdealSource {
    /// Use the configured `ideal`
    #[default]
    Fixed,
    /// Mean of the last `window` observations of the supplied series
    TrailingMean { window: usize },
}

/// Static scoring parameters for one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    /// Target value
    pub ideal: f64,
    /// Band applied when the current value is below the ideal
    pub lower: ToleranceBand,
    /// Band applied when the current value is above the ideal
    pub upper: ToleranceBand,
    /// Weight in the macro score (renormalized over indicators present)
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub ideal_source: IdealSource,
}

fn default_weight() -> f64 {
    1.0
}

impl IndicatorParams {
    /// Same band on both sides of the ideal.
    pub fn symmetric(ideal: f64, tolerance: f64, max_deviation: f64) -> Self {
        let band = ToleranceBand::new(tolerance, max_deviation);
        Self {
            ideal,
            lower: band,
            upper: band,
            weight: default_weight(),
            ideal_source: IdealSource::Fixed,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_ideal_source(mut self, source: IdealSource) -> Self {
        self.ideal_source = source;
        self
    }

    /// Ideal value for this evaluation, given the indicator's history.
    pub fn resolve_ideal(&self, name: &str, series: &[f64]) -> f64 {
        match self.ideal_source {
            IdealSource::Fixed => self.ideal,
            IdealSource::TrailingMean { window } => {
                if window == 0 || series.len() < window {
                    tracing::warn!(
                        indicator = name,
                        window,
                        observations = series.len(),
                        "History shorter than trailing window, using configured ideal"
                    );
                    return self.ideal;
                }
                let mean = series[series.len() - window..].iter().mean();
                if mean.is_finite() {
                    mean
                } else {
                    tracing::warn!(indicator = name, "Trailing mean not finite, using configured ideal");
                    self.ideal
                }
            }
        }
    }

    /// Build the indicator for one evaluation cycle from an observation.
    pub fn resolve(&self, observation: &IndicatorObservation) -> Indicator {
        Indicator {
            name: observation.name.clone(),
            current_value: observation.current(),
            ideal_value: self.resolve_ideal(&observation.name, &observation.series),
            lower: self.lower,
            upper: self.upper,
        }
    }

    pub fn validate_as(&self, field: &str) -> ValidationResult<()> {
        ensure_finite(&format!("{field}.ideal"), self.ideal)?;
        self.lower.validate_as(&format!("{field}.lower"))?;
        self.upper.validate_as(&format!("{field}.upper"))?;
        ensure_non_negative(&format!("{field}.weight"), self.weight)?;
        if let IdealSource::TrailingMean { window: 0 } = self.ideal_source {
            return Err(ValidationError::invalid(
                format!("{field}.ideal_source.window"),
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Validate for IndicatorParams {
    fn validate(&self) -> ValidationResult<()> {
        self.validate_as("indicator")
    }
}

/// Time series for one indicator as supplied by the macro data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorObservation {
    pub name: String,
    /// Ordered observations, the last one is the current value
    #[serde(default)]
    pub series: Vec<f64>,
}

impl IndicatorObservation {
    pub fn new(name: impl Into<String>, series: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            series,
        }
    }

    /// Observation with just a current value.
    pub fn current_only(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, vec![value])
    }

    pub fn current(&self) -> Option<f64> {
        self.series.last().copied()
    }
}

/// An indicator ready to be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub name: String,
    pub current_value: Option<f64>,
    pub ideal_value: f64,
    pub lower: ToleranceBand,
    pub upper: ToleranceBand,
}

impl Indicator {
    pub fn new(name: impl Into<String>, current_value: f64, params: &IndicatorParams) -> Self {
        Self {
            name: name.into(),
            current_value: Some(current_value),
            ideal_value: params.ideal,
            lower: params.lower,
            upper: params.upper,
        }
    }
}

/// Maps an indicator's current value to a score in `[0, 10]`.
pub struct IndicatorScorer;

impl IndicatorScorer {
    /// Score one indicator.
    ///
    /// Fails with `DataUnavailable` when the current value is missing or not finite.
    pub fn score(indicator: &Indicator) -> Result<f64> {
        let current = match indicator.current_value {
            Some(v) if v.is_finite() => v,
            Some(v) => {
                return Err(MacroError::data_unavailable(
                    &indicator.name,
                    format!("current value is not finite ({v})"),
                ))
            }
            None => {
                return Err(MacroError::data_unavailable(
                    &indicator.name,
                    "no current value",
                ))
            }
        };
        if !indicator.ideal_value.is_finite() {
            return Err(MacroError::data_unavailable(
                &indicator.name,
                "ideal value is not finite",
            ));
        }

        let deviation = current - indicator.ideal_value;
        let band = if deviation < 0.0 {
            &indicator.lower
        } else {
            &indicator.upper
        };
        Ok(band.score(deviation.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inflation() -> IndicatorParams {
        IndicatorParams {
            ideal: 3.0,
            lower: ToleranceBand::new(1.5, 4.5),
            upper: ToleranceBand::new(1.5, 3.0),
            weight: 1.0,
            ideal_source: IdealSource::Fixed,
        }
    }

    fn score(params: &IndicatorParams, value: f64) -> f64 {
        IndicatorScorer::score(&Indicator::new("inflation", value, params)).unwrap()
    }

    #[test]
    fn test_ideal_scores_ten() {
        assert_eq!(score(&inflation(), 3.0), 10.0);
    }

    #[test]
    fn test_within_tolerance_scores_ten() {
        assert_eq!(score(&inflation(), 4.5), 10.0);
        assert_eq!(score(&inflation(), 1.5), 10.0);
    }

    #[test]
    fn test_asymmetric_decay() {
        // Above: 1.5 past tolerance with a 1.5 wide slope → 0
        assert_eq!(score(&inflation(), 6.0), 0.0);
        // Below: 1.5 past tolerance with a 3.0 wide slope → 5
        assert!((score(&inflation(), 0.0) - 5.0).abs() < 1e-12);
        // Same distance, steeper penalty above target
        assert!(score(&inflation(), 5.25) < score(&inflation(), 0.75));
    }

    #[test]
    fn test_clamps_far_outside() {
        assert_eq!(score(&inflation(), 1e9), 0.0);
        assert_eq!(score(&inflation(), -1e9), 0.0);
    }

    #[test]
    fn test_missing_value_is_data_unavailable() {
        let mut indicator = Indicator::new("inflation", 3.0, &inflation());
        indicator.current_value = None;
        assert!(matches!(
            IndicatorScorer::score(&indicator),
            Err(MacroError::DataUnavailable { .. })
        ));

        indicator.current_value = Some(f64::NAN);
        assert!(matches!(
            IndicatorScorer::score(&indicator),
            Err(MacroError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn test_zero_tolerance_band() {
        let fx = IndicatorParams::symmetric(5.30, 0.0, 5.0);
        assert_eq!(score(&fx, 5.30), 10.0);
        assert!((score(&fx, 5.80) - 9.0).abs() < 1e-9);
        assert!((score(&fx, 6.30) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_mean_ideal() {
        let params = IndicatorParams::symmetric(80.0, 0.0, 50.0)
            .with_ideal_source(IdealSource::TrailingMean { window: 3 });
        let obs = IndicatorObservation::new("oil", vec![10.0, 70.0, 80.0, 90.0]);
        let indicator = params.resolve(&obs);
        assert_eq!(indicator.current_value, Some(90.0));
        assert!((indicator.ideal_value - 80.0).abs() < 1e-12);
    }

    #[test]
    fn test_trailing_mean_short_history_falls_back() {
        let params = IndicatorParams::symmetric(80.0, 0.0, 50.0)
            .with_ideal_source(IdealSource::TrailingMean { window: 12 });
        let obs = IndicatorObservation::current_only("oil", 95.0);
        assert_eq!(params.resolve(&obs).ideal_value, 80.0);
    }

    #[test]
    fn test_empty_series_has_no_current() {
        let obs = IndicatorObservation::new("gdp_growth", vec![]);
        let indicator = IndicatorParams::symmetric(3.0, 0.0, 3.0).resolve(&obs);
        assert!(IndicatorScorer::score(&indicator).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(inflation().validate().is_ok());
        let bad = IndicatorParams::symmetric(3.0, 2.0, 1.0);
        assert!(bad.validate().is_err());
        let bad_window = IndicatorParams::symmetric(3.0, 0.0, 1.0)
            .with_ideal_source(IdealSource::TrailingMean { window: 0 });
        assert!(bad_window.validate().is_err());
        let negative_weight = IndicatorParams::symmetric(3.0, 0.0, 1.0).with_weight(-1.0);
        assert!(negative_weight.validate().is_err());
    }

    #[test]
    fn test_ideal_source_serde() {
        let json = r#"{ "ideal": 13.0, "lower": { "tolerance": 0.0, "max_deviation": 6.67 },
            "upper": { "tolerance": 0.0, "max_deviation": 6.67 },
            "ideal_source": { "kind": "trailing_mean", "window": 12 } }"#;
        let params: IndicatorParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.ideal_source, IdealSource::TrailingMean { window: 12 });
        assert_eq!(params.weight, 1.0);
    }

    proptest! {
        #[test]
        fn prop_score_bounded(value in -1e6f64..1e6) {
            let s = score(&inflation(), value);
            prop_assert!((0.0..=10.0).contains(&s));
        }

        #[test]
        fn prop_non_increasing_in_distance(d1 in 0.0f64..10.0, d2 in 0.0f64..10.0) {
            let (near, far) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
            let params = inflation();
            prop_assert!(score(&params, 3.0 + near) >= score(&params, 3.0 + far));
            prop_assert!(score(&params, 3.0 - near) >= score(&params, 3.0 - far));
        }
    }
}
