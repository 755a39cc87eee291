//! Macro score aggregation and scenario classification.

use std::collections::{BTreeMap, BTreeSet};

use hbp_common::validation::{ensure_in_range, Validate, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};

use super::indicator::{IndicatorObservation, IndicatorParams, IndicatorScorer, MAX_SCORE};
use crate::error::{MacroError, Result};

/// Macroeconomic regime, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    StrongContraction,
    ModerateContraction,
    Stable,
    ModerateExpansion,
    StrongExpansion,
}

impl Scenario {
    /// All scenarios, worst first.
    pub const ALL: [Scenario; 5] = [
        Scenario::StrongContraction,
        Scenario::ModerateContraction,
        Scenario::Stable,
        Scenario::ModerateExpansion,
        Scenario::StrongExpansion,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Scenario::StrongContraction => "Strong Contraction",
            Scenario::ModerateContraction => "Moderate Contraction",
            Scenario::Stable => "Stable",
            Scenario::ModerateExpansion => "Moderate Expansion",
            Scenario::StrongExpansion => "Strong Expansion",
        }
    }

    pub fn is_expansion(&self) -> bool {
        matches!(self, Scenario::ModerateExpansion | Scenario::StrongExpansion)
    }

    pub fn is_contraction(&self) -> bool {
        matches!(self, Scenario::ModerateContraction | Scenario::StrongContraction)
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Lower bounds of the four upper scenario bands.
///
/// Bands are `[lower, next_lower)`; a score equal to a threshold belongs to
/// the better scenario, and 10 belongs to Strong Expansion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioThresholds {
    #[serde(default = "default_moderate_contraction")]
    pub moderate_contraction: f64,
    #[serde(default = "default_stable")]
    pub stable: f64,
    #[serde(default = "default_moderate_expansion")]
    pub moderate_expansion: f64,
    #[serde(default = "default_strong_expansion")]
    pub strong_expansion: f64,
}

fn default_moderate_contraction() -> f64 {
    3.0
}

fn default_stable() -> f64 {
    5.5
}

fn default_moderate_expansion() -> f64 {
    7.0
}

fn default_strong_expansion() -> f64 {
    8.5
}

impl Default for ScenarioThresholds {
    fn default() -> Self {
        Self {
            moderate_contraction: default_moderate_contraction(),
            stable: default_stable(),
            moderate_expansion: default_moderate_expansion(),
            strong_expansion: default_strong_expansion(),
        }
    }
}

impl ScenarioThresholds {
    /// `(lower_bound, scenario)` pairs, best first.
    pub fn bands(&self) -> [(f64, Scenario); 5] {
        [
            (self.strong_expansion, Scenario::StrongExpansion),
            (self.moderate_expansion, Scenario::ModerateExpansion),
            (self.stable, Scenario::Stable),
            (self.moderate_contraction, Scenario::ModerateContraction),
            (0.0, Scenario::StrongContraction),
        ]
    }

    /// Scenario for a macro score in `[0, 10]`.
    pub fn scenario_for(&self, macro_score: f64) -> Result<Scenario> {
        if !(0.0..=MAX_SCORE).contains(&macro_score) {
            return Err(MacroError::InvalidInput(format!(
                "macro score {macro_score} outside [0, {MAX_SCORE}]"
            )));
        }
        let scenario = self
            .bands()
            .iter()
            .find(|(lower, _)| macro_score >= *lower)
            .map(|(_, scenario)| *scenario)
            .unwrap_or(Scenario::StrongContraction);
        Ok(scenario)
    }
}

impl Validate for ScenarioThresholds {
    fn validate(&self) -> ValidationResult<()> {
        let ordered = [
            ("scenarios.moderate_contraction", self.moderate_contraction),
            ("scenarios.stable", self.stable),
            ("scenarios.moderate_expansion", self.moderate_expansion),
            ("scenarios.strong_expansion", self.strong_expansion),
        ];
        for (field, value) in ordered {
            ensure_in_range(field, value, 0.0, MAX_SCORE)?;
        }
        if self.moderate_contraction <= 0.0 || self.strong_expansion >= MAX_SCORE {
            return Err(ValidationError::invalid(
                "scenarios",
                "thresholds must lie strictly inside (0, 10)",
            ));
        }
        for pair in ordered.windows(2) {
            if pair[1].1 <= pair[0].1 {
                return Err(ValidationError::invalid(
                    pair[1].0,
                    format!("must be greater than {} ({})", pair[0].0, pair[0].1),
                ));
            }
        }
        Ok(())
    }
}

/// Indicator left out of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedIndicator {
    pub name: String,
    pub reason: String,
}

/// Scores of one evaluation run plus the aggregate and its scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroSnapshot {
    /// Indicator name → score in `[0, 10]`
    pub scores: BTreeMap<String, f64>,
    /// Weighted mean of the indicator scores
    pub macro_score: f64,
    pub scenario: Scenario,
    /// Indicators omitted from the mean
    #[serde(default)]
    pub excluded: Vec<ExcludedIndicator>,
}

impl MacroSnapshot {
    pub fn score(&self, indicator: &str) -> Option<f64> {
        self.scores.get(indicator).copied()
    }

    /// True when some indicators were left out.
    pub fn is_partial(&self) -> bool {
        !self.excluded.is_empty()
    }
}

/// Aggregates indicator scores into a macro score and scenario.
#[derive(Debug, Clone, Default)]
pub struct ScenarioClassifier {
    thresholds: ScenarioThresholds,
    weights: BTreeMap<String, f64>,
}

impl ScenarioClassifier {
    pub fn new(thresholds: ScenarioThresholds) -> Self {
        Self {
            thresholds,
            weights: BTreeMap::new(),
        }
    }

    /// Use per-indicator weights; unlisted indicators weigh 1.0.
    pub fn with_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    /// Classifier configured from an indicator table.
    pub fn from_indicators(
        thresholds: ScenarioThresholds,
        indicators: &BTreeMap<String, IndicatorParams>,
    ) -> Self {
        let weights = indicators
            .iter()
            .map(|(name, params)| (name.clone(), params.weight))
            .collect();
        Self::new(thresholds).with_weights(weights)
    }

    pub fn thresholds(&self) -> &ScenarioThresholds {
        &self.thresholds
    }

    fn weight_of(&self, indicator: &str) -> f64 {
        self.weights.get(indicator).copied().unwrap_or(1.0)
    }

    /// Weighted mean of the scores present, weights renormalized to sum to 1.
    pub fn macro_score(&self, scores: &BTreeMap<String, f64>) -> Result<f64> {
        if scores.is_empty() {
            return Err(MacroError::data_unavailable(
                "macro score",
                "no indicator scores available",
            ));
        }

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (name, score) in scores {
            if !(0.0..=MAX_SCORE).contains(score) {
                return Err(MacroError::InvalidInput(format!(
                    "score for {name} is {score}, expected [0, {MAX_SCORE}]"
                )));
            }
            let weight = self.weight_of(name);
            weighted += weight * score;
            total_weight += weight;
        }

        if total_weight <= 0.0 {
            return Err(MacroError::InvalidInput(
                "indicator weights of the scores present sum to zero".into(),
            ));
        }

        Ok((weighted / total_weight).clamp(0.0, MAX_SCORE))
    }

    /// Macro score and scenario for a set of indicator scores.
    pub fn classify(&self, scores: &BTreeMap<String, f64>) -> Result<(f64, Scenario)> {
        let macro_score = self.macro_score(scores)?;
        let scenario = self.thresholds.scenario_for(macro_score)?;
        Ok((macro_score, scenario))
    }

    /// Score every observation and build the snapshot.
    ///
    /// Observations with no configured parameters or no usable current value
    /// are excluded from the mean and listed in `excluded`. Two observations
    /// of the same indicator are rejected.
    pub fn snapshot(
        &self,
        indicators: &BTreeMap<String, IndicatorParams>,
        observations: &[IndicatorObservation],
    ) -> Result<MacroSnapshot> {
        let mut scores = BTreeMap::new();
        let mut excluded = Vec::new();
        let mut seen = BTreeSet::new();

        for observation in observations {
            if !seen.insert(observation.name.as_str()) {
                return Err(MacroError::InvalidInput(format!(
                    "duplicate indicator {}",
                    observation.name
                )));
            }
            let Some(params) = indicators.get(&observation.name) else {
                tracing::warn!(indicator = %observation.name, "Indicator not configured, excluding");
                excluded.push(ExcludedIndicator {
                    name: observation.name.clone(),
                    reason: "no parameters configured".into(),
                });
                continue;
            };

            match IndicatorScorer::score(&params.resolve(observation)) {
                Ok(score) => {
                    tracing::debug!(indicator = %observation.name, score, "Indicator scored");
                    scores.insert(observation.name.clone(), score);
                }
                Err(e) => {
                    tracing::warn!(indicator = %observation.name, error = %e, "Excluding indicator");
                    excluded.push(ExcludedIndicator {
                        name: observation.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let (macro_score, scenario) = self.classify(&scores)?;
        tracing::info!(
            macro_score,
            scenario = %scenario,
            indicators = scores.len(),
            excluded = excluded.len(),
            "Macro snapshot built"
        );

        Ok(MacroSnapshot {
            scores,
            macro_score,
            scenario,
            excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test_case(0.0, Scenario::StrongContraction ; "zero")]
    #[test_case(2.999, Scenario::StrongContraction ; "below first threshold")]
    #[test_case(3.0, Scenario::ModerateContraction ; "first threshold goes up")]
    #[test_case(5.5, Scenario::Stable ; "stable threshold")]
    #[test_case(6.99, Scenario::Stable ; "just below moderate expansion")]
    #[test_case(7.0, Scenario::ModerateExpansion ; "moderate expansion threshold")]
    #[test_case(8.5, Scenario::StrongExpansion ; "strong expansion threshold")]
    #[test_case(10.0, Scenario::StrongExpansion ; "ten")]
    fn test_scenario_bands(score: f64, expected: Scenario) {
        let thresholds = ScenarioThresholds::default();
        assert_eq!(thresholds.scenario_for(score).unwrap(), expected);
    }

    #[test]
    fn test_bands_partition_range() {
        let thresholds = ScenarioThresholds::default();
        let mut previous = Scenario::StrongContraction;
        let mut reached = BTreeSet::new();
        for step in 0..=1000 {
            let score = step as f64 / 100.0;
            let scenario = thresholds.scenario_for(score).unwrap();
            // Monotone in the score, exactly one band per value
            assert!(scenario >= previous);
            let matching = thresholds
                .bands()
                .iter()
                .enumerate()
                .filter(|(i, (lower, _))| {
                    let upper = if *i == 0 {
                        f64::INFINITY
                    } else {
                        thresholds.bands()[i - 1].0
                    };
                    score >= *lower && score < upper
                })
                .count();
            assert_eq!(matching, 1, "score {score}");
            reached.insert(scenario);
            previous = scenario;
        }
        assert_eq!(reached.into_iter().collect::<Vec<_>>(), Scenario::ALL.to_vec());

        let mut banded: Vec<_> = thresholds.bands().iter().map(|(_, s)| *s).collect();
        banded.reverse();
        assert_eq!(banded, Scenario::ALL.to_vec());
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let thresholds = ScenarioThresholds::default();
        assert!(thresholds.scenario_for(-0.1).is_err());
        assert!(thresholds.scenario_for(10.1).is_err());
        assert!(thresholds.scenario_for(f64::NAN).is_err());
    }

    #[test]
    fn test_simple_mean() {
        let classifier = ScenarioClassifier::default();
        let (score, scenario) = classifier
            .classify(&scores(&[("inflation", 10.0), ("policy_rate", 5.0)]))
            .unwrap();
        assert!((score - 7.5).abs() < 1e-12);
        assert_eq!(scenario, Scenario::ModerateExpansion);
    }

    #[test]
    fn test_weights_renormalized_over_present() {
        let weights = scores(&[("inflation", 1.0), ("policy_rate", 1.0), ("oil", 0.1)]);
        let classifier = ScenarioClassifier::default().with_weights(weights);

        let without_oil = classifier
            .macro_score(&scores(&[("inflation", 10.0), ("policy_rate", 4.0)]))
            .unwrap();
        assert!((without_oil - 7.0).abs() < 1e-12);

        let with_oil = classifier
            .macro_score(&scores(&[("inflation", 10.0), ("policy_rate", 4.0), ("oil", 0.0)]))
            .unwrap();
        assert!((with_oil - 14.0 / 2.1).abs() < 1e-12);
    }

    #[test]
    fn test_empty_scores() {
        let classifier = ScenarioClassifier::default();
        assert!(matches!(
            classifier.classify(&BTreeMap::new()),
            Err(MacroError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn test_deterministic() {
        let classifier = ScenarioClassifier::default();
        let input = scores(&[("a", 3.3), ("b", 8.8), ("c", 6.1)]);
        let first = classifier.classify(&input).unwrap();
        for _ in 0..10 {
            assert_eq!(classifier.classify(&input).unwrap(), first);
        }
    }

    #[test]
    fn test_snapshot_excludes_missing() {
        let mut table = BTreeMap::new();
        table.insert("inflation".to_string(), IndicatorParams::symmetric(3.0, 1.5, 3.0));
        table.insert("policy_rate".to_string(), IndicatorParams::symmetric(7.0, 0.5, 2.5));

        let observations = vec![
            IndicatorObservation::current_only("inflation", 3.0),
            IndicatorObservation::current_only("policy_rate", f64::NAN),
            IndicatorObservation::current_only("unemployment", 8.0),
        ];

        let snapshot = ScenarioClassifier::default()
            .snapshot(&table, &observations)
            .unwrap();
        assert_eq!(snapshot.scores.len(), 1);
        assert_eq!(snapshot.macro_score, 10.0);
        assert_eq!(snapshot.scenario, Scenario::StrongExpansion);
        assert!(snapshot.is_partial());
        let names: Vec<_> = snapshot.excluded.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["policy_rate", "unemployment"]);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(ScenarioThresholds::default().validate().is_ok());
        let overlapping = ScenarioThresholds {
            stable: 7.5,
            ..Default::default()
        };
        assert!(overlapping.validate().is_err());
        let at_edge = ScenarioThresholds {
            strong_expansion: 10.0,
            ..Default::default()
        };
        assert!(at_edge.validate().is_err());
    }

    #[test]
    fn test_scenario_ordering_and_labels() {
        assert!(Scenario::StrongExpansion > Scenario::Stable);
        assert!(Scenario::StrongContraction < Scenario::ModerateContraction);
        assert_eq!(Scenario::ModerateExpansion.to_string(), "Moderate Expansion");
        assert!(Scenario::StrongExpansion.is_expansion());
        assert!(Scenario::ModerateContraction.is_contraction());
        assert!(!Scenario::Stable.is_expansion());
    }

    #[test]
    fn test_duplicate_indicator_rejected() {
        let mut table = BTreeMap::new();
        table.insert("inflation".to_string(), IndicatorParams::symmetric(3.0, 1.5, 3.0));
        let observations = vec![
            IndicatorObservation::current_only("inflation", 3.0),
            IndicatorObservation::current_only("inflation", 9.0),
        ];
        let result = ScenarioClassifier::default().snapshot(&table, &observations);
        assert!(matches!(result, Err(MacroError::InvalidInput(_))));
    }

    proptest! {
        #[test]
        fn prop_scenario_monotone_in_score(a in 0.0f64..=10.0, b in 0.0f64..=10.0) {
            let thresholds = ScenarioThresholds::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let lower = thresholds.scenario_for(lo).unwrap();
            let upper = thresholds.scenario_for(hi).unwrap();
            prop_assert!(lower <= upper);

            // The assigned band contains the score
            let (bound, _) = thresholds
                .bands()
                .into_iter()
                .find(|(_, s)| *s == upper)
                .unwrap();
            prop_assert!(hi >= bound);
        }

        #[test]
        fn prop_macro_score_within_input_range(
            values in prop::collection::vec(0.0f64..=10.0, 1..8),
        ) {
            let input: BTreeMap<String, f64> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("i{i}"), *v))
                .collect();
            let score = ScenarioClassifier::default().macro_score(&input).unwrap();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(score >= min - 1e-12 && score <= max + 1e-12);
        }
    }
}
