//! Macroeconomic scoring.
//!
//! Turns raw indicator observations into a [`MacroSnapshot`] (per-indicator
//! scores, aggregate macro score, scenario) and the snapshot into per-sector
//! favorability.

pub mod indicator;
pub mod scenario;
pub mod sector;

pub use indicator::{
    IdealSource, Indicator, IndicatorObservation, IndicatorParams, IndicatorScorer, ToleranceBand,
    MAX_SCORE,
};
pub use scenario::{ExcludedIndicator, MacroSnapshot, Scenario, ScenarioClassifier, ScenarioThresholds};
pub use sector::{SectorConfig, SectorFavorability, SectorFavorabilityModel, UNKNOWN_SECTOR};

use std::collections::BTreeMap;

/// Window of the trailing mean used as the ideal commodity price (monthly data).
pub const COMMODITY_IDEAL_WINDOW: usize = 12;

/// Default indicator table.
///
/// Inflation above target and rates above neutral decay twice as fast as
/// deviations on the other side; commodities are judged against their own
/// trailing mean and carry small weights.
pub fn default_indicators() -> BTreeMap<String, IndicatorParams> {
    let band = ToleranceBand::new;
    let commodity = |ideal: f64, max_deviation: f64, weight: f64| {
        IndicatorParams::symmetric(ideal, 0.0, max_deviation)
            .with_weight(weight)
            .with_ideal_source(IdealSource::TrailingMean {
                window: COMMODITY_IDEAL_WINDOW,
            })
    };

    let mut table = BTreeMap::new();
    table.insert(
        "inflation".to_string(),
        IndicatorParams {
            ideal: 3.0,
            lower: band(1.5, 4.5),
            upper: band(1.5, 3.0),
            weight: 1.0,
            ideal_source: IdealSource::Fixed,
        },
    );
    table.insert(
        "policy_rate".to_string(),
        IndicatorParams {
            ideal: 7.0,
            lower: band(0.5, 5.0),
            upper: band(0.5, 2.5),
            weight: 1.0,
            ideal_source: IdealSource::Fixed,
        },
    );
    table.insert("fx_rate".to_string(), IndicatorParams::symmetric(5.30, 0.0, 5.0));
    table.insert(
        "gdp_growth".to_string(),
        IndicatorParams {
            ideal: 3.0,
            lower: band(0.0, 3.67),
            upper: band(10.0, 20.0),
            weight: 1.0,
            ideal_source: IdealSource::Fixed,
        },
    );
    table.insert("soybean".to_string(), commodity(13.0, 6.67, 0.05));
    table.insert("corn".to_string(), commodity(5.5, 5.0, 0.05));
    table.insert("iron_ore".to_string(), commodity(100.0, 100.0, 0.1));
    table.insert("oil".to_string(), commodity(80.0, 50.0, 0.1));
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use hbp_common::validation::Validate;

    #[test]
    fn test_default_indicators_valid() {
        let table = default_indicators();
        assert_eq!(table.len(), 8);
        for (name, params) in &table {
            assert!(params.validate_as(name).is_ok(), "{name}");
        }
        assert!(table["inflation"].validate().is_ok());
    }

    #[test]
    fn test_commodities_use_trailing_mean() {
        let table = default_indicators();
        for name in ["soybean", "corn", "iron_ore", "oil"] {
            assert_eq!(
                table[name].ideal_source,
                IdealSource::TrailingMean { window: 12 }
            );
        }
        assert_eq!(table["inflation"].ideal_source, IdealSource::Fixed);
    }

    #[test]
    fn test_inflation_above_target_penalized_harder() {
        let table = default_indicators();
        let above = IndicatorScorer::score(&Indicator::new("inflation", 5.5, &table["inflation"])).unwrap();
        let below = IndicatorScorer::score(&Indicator::new("inflation", 0.5, &table["inflation"])).unwrap();
        assert!(above < below);
    }
}
