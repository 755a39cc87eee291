//! Sector taxonomy, sensitivity table and favorability.
//!
//! A sector's favorability is the sensitivity-weighted average of how far
//! each indicator score sits above or below neutral, rescaled so that every
//! sector lands in `[-scale, scale]` whatever the number of indicators it
//! is sensitive to.

use std::collections::{BTreeMap, BTreeSet};

use hbp_common::validation::{ensure_finite, Validate, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};

use super::indicator::MAX_SCORE;
use super::scenario::{MacroSnapshot, Scenario};
use crate::error::{MacroError, Result};

/// Label used for tickers without a sector mapping.
pub const UNKNOWN_SECTOR: &str = "Unknown";

// ============================================================================
// Configuration
// ============================================================================

/// Static sector configuration, loaded once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorConfig {
    /// Every sector the engine knows about
    #[serde(default = "default_taxonomy")]
    pub taxonomy: BTreeSet<String>,
    /// Ticker → sector
    #[serde(default = "default_tickers")]
    pub tickers: BTreeMap<String, String>,
    /// Sector → indicator → signed sensitivity
    #[serde(default = "default_sensitivity")]
    pub sensitivity: BTreeMap<String, BTreeMap<String, f64>>,
    /// Sectors that historically lead in each scenario
    #[serde(default = "default_favored_by_scenario")]
    pub favored_by_scenario: BTreeMap<Scenario, Vec<String>>,
    /// Favorability is bounded by `[-scale, scale]`
    #[serde(default = "default_scale")]
    pub favorability_scale: f64,
    /// Indicator score treated as neither good nor bad
    #[serde(default = "default_neutral")]
    pub neutral_score: f64,
}

fn default_scale() -> f64 {
    2.0
}

fn default_neutral() -> f64 {
    5.0
}

fn row(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Sensitivity row with the agricultural commodity weight split evenly
/// between soybean and corn.
#[allow(clippy::too_many_arguments)]
fn sensitivity_row(
    policy_rate: f64,
    inflation: f64,
    fx_rate: f64,
    gdp_growth: f64,
    agro: f64,
    iron_ore: f64,
    oil: f64,
) -> BTreeMap<String, f64> {
    row(&[
        ("policy_rate", policy_rate),
        ("inflation", inflation),
        ("fx_rate", fx_rate),
        ("gdp_growth", gdp_growth),
        ("soybean", agro / 2.0),
        ("corn", agro / 2.0),
        ("iron_ore", iron_ore),
        ("oil", oil),
    ])
}

fn default_sensitivity() -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut table = BTreeMap::new();
    // Pro-cyclical
    table.insert("Consumer Discretionary".into(), sensitivity_row(-2.0, -1.0, -1.0, 2.5, -0.5, -0.5, -0.2));
    table.insert("Technology".into(), sensitivity_row(-1.5, 0.0, -1.0, 2.0, -0.2, -0.2, 0.0));
    table.insert("Industrials".into(), sensitivity_row(-1.0, -0.5, -0.5, 2.2, 0.0, 0.2, 0.0));
    table.insert("Mining and Steel".into(), sensitivity_row(0.0, 0.0, 2.0, 1.2, 0.0, 2.5, 0.6));
    table.insert("Oil and Gas".into(), sensitivity_row(0.0, 0.0, 1.5, 1.0, 0.0, 0.0, 2.7));
    table.insert("Agribusiness".into(), sensitivity_row(-0.5, -0.6, 1.7, 1.1, 2.7, 0.0, 0.4));
    // Defensive
    table.insert("Healthcare".into(), sensitivity_row(0.0, 0.0, 0.0, 0.6, 0.0, 0.0, 0.0));
    table.insert("Consumer Staples".into(), sensitivity_row(0.7, -1.2, -0.7, 0.6, -0.2, -0.2, -0.1));
    table.insert("Utilities".into(), sensitivity_row(1.2, 0.7, -0.6, -0.6, -0.2, -0.2, 0.0));
    table.insert("Electric Power".into(), sensitivity_row(0.5, 0.5, -0.7, -0.7, -0.3, -0.2, 0.1));
    // Financials
    table.insert("Banks".into(), sensitivity_row(1.6, -0.1, -0.3, 1.1, 0.3, 0.2, 0.0));
    table.insert("Insurance".into(), sensitivity_row(2.0, 0.2, 0.0, 0.7, 0.0, 0.0, 0.0));
    table.insert("Financial Services".into(), sensitivity_row(1.0, 0.0, 0.0, 1.5, 0.0, 0.0, 0.0));
    // Other
    table.insert("Communication".into(), sensitivity_row(0.0, 0.0, -0.3, 0.5, 0.0, 0.0, 0.0));
    table
}

fn default_taxonomy() -> BTreeSet<String> {
    default_sensitivity().into_keys().collect()
}

fn default_tickers() -> BTreeMap<String, String> {
    [
        ("ITUB4.SA", "Banks"),
        ("BBDC4.SA", "Banks"),
        ("BBAS3.SA", "Banks"),
        ("BPAC11.SA", "Banks"),
        ("BBSE3.SA", "Insurance"),
        ("PSSA3.SA", "Insurance"),
        ("B3SA3.SA", "Financial Services"),
        ("EGIE3.SA", "Electric Power"),
        ("CPLE6.SA", "Electric Power"),
        ("TAEE11.SA", "Electric Power"),
        ("CMIG4.SA", "Electric Power"),
        ("PETR4.SA", "Oil and Gas"),
        ("PRIO3.SA", "Oil and Gas"),
        ("UGPA3.SA", "Oil and Gas"),
        ("VALE3.SA", "Mining and Steel"),
        ("GGBR4.SA", "Mining and Steel"),
        ("CSNA3.SA", "Mining and Steel"),
        ("WEGE3.SA", "Industrials"),
        ("SUZB3.SA", "Industrials"),
        ("KLBN11.SA", "Industrials"),
        ("SLCE3.SA", "Agribusiness"),
        ("SMTO3.SA", "Agribusiness"),
        ("AGRO3.SA", "Agribusiness"),
        ("RDOR3.SA", "Healthcare"),
        ("HAPV3.SA", "Healthcare"),
        ("RADL3.SA", "Healthcare"),
        ("TOTS3.SA", "Technology"),
        ("LWSA3.SA", "Technology"),
        ("ABEV3.SA", "Consumer Staples"),
        ("CRFB3.SA", "Consumer Staples"),
        ("SBSP3.SA", "Utilities"),
        ("LREN3.SA", "Consumer Discretionary"),
        ("MGLU3.SA", "Consumer Discretionary"),
        ("VIVT3.SA", "Communication"),
    ]
    .into_iter()
    .map(|(ticker, sector)| (ticker.to_string(), sector.to_string()))
    .collect()
}

fn default_favored_by_scenario() -> BTreeMap<Scenario, Vec<String>> {
    let list = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut map = BTreeMap::new();
    map.insert(
        Scenario::StrongExpansion,
        list(&[
            "Consumer Discretionary",
            "Technology",
            "Industrials",
            "Agribusiness",
            "Mining and Steel",
            "Oil and Gas",
        ]),
    );
    map.insert(
        Scenario::ModerateExpansion,
        list(&[
            "Consumer Discretionary",
            "Technology",
            "Industrials",
            "Agribusiness",
            "Mining and Steel",
            "Oil and Gas",
            "Healthcare",
        ]),
    );
    map.insert(
        Scenario::Stable,
        list(&[
            "Healthcare",
            "Banks",
            "Insurance",
            "Financial Services",
            "Consumer Staples",
            "Utilities",
            "Communication",
        ]),
    );
    map.insert(
        Scenario::ModerateContraction,
        list(&[
            "Banks",
            "Insurance",
            "Consumer Staples",
            "Utilities",
            "Healthcare",
            "Electric Power",
            "Communication",
        ]),
    );
    map.insert(
        Scenario::StrongContraction,
        list(&["Utilities", "Consumer Staples", "Electric Power", "Healthcare"]),
    );
    map
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self {
            taxonomy: default_taxonomy(),
            tickers: default_tickers(),
            sensitivity: default_sensitivity(),
            favored_by_scenario: default_favored_by_scenario(),
            favorability_scale: default_scale(),
            neutral_score: default_neutral(),
        }
    }
}

impl SectorConfig {
    pub fn is_known(&self, sector: &str) -> bool {
        self.taxonomy.contains(sector)
    }

    pub fn sector_of(&self, ticker: &str) -> Option<&str> {
        self.tickers.get(ticker).map(String::as_str)
    }
}

impl Validate for SectorConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.taxonomy.is_empty() {
            errors.push(ValidationError::invalid("sectors.taxonomy", "must not be empty"));
        }
        for (sector, row) in &self.sensitivity {
            if !self.is_known(sector) {
                errors.push(ValidationError::invalid(
                    format!("sectors.sensitivity.{sector}"),
                    "sector is not in the taxonomy",
                ));
            }
            for (indicator, value) in row {
                if let Err(e) = ensure_finite(&format!("sectors.sensitivity.{sector}.{indicator}"), *value) {
                    errors.push(e);
                }
            }
        }
        for (ticker, sector) in &self.tickers {
            if !self.is_known(sector) {
                errors.push(ValidationError::invalid(
                    format!("sectors.tickers.{ticker}"),
                    format!("sector '{sector}' is not in the taxonomy"),
                ));
            }
        }
        for (scenario, sectors) in &self.favored_by_scenario {
            for sector in sectors.iter().filter(|s| !self.is_known(s)) {
                errors.push(ValidationError::invalid(
                    format!("sectors.favored_by_scenario.{scenario}"),
                    format!("sector '{sector}' is not in the taxonomy"),
                ));
            }
        }
        if !(self.favorability_scale.is_finite() && self.favorability_scale > 0.0) {
            errors.push(ValidationError::invalid(
                "sectors.favorability_scale",
                format!("must be positive, got {}", self.favorability_scale),
            ));
        }
        if !(0.0..MAX_SCORE).contains(&self.neutral_score) {
            errors.push(ValidationError::invalid(
                "sectors.neutral_score",
                format!("must be in [0, {MAX_SCORE}), got {}", self.neutral_score),
            ));
        }

        ValidationError::collect(errors)
    }
}

// ============================================================================
// Favorability
// ============================================================================

/// Sector → favorability for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectorFavorability(BTreeMap<String, f64>);

impl SectorFavorability {
    pub fn get(&self, sector: &str) -> Option<f64> {
        self.0.get(sector).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sectors sorted by favorability, most favored first.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut sectors: Vec<_> = self.iter().collect();
        sectors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        sectors
    }
}

/// Translates a macro snapshot into per-sector favorability.
#[derive(Debug, Clone, Default)]
pub struct SectorFavorabilityModel {
    config: SectorConfig,
}

impl SectorFavorabilityModel {
    pub fn new(config: SectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SectorConfig {
        &self.config
    }

    pub fn scale(&self) -> f64 {
        self.config.favorability_scale
    }

    /// Favorability of one sector under a snapshot, in `[-scale, scale]`.
    ///
    /// Sectors without sensitivities, or whose sensitivities are all zero
    /// over the indicators present, are exactly neutral.
    pub fn favorability(&self, sector: &str, snapshot: &MacroSnapshot) -> Result<f64> {
        if !self.config.is_known(sector) {
            return Err(MacroError::UnknownSector(sector.to_string()));
        }

        let Some(sensitivities) = self.config.sensitivity.get(sector) else {
            tracing::debug!(sector, "No sensitivity entry, sector is neutral");
            return Ok(0.0);
        };

        let neutral = self.config.neutral_score;
        let span = MAX_SCORE - neutral;
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (indicator, &sensitivity) in sensitivities {
            if let Some(score) = snapshot.score(indicator) {
                weighted += sensitivity * (score - neutral) / span;
                total += sensitivity.abs();
            }
        }

        if total == 0.0 {
            return Ok(0.0);
        }

        let scale = self.scale();
        Ok((scale * weighted / total).clamp(-scale, scale))
    }

    /// Favorability of every sector in the taxonomy.
    pub fn favorability_map(&self, snapshot: &MacroSnapshot) -> SectorFavorability {
        let map = self
            .config
            .taxonomy
            .iter()
            .filter_map(|sector| {
                self.favorability(sector, snapshot)
                    .ok()
                    .map(|value| (sector.clone(), value))
            })
            .collect();
        SectorFavorability(map)
    }

    /// Sectors that historically lead in `scenario`.
    pub fn favored_sectors(&self, scenario: Scenario) -> &[String] {
        self.config
            .favored_by_scenario
            .get(&scenario)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
