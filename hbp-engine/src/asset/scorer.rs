//! Asset scoring and ranking.
//!
//! The valuation signal is the analyst upside clipped to `±upside_clip` and
//! rescaled to `[-1, 1]`; the macro signal is the sector favorability
//! divided by the favorability scale. Both are combined with configured,
//! non-negative weights so the final score is monotone in each input.

use std::collections::BTreeSet;

use hbp_common::validation::{ensure_in_range, ensure_non_negative, Validate, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};

use super::universe::resolve_sector;
use crate::error::{MacroError, Result};
use crate::macro_model::{MacroSnapshot, SectorFavorabilityModel};

/// Asset as supplied by the price/target data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub ticker: String,
    /// Falls back to the configured ticker map when absent
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    /// Analyst target; absent means neutral valuation
    #[serde(default)]
    pub target_price: Option<f64>,
}

impl Asset {
    pub fn new(ticker: impl Into<String>, current_price: f64) -> Self {
        Self {
            ticker: ticker.into(),
            sector: None,
            current_price: Some(current_price),
            target_price: None,
        }
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn with_target(mut self, target_price: f64) -> Self {
        self.target_price = Some(target_price);
        self
    }

    /// Relative upside to the target, `None` without a usable target.
    pub fn upside(&self) -> Result<Option<f64>> {
        let current = match self.current_price {
            Some(p) if p.is_finite() && p > 0.0 => p,
            Some(p) => {
                return Err(MacroError::data_unavailable(
                    &self.ticker,
                    format!("invalid current price {p}"),
                ))
            }
            None => return Err(MacroError::data_unavailable(&self.ticker, "no current price")),
        };
        Ok(self
            .target_price
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(|target| target / current - 1.0))
    }
}

/// Weights of the two signals in the final score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_valuation_weight")]
    pub valuation_weight: f64,
    #[serde(default = "default_macro_weight")]
    pub macro_weight: f64,
    /// Upside beyond `±upside_clip` saturates the valuation signal
    #[serde(default = "default_upside_clip")]
    pub upside_clip: f64,
    /// Ranked assets below this final score are not optimized
    #[serde(default)]
    pub min_score: Option<f64>,
}

fn default_valuation_weight() -> f64 {
    0.6
}

fn default_macro_weight() -> f64 {
    0.4
}

fn default_upside_clip() -> f64 {
    0.5
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            valuation_weight: default_valuation_weight(),
            macro_weight: default_macro_weight(),
            upside_clip: default_upside_clip(),
            min_score: None,
        }
    }
}

impl Validate for ScoringWeights {
    fn validate(&self) -> ValidationResult<()> {
        ensure_non_negative("scoring.valuation_weight", self.valuation_weight)?;
        ensure_non_negative("scoring.macro_weight", self.macro_weight)?;
        if self.valuation_weight + self.macro_weight == 0.0 {
            return Err(ValidationError::invalid(
                "scoring",
                "valuation_weight and macro_weight cannot both be zero",
            ));
        }
        if !(self.upside_clip.is_finite() && self.upside_clip > 0.0) {
            return Err(ValidationError::invalid(
                "scoring.upside_clip",
                format!("must be positive, got {}", self.upside_clip),
            ));
        }
        if let Some(floor) = self.min_score {
            ensure_in_range("scoring.min_score", floor, -1.0, 1.0)?;
        }
        Ok(())
    }
}

/// Scored asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetScore {
    pub ticker: String,
    pub sector: String,
    /// Raw relative upside, when a target exists
    pub upside: Option<f64>,
    /// Valuation signal in `[-1, 1]`
    pub base_score: f64,
    /// Sector favorability in `[-scale, scale]`
    pub favorability: f64,
    pub final_score: f64,
}

/// Asset left out of the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAsset {
    pub ticker: String,
    pub reason: String,
}

/// Ranking plus the assets that could not be scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredUniverse {
    pub ranked: Vec<AssetScore>,
    pub skipped: Vec<SkippedAsset>,
}

impl ScoredUniverse {
    pub fn get(&self, ticker: &str) -> Option<&AssetScore> {
        self.ranked.iter().find(|s| s.ticker == ticker)
    }

    pub fn tickers(&self) -> Vec<String> {
        self.ranked.iter().map(|s| s.ticker.clone()).collect()
    }
}

/// Sort by final score descending, ties by ticker ascending.
pub fn rank_assets(scores: &mut [AssetScore]) {
    scores.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
}

/// Fuses valuation and sector favorability into one ranking score.
#[derive(Debug, Clone)]
pub struct AssetScorer {
    weights: ScoringWeights,
    favorability_scale: f64,
}

impl AssetScorer {
    pub fn new(weights: ScoringWeights, favorability_scale: f64) -> Self {
        Self {
            weights,
            favorability_scale,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Whether `score` clears the configured minimum, if any.
    pub fn is_eligible(&self, score: &AssetScore) -> bool {
        self.weights
            .min_score
            .map_or(true, |floor| score.final_score >= floor)
    }

    /// Valuation signal in `[-1, 1]`; 0 without a target.
    pub fn base_score(&self, upside: Option<f64>) -> f64 {
        let clip = self.weights.upside_clip;
        upside.map_or(0.0, |u| u.clamp(-clip, clip) / clip)
    }

    /// Score one asset given its sector and favorability.
    pub fn score(&self, asset: &Asset, sector: &str, favorability: f64) -> Result<AssetScore> {
        let upside = asset.upside()?;
        if upside.is_none() {
            tracing::debug!(ticker = %asset.ticker, "No analyst target, valuation is neutral");
        }
        let base_score = self.base_score(upside);
        let final_score = self.weights.valuation_weight * base_score
            + self.weights.macro_weight * favorability / self.favorability_scale;

        Ok(AssetScore {
            ticker: asset.ticker.clone(),
            sector: sector.to_string(),
            upside,
            base_score,
            favorability,
            final_score,
        })
    }

    /// Score and rank a universe against one snapshot.
    ///
    /// Assets with no resolvable sector or no usable price are skipped with
    /// a warning. A sector outside the taxonomy is an error.
    pub fn score_universe(
        &self,
        assets: &[Asset],
        sectors: &SectorFavorabilityModel,
        snapshot: &MacroSnapshot,
    ) -> Result<ScoredUniverse> {
        let mut seen = BTreeSet::new();
        let mut universe = ScoredUniverse::default();

        for asset in assets {
            if !seen.insert(asset.ticker.as_str()) {
                return Err(MacroError::InvalidInput(format!(
                    "duplicate ticker {}",
                    asset.ticker
                )));
            }

            let sector = resolve_sector(asset, sectors.config());
            let Some(sector) = sector else {
                tracing::warn!(ticker = %asset.ticker, "Sector not found, skipping asset");
                universe.skipped.push(SkippedAsset {
                    ticker: asset.ticker.clone(),
                    reason: "sector not found".into(),
                });
                continue;
            };

            let favorability = sectors.favorability(sector, snapshot)?;
            match self.score(asset, sector, favorability) {
                Ok(score) => universe.ranked.push(score),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(ticker = %asset.ticker, error = %e, "Skipping asset");
                    universe.skipped.push(SkippedAsset {
                        ticker: asset.ticker.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        rank_assets(&mut universe.ranked);
        tracing::info!(
            ranked = universe.ranked.len(),
            skipped = universe.skipped.len(),
            "Asset ranking generated"
        );
        Ok(universe)
    }
}

impl Default for AssetScorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default(), 2.0)
    }
}
