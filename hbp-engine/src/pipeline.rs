//! Analysis pipeline.
//!
//! The central orchestrator for one allocation run: indicators are scored
//! into a macro snapshot, sectors and assets are scored against it, and the
//! ranked universe is handed to the optimizer together with its return
//! history.
//!
//! Partial results (excluded indicators, skipped assets, solver stopped at
//! the iteration cap) are collected as warnings on the report. Anything
//! without a safe default is returned as an error.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use hbp_common::logging::generate_run_id;
use hbp_common::validation::Validate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::asset::{sector_distribution, Asset, AssetScore, AssetScorer, SkippedAsset};
use crate::config::EngineConfig;
use crate::error::{MacroError, Result};
use crate::macro_model::{
    IndicatorObservation, MacroSnapshot, ScenarioClassifier, SectorFavorability,
    SectorFavorabilityModel, UNKNOWN_SECTOR,
};
use crate::portfolio::{
    CovarianceEstimator, CovarianceMatrix, CovarianceMethod, ExpectedReturns, FeasibleSet,
    FrontierPoint, Objective, OptimizationConstraints, OptimizationResult, PortfolioOptimizer,
    PortfolioValidation, ReturnMatrix, ReturnSeries,
};

// ============================================================================
// Request / Report
// ============================================================================

/// Inputs of one analysis run, as handed over by the data collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Indicator series, most recent value last
    #[serde(default)]
    pub indicators: Vec<IndicatorObservation>,
    pub assets: Vec<Asset>,
    /// Aligned periodic returns per ticker
    pub returns: Vec<ReturnSeries>,
    /// Overrides the configured objective
    #[serde(default)]
    pub objective: Option<Objective>,
    /// Replaces the configured default constraints
    #[serde(default)]
    pub constraints: Option<OptimizationConstraints>,
}

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub snapshot: MacroSnapshot,
    pub favorability: SectorFavorability,
    /// Sectors historically favored in the current scenario
    pub favored_sectors: Vec<String>,
    /// Scored assets, best first
    pub ranking: Vec<AssetScore>,
    pub skipped: Vec<SkippedAsset>,
    /// Macro-adjusted annual expected return per optimized ticker
    pub expected_returns: BTreeMap<String, f64>,
    pub covariance_method: CovarianceMethod,
    /// Ledoit-Wolf intensity, absent for the sample estimator
    pub shrinkage: Option<f64>,
    pub optimization: OptimizationResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frontier: Vec<FrontierPoint>,
    pub sector_weights: BTreeMap<String, f64>,
    /// Assets per sector across the requested universe
    pub sector_distribution: BTreeMap<String, usize>,
    pub validation: PortfolioValidation,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl AnalysisReport {
    /// True when the run produced a result with caveats.
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} (macro score {:.2}): {} assets ranked, {} held, return {:.2}%, volatility {:.2}%, Sharpe {:.2}",
            self.snapshot.scenario,
            self.snapshot.macro_score,
            self.ranking.len(),
            self.optimization.weights.significant(1e-4).len(),
            self.optimization.expected_return * 100.0,
            self.optimization.expected_volatility * 100.0,
            self.optimization.sharpe_ratio,
        )
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Scoring-to-weights pipeline over a fixed configuration.
///
/// Holds no per-run state, so one engine can serve concurrent requests.
#[derive(Debug, Clone)]
pub struct MacroPortfolioEngine {
    config: EngineConfig,
    classifier: ScenarioClassifier,
    sectors: SectorFavorabilityModel,
    scorer: AssetScorer,
    estimator: CovarianceEstimator,
    optimizer: PortfolioOptimizer,
}

impl Default for MacroPortfolioEngine {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl MacroPortfolioEngine {
    /// Create an engine after validating `config`.
    pub fn new(config: EngineConfig) -> hbp_common::Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let classifier = ScenarioClassifier::from_indicators(config.scenarios, &config.indicators);
        let sectors = SectorFavorabilityModel::new(config.sectors.clone());
        let scorer = AssetScorer::new(config.scoring, sectors.scale());
        let estimator =
            CovarianceEstimator::new(config.covariance.method, config.returns.periods_per_year);
        let optimizer = PortfolioOptimizer::new(config.optimizer.solver);
        Self {
            config,
            classifier,
            sectors,
            scorer,
            estimator,
            optimizer,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full pipeline for one request.
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport> {
        let run_id = generate_run_id();
        let span = tracing::info_span!("analyze", run_id = %run_id);
        let _guard = span.enter();
        let started = Instant::now();
        let mut warnings = Vec::new();

        // Macro stage
        let snapshot = self
            .classifier
            .snapshot(&self.config.indicators, &request.indicators)?;
        for excluded in &snapshot.excluded {
            warnings.push(format!("Indicator {} excluded: {}", excluded.name, excluded.reason));
        }

        let favorability = self.sectors.favorability_map(&snapshot);
        let favored_sectors = self.sectors.favored_sectors(snapshot.scenario).to_vec();

        // Asset stage
        let universe = self
            .scorer
            .score_universe(&request.assets, &self.sectors, &snapshot)?;
        for skipped in &universe.skipped {
            warnings.push(format!("Asset {} skipped: {}", skipped.ticker, skipped.reason));
        }
        for score in universe.ranked.iter().filter(|s| s.upside.is_none()) {
            warnings.push(format!("Asset {} has no target price, valuation neutral", score.ticker));
        }

        // Return history for the eligible ranked assets, in ranking order
        let history = ReturnMatrix::from_series(&request.returns)?;
        let mut tickers = Vec::with_capacity(universe.ranked.len());
        for score in &universe.ranked {
            if !self.scorer.is_eligible(score) {
                debug!(ticker = %score.ticker, final_score = score.final_score, "Below minimum score");
                warnings.push(format!(
                    "Asset {} below minimum score ({:.3}), not optimized",
                    score.ticker, score.final_score
                ));
            } else if history.position(&score.ticker).is_some() {
                tickers.push(score.ticker.clone());
            } else {
                warn!(ticker = %score.ticker, "No return history, leaving out of optimization");
                warnings.push(format!("Asset {} has no return history, not optimized", score.ticker));
            }
        }
        if tickers.is_empty() {
            return Err(MacroError::data_unavailable(
                "optimization universe",
                "no ranked asset above the minimum score has return history",
            ));
        }
        let history = history.select(&tickers)?;

        let scores: BTreeMap<String, f64> = universe
            .ranked
            .iter()
            .map(|s| (s.ticker.clone(), s.final_score))
            .collect();
        let asset_sectors: BTreeMap<String, String> = universe
            .ranked
            .iter()
            .map(|s| (s.ticker.clone(), s.sector.clone()))
            .collect();

        // Optimization stage
        let expected_returns = self.config.returns.macro_adjusted(&history, &scores)?;
        let covariance = self.estimator.estimate(&history)?;
        let objective = request.objective.unwrap_or(self.config.optimizer.objective);
        let constraints = self.constraints_for(request, &tickers, &scores, &asset_sectors, &mut warnings);

        let optimization =
            self.optimizer
                .optimize(&expected_returns, &covariance, &constraints, objective)?;
        warnings.extend(optimization.warnings(self.optimizer.settings()));

        let frontier = self.frontier(&expected_returns, &covariance, &constraints)?;

        let sector_weights = optimization
            .weights
            .sector_weights(&asset_sectors, UNKNOWN_SECTOR);
        let validation = self.config.validation.check(&optimization.weights);
        for message in &validation.warnings {
            debug!(warning = %message, "Portfolio validation");
        }

        let report = AnalysisReport {
            run_id,
            generated_at: Utc::now(),
            favorability,
            favored_sectors,
            ranking: universe.ranked,
            skipped: universe.skipped,
            expected_returns: expected_returns.to_map(),
            covariance_method: self.estimator.method(),
            shrinkage: covariance.shrinkage(),
            optimization,
            frontier,
            sector_weights,
            sector_distribution: sector_distribution(&request.assets, &self.config.sectors),
            validation,
            warnings,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            snapshot,
        };

        info!(
            partial = report.is_partial(),
            duration_ms = report.duration_ms,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    /// Run independent requests in parallel, one result per request.
    pub fn analyze_batch(&self, requests: &[AnalysisRequest]) -> Vec<Result<AnalysisReport>> {
        info!(requests = requests.len(), "Running analysis batch");
        requests.par_iter().map(|r| self.analyze(r)).collect()
    }

    /// Request or default constraints, completed with the ranked sectors and,
    /// when enabled, score-driven upper bounds.
    fn constraints_for(
        &self,
        request: &AnalysisRequest,
        tickers: &[String],
        scores: &BTreeMap<String, f64>,
        asset_sectors: &BTreeMap<String, String>,
        warnings: &mut Vec<String>,
    ) -> OptimizationConstraints {
        let mut constraints = request
            .constraints
            .clone()
            .unwrap_or_else(|| self.config.optimizer.constraints.clone());

        for ticker in tickers {
            if let Some(sector) = asset_sectors.get(ticker) {
                constraints
                    .asset_sectors
                    .entry(ticker.clone())
                    .or_insert_with(|| sector.clone());
            }
        }

        let policy = &self.config.optimizer.macro_bounds;
        if !policy.enabled {
            return constraints;
        }

        let mut bounded = constraints.clone();
        for (ticker, mut bounds) in policy.bounds(scores, constraints.min_weight) {
            if !tickers.contains(&ticker) || bounded.asset_bounds.contains_key(&ticker) {
                continue;
            }
            bounds.max = bounds.max.min(constraints.max_weight_per_asset).max(bounds.min);
            bounded.asset_bounds.insert(ticker, bounds);
        }

        // Score-driven bounds only tighten; drop them if nothing fits under them
        match FeasibleSet::new(tickers, &bounded) {
            Ok(_) => bounded,
            Err(e) => {
                warn!(error = %e, "Macro weight bounds infeasible, using base constraints");
                warnings.push(format!("Macro weight bounds not applied: {e}"));
                constraints
            }
        }
    }

    fn frontier(
        &self,
        expected_returns: &ExpectedReturns,
        covariance: &CovarianceMatrix,
        constraints: &OptimizationConstraints,
    ) -> Result<Vec<FrontierPoint>> {
        let points = self.config.optimizer.frontier_points;
        if points == 0 || expected_returns.tickers().len() < 2 {
            return Ok(Vec::new());
        }
        let mut base = constraints.clone();
        base.target_return = None;
        self.optimizer
            .efficient_frontier(expected_returns, covariance, &base, points)
    }
}
