//! HBP Engine
//!
//! Macro-driven equity allocation: macroeconomic indicators are scored,
//! aggregated into a scenario, mapped onto sector favorability, fused with
//! analyst upside into asset scores, and finally turned into portfolio
//! weights by a constrained mean-variance optimizer.
//!
//! # Architecture
//!
//! ```text
//! indicators ─▶ IndicatorScorer ─▶ ScenarioClassifier ─▶ SectorFavorabilityModel
//!                                                               │
//! prices/targets ─────────────────────────────────────▶ AssetScorer
//!                                                               │ scores
//! return history ─┬─▶ ExpectedReturnModel ◀─────────────────────┘
//!                 └─▶ CovarianceEstimator
//!                                 │
//!                                 ▼
//!                        PortfolioOptimizer ─▶ weights + metrics
//! ```
//!
//! # Key Concepts
//!
//! ## Scenarios
//! Five ordered regimes from Strong Contraction to Strong Expansion, read
//! off the 0-10 macro score through fixed thresholds.
//!
//! ## Objectives
//! - **MaxSharpe**: best excess return per unit of volatility
//! - **MinVariance**: lowest volatility, expected returns ignored
//! - **TargetReturn**: lowest volatility at a required return
//!
//! All computation is synchronous and stateless; configuration is loaded
//! once and shared read-only.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod asset;
pub mod config;
pub mod error;
pub mod macro_model;
pub mod pipeline;
pub mod portfolio;

pub use asset::{Asset, AssetScore, AssetScorer, ScoringWeights};
pub use config::EngineConfig;
pub use error::{MacroError, Result};
pub use macro_model::{
    IndicatorObservation, IndicatorParams, IndicatorScorer, MacroSnapshot, Scenario,
    ScenarioClassifier, SectorConfig, SectorFavorabilityModel,
};
pub use pipeline::{AnalysisReport, AnalysisRequest, MacroPortfolioEngine};
pub use portfolio::{
    CovarianceEstimator, CovarianceMatrix, Objective, OptimizationConstraints, OptimizationResult,
    PortfolioOptimizer, PortfolioWeights, ReturnSeries,
};
