//! Typed engine configuration.
//!
//! The `engine` section of the shared [`hbp_common::Config`] is deserialized
//! into [`EngineConfig`]. Every table has defaults, so a missing or partial
//! section still yields a complete configuration.

use std::collections::BTreeMap;

use hbp_common::validation::{Validate, ValidationError, ValidationResult};
use hbp_common::Config;
use serde::{Deserialize, Serialize};

use crate::asset::ScoringWeights;
use crate::macro_model::{default_indicators, IndicatorParams, ScenarioThresholds, SectorConfig};
use crate::portfolio::{
    CovarianceMethod, ExpectedReturnModel, MacroBoundPolicy, Objective, OptimizationConstraints,
    SolverSettings, ValidationPolicy,
};

/// Covariance estimation settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CovarianceConfig {
    #[serde(default)]
    pub method: CovarianceMethod,
}

/// Optimizer defaults applied to every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_objective")]
    pub objective: Objective,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub constraints: OptimizationConstraints,
    #[serde(default)]
    pub macro_bounds: MacroBoundPolicy,
    /// Frontier points in the report, 0 to skip
    #[serde(default)]
    pub frontier_points: usize,
}

fn default_objective() -> Objective {
    Objective::MaxSharpe
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            objective: default_objective(),
            solver: SolverSettings::default(),
            constraints: OptimizationConstraints::default(),
            macro_bounds: MacroBoundPolicy::default(),
            frontier_points: 0,
        }
    }
}

/// Static engine configuration, loaded once per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_indicators")]
    pub indicators: BTreeMap<String, IndicatorParams>,
    #[serde(default)]
    pub scenarios: ScenarioThresholds,
    #[serde(default)]
    pub sectors: SectorConfig,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub returns: ExpectedReturnModel,
    #[serde(default)]
    pub covariance: CovarianceConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub validation: ValidationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            indicators: default_indicators(),
            scenarios: ScenarioThresholds::default(),
            sectors: SectorConfig::default(),
            scoring: ScoringWeights::default(),
            returns: ExpectedReturnModel::default(),
            covariance: CovarianceConfig::default(),
            optimizer: OptimizerConfig::default(),
            validation: ValidationPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Typed engine section of `config`, validated.
    pub fn from_config(config: &Config) -> hbp_common::Result<Self> {
        let engine = if config.has_engine_section() {
            serde_json::from_value::<Self>(config.engine.clone())
                .map_err(|e| hbp_common::Error::from(e).with_context("Invalid engine section"))?
        } else {
            tracing::debug!("No engine section, using built-in tables");
            Self::default()
        };
        engine.validate()?;
        engine.warn_unscored_sensitivities();
        Ok(engine)
    }

    /// Sensitivities to indicators with no scoring parameters never apply.
    fn warn_unscored_sensitivities(&self) {
        for (sector, row) in &self.sectors.sensitivity {
            for indicator in row.keys().filter(|k| !self.indicators.contains_key(*k)) {
                tracing::warn!(sector = %sector, indicator = %indicator, "Sensitivity to unconfigured indicator");
            }
        }
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.indicators.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "indicators".into(),
            });
        }
        for (name, params) in &self.indicators {
            if let Err(e) = params.validate_as(&format!("indicators.{name}")) {
                errors.push(e);
            }
        }

        if self.optimizer.frontier_points == 1 {
            errors.push(ValidationError::invalid(
                "optimizer.frontier_points",
                "must be 0 (disabled) or at least 2",
            ));
        }

        let sections: [&dyn Validate; 8] = [
            &self.scenarios,
            &self.sectors,
            &self.scoring,
            &self.returns,
            &self.optimizer.solver,
            &self.optimizer.constraints,
            &self.optimizer.macro_bounds,
            &self.validation,
        ];
        for section in sections {
            if let Err(e) = section.validate() {
                errors.push(e);
            }
        }

        ValidationError::collect(errors)
    }
}
