//! Constrained mean-variance optimizer.
//!
//! All three objectives run through one projected-gradient loop over a
//! [`FeasibleSet`]:
//!
//! - **MinVariance**: minimize `w'Σw` with fixed step `1/L`, `L = 2 max_i Σ_j |Σ_ij|`
//! - **TargetReturn**: same, with `mu'w = target` added to the set
//! - **MaxSharpe**: ascend `(mu'w - rf) / sqrt(w'Σw)` with Armijo backtracking
//!
//! Non-convergence is reported through [`SolveStatus`] with the best iterate.

use std::collections::BTreeMap;
use std::fmt;

use hbp_common::validation::{ensure_finite, ensure_in_range, Validate, ValidationError, ValidationResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::constraints::{FeasibleSet, OptimizationConstraints, RANGE_TOLERANCE};
use super::covariance::{check_covariance, CovarianceMatrix};
use super::returns::ExpectedReturns;
use crate::error::{MacroError, Result};

/// Residual constraint violation reported as a warning.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-8;

const ARMIJO_FACTOR: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 60;
const MAX_STEP: f64 = 1e6;

// ============================================================================
// Request / result types
// ============================================================================

/// What the optimizer solves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    MaxSharpe,
    MinVariance,
    /// Minimum variance at `constraints.target_return`
    TargetReturn,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::MaxSharpe => write!(f, "max_sharpe"),
            Objective::MinVariance => write!(f, "min_variance"),
            Objective::TargetReturn => write!(f, "target_return"),
        }
    }
}

/// Solver tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Converged when no weight moves more than this in one step
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Annual risk-free rate for the Sharpe ratio
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Final corrections above this L1 size are logged as warnings
    #[serde(default = "default_renormalization_warning")]
    pub renormalization_warning: f64,
}

fn default_max_iterations() -> usize {
    20_000
}

fn default_tolerance() -> f64 {
    1e-10
}

fn default_risk_free_rate() -> f64 {
    0.05
}

fn default_renormalization_warning() -> f64 {
    1e-6
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            risk_free_rate: default_risk_free_rate(),
            renormalization_warning: default_renormalization_warning(),
        }
    }
}

impl Validate for SolverSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_iterations == 0 {
            return Err(ValidationError::invalid(
                "optimizer.solver.max_iterations",
                "must be at least 1",
            ));
        }
        ensure_in_range("optimizer.solver.tolerance", self.tolerance, f64::MIN_POSITIVE, 1e-2)?;
        ensure_finite("optimizer.solver.risk_free_rate", self.risk_free_rate)?;
        ensure_in_range(
            "optimizer.solver.renormalization_warning",
            self.renormalization_warning,
            0.0,
            1.0,
        )?;
        Ok(())
    }
}

/// Whether the solver met its tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Converged,
    /// Iteration cap reached; the weights are the best iterate found
    DidNotConverge,
}

/// Ticker → weight, fully invested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioWeights(BTreeMap<String, f64>);

impl PortfolioWeights {
    pub fn from_vector(tickers: &[String], weights: &DVector<f64>) -> Self {
        Self(
            tickers
                .iter()
                .cloned()
                .zip(weights.iter().copied())
                .collect(),
        )
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.0.get(ticker).copied()
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

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Weights at or above `threshold`, largest first.
    pub fn significant(&self, threshold: f64) -> Vec<(&str, f64)> {
        let mut held: Vec<_> = self.iter().filter(|(_, w)| *w >= threshold).collect();
        held.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        held
    }

    /// Total weight per sector; unmapped tickers fall under `unknown`.
    pub fn sector_weights(&self, sectors: &BTreeMap<String, String>, unknown: &str) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for (ticker, weight) in self.iter() {
            let sector = sectors.get(ticker).map(String::as_str).unwrap_or(unknown);
            *totals.entry(sector.to_string()).or_insert(0.0) += weight;
        }
        totals
    }
}

/// Optimized portfolio and its metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub objective: Objective,
    pub weights: PortfolioWeights,
    /// Annualized `mu'w`
    pub expected_return: f64,
    /// Annualized `sqrt(w'Σw)`
    pub expected_volatility: f64,
    pub sharpe_ratio: f64,
    pub status: SolveStatus,
    pub iterations: usize,
    /// L1 size of the final feasibility correction
    pub renormalization: f64,
    /// Largest constraint violation left after the correction
    #[serde(default)]
    pub constraint_violation: f64,
}

impl OptimizationResult {
    pub fn is_converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }

    /// Caveats worth surfacing to the caller.
    pub fn warnings(&self, settings: &SolverSettings) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.is_converged() {
            warnings.push(format!(
                "Optimizer stopped after {} iterations without converging",
                self.iterations
            ));
        }
        if self.renormalization > settings.renormalization_warning {
            warnings.push(format!(
                "Solver output corrected by {:.2e} to satisfy constraints",
                self.renormalization
            ));
        }
        if self.constraint_violation > FEASIBILITY_TOLERANCE {
            warnings.push(format!(
                "Weights violate constraints by {:.2e}",
                self.constraint_violation
            ));
        }
        warnings
    }
}

// ============================================================================
// Optimizer
// ============================================================================

/// Portfolio metrics at one weight vector.
struct Metrics {
    expected_return: f64,
    volatility: f64,
    sharpe: f64,
}

struct Iterate {
    weights: DVector<f64>,
    iterations: usize,
    converged: bool,
}

/// Solves mean-variance problems under linear constraints.
#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    settings: SolverSettings,
}

impl PortfolioOptimizer {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Optimize one portfolio.
    ///
    /// A single-asset universe returns weight 1.0 without running the
    /// solver. Malformed covariance, infeasible constraints and unreachable
    /// targets are errors; hitting the iteration cap is not.
    pub fn optimize(
        &self,
        expected_returns: &ExpectedReturns,
        covariance: &CovarianceMatrix,
        constraints: &OptimizationConstraints,
        objective: Objective,
    ) -> Result<OptimizationResult> {
        let mu = expected_returns.values();
        let sigma = covariance.matrix();
        let tickers = expected_returns.tickers();
        let n = mu.len();

        if n == 0 {
            return Err(MacroError::InvalidInput("empty asset universe".into()));
        }
        check_covariance(sigma, n)?;
        if covariance.tickers() != tickers {
            return Err(MacroError::InvalidInput(
                "expected returns and covariance cover different tickers".into(),
            ));
        }
        if mu.iter().any(|r| !r.is_finite()) {
            return Err(MacroError::InvalidInput("non-finite expected return".into()));
        }

        if n == 1 {
            tracing::debug!(ticker = %tickers[0], %objective, "Single asset universe, skipping solver");
            let weights = DVector::from_element(1, 1.0);
            return Ok(self.finish(objective, tickers, mu, sigma, weights, 0, true, (0.0, 0.0)));
        }

        let mut set = FeasibleSet::new(tickers, constraints)?;
        if objective == Objective::TargetReturn {
            let target = constraints.target_return.ok_or_else(|| {
                MacroError::InvalidInput("target_return objective needs constraints.target_return".into())
            })?;
            let (min, max) = set.return_range(mu);
            if target < min - RANGE_TOLERANCE || target > max + RANGE_TOLERANCE {
                return Err(MacroError::InfeasibleTarget { target, min, max });
            }
            set = set.with_target_return(mu, target);
        }

        let start = set.project(&DVector::from_element(n, 1.0 / n as f64));
        let iterate = match objective {
            Objective::MinVariance | Objective::TargetReturn => self.minimize_variance(sigma, &set, start),
            Objective::MaxSharpe => self.maximize_sharpe(mu, sigma, &set, start),
        };

        let corrected = set.project(&iterate.weights);
        let renormalization = (&corrected - &iterate.weights).lp_norm(1);
        if renormalization > self.settings.renormalization_warning {
            tracing::warn!(renormalization, %objective, "Large correction applied to solver output");
        } else {
            tracing::debug!(renormalization, "Final renormalization");
        }
        let violation = set.violation(&corrected);
        if violation > FEASIBILITY_TOLERANCE {
            tracing::warn!(violation, %objective, "Constraint violation left after correction");
        }

        if !iterate.converged {
            tracing::warn!(
                %objective,
                iterations = iterate.iterations,
                "Optimizer did not converge, returning best iterate"
            );
        }

        let result = self.finish(
            objective,
            tickers,
            mu,
            sigma,
            corrected,
            iterate.iterations,
            iterate.converged,
            (renormalization, violation),
        );
        tracing::info!(
            %objective,
            expected_return = result.expected_return,
            volatility = result.expected_volatility,
            sharpe = result.sharpe_ratio,
            iterations = result.iterations,
            "Portfolio optimized"
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        objective: Objective,
        tickers: &[String],
        mu: &DVector<f64>,
        sigma: &DMatrix<f64>,
        weights: DVector<f64>,
        iterations: usize,
        converged: bool,
        (renormalization, constraint_violation): (f64, f64),
    ) -> OptimizationResult {
        let metrics = self.metrics(mu, sigma, &weights);
        OptimizationResult {
            objective,
            weights: PortfolioWeights::from_vector(tickers, &weights),
            expected_return: metrics.expected_return,
            expected_volatility: metrics.volatility,
            sharpe_ratio: metrics.sharpe,
            status: if converged {
                SolveStatus::Converged
            } else {
                SolveStatus::DidNotConverge
            },
            iterations,
            renormalization,
            constraint_violation,
        }
    }

    fn metrics(&self, mu: &DVector<f64>, sigma: &DMatrix<f64>, w: &DVector<f64>) -> Metrics {
        let expected_return = mu.dot(w);
        let volatility = variance(sigma, w).max(0.0).sqrt();
        let sharpe = if volatility > 0.0 {
            (expected_return - self.settings.risk_free_rate) / volatility
        } else {
            0.0
        };
        Metrics {
            expected_return,
            volatility,
            sharpe,
        }
    }

    /// Projected gradient descent on `w'Σw` with step `1/L`.
    fn minimize_variance(&self, sigma: &DMatrix<f64>, set: &FeasibleSet, start: DVector<f64>) -> Iterate {
        let lipschitz = 2.0 * max_abs_row_sum(sigma);
        let step = 1.0 / lipschitz;

        let mut w = start;
        let mut best = w.clone();
        let mut best_value = variance(sigma, &w);

        for iteration in 1..=self.settings.max_iterations {
            let gradient = sigma * &w * 2.0;
            let next = set.project(&(&w - gradient * step));
            let moved = (&next - &w).amax();
            w = next;

            let value = variance(sigma, &w);
            if value <= best_value {
                best_value = value;
                best = w.clone();
            }
            if moved < self.settings.tolerance {
                tracing::debug!(iteration, variance = value, "Variance minimization converged");
                return Iterate {
                    weights: w,
                    iterations: iteration,
                    converged: true,
                };
            }
        }

        Iterate {
            weights: best,
            iterations: self.settings.max_iterations,
            converged: false,
        }
    }

    /// Projected gradient ascent on the Sharpe ratio with Armijo backtracking.
    fn maximize_sharpe(
        &self,
        mu: &DVector<f64>,
        sigma: &DMatrix<f64>,
        set: &FeasibleSet,
        start: DVector<f64>,
    ) -> Iterate {
        let rf = self.settings.risk_free_rate;
        let sharpe = |w: &DVector<f64>| {
            let vol = variance(sigma, w).max(f64::MIN_POSITIVE).sqrt();
            (mu.dot(w) - rf) / vol
        };

        let mut w = start;
        let mut value = sharpe(&w);
        let mut step = 1.0;

        for iteration in 1..=self.settings.max_iterations {
            let sigma_w = sigma * &w;
            let var = w.dot(&sigma_w).max(f64::MIN_POSITIVE);
            let vol = var.sqrt();
            let excess = mu.dot(&w) - rf;
            let gradient = mu / vol - sigma_w * (excess / (var * vol));

            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let candidate = set.project(&(&w + &gradient * step));
                let candidate_value = sharpe(&candidate);
                let ascent = gradient.dot(&(&candidate - &w));
                if candidate_value >= value + ARMIJO_FACTOR * ascent {
                    accepted = Some((candidate, candidate_value));
                    break;
                }
                step *= 0.5;
            }

            let Some((next, next_value)) = accepted else {
                tracing::debug!(iteration, sharpe = value, "No ascent step found, stationary");
                return Iterate {
                    weights: w,
                    iterations: iteration,
                    converged: true,
                };
            };

            let moved = (&next - &w).amax();
            w = next;
            value = next_value;
            step = (step * 2.0).min(MAX_STEP);

            if moved < self.settings.tolerance {
                tracing::debug!(iteration, sharpe = value, "Sharpe maximization converged");
                return Iterate {
                    weights: w,
                    iterations: iteration,
                    converged: true,
                };
            }
        }

        // Accepted steps never decrease the ratio, so the last iterate is the best
        Iterate {
            weights: w,
            iterations: self.settings.max_iterations,
            converged: false,
        }
    }
}

fn variance(sigma: &DMatrix<f64>, w: &DVector<f64>) -> f64 {
    w.dot(&(sigma * w))
}

fn max_abs_row_sum(m: &DMatrix<f64>) -> f64 {
    m.row_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}
