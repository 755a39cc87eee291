//! Efficient frontier sampling.

use serde::{Deserialize, Serialize};

use super::constraints::{FeasibleSet, OptimizationConstraints};
use super::covariance::CovarianceMatrix;
use super::optimizer::{Objective, PortfolioOptimizer, PortfolioWeights};
use super::returns::ExpectedReturns;
use crate::error::{MacroError, Result};

/// Points closer than this in both return and volatility are duplicates.
const DUPLICATE_TOLERANCE: f64 = 1e-9;

/// One minimum-variance portfolio on the frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub target_return: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub weights: PortfolioWeights,
}

impl PortfolioOptimizer {
    /// Minimum-variance portfolios at `points` evenly spaced targets across
    /// the achievable return range.
    ///
    /// Targets that fail to converge are dropped; the rest come back sorted
    /// by volatility.
    pub fn efficient_frontier(
        &self,
        expected_returns: &ExpectedReturns,
        covariance: &CovarianceMatrix,
        constraints: &OptimizationConstraints,
        points: usize,
    ) -> Result<Vec<FrontierPoint>> {
        if points < 2 {
            return Err(MacroError::InvalidInput(format!(
                "frontier needs at least 2 points, got {points}"
            )));
        }

        let set = FeasibleSet::new(expected_returns.tickers(), constraints)?;
        let (min, max) = set.return_range(expected_returns.values());
        let step = (max - min) / (points - 1) as f64;

        let mut frontier = Vec::with_capacity(points);
        for k in 0..points {
            let target = if k == points - 1 { max } else { min + step * k as f64 };
            let request = constraints.clone().with_target_return(target);
            let result = self.optimize(expected_returns, covariance, &request, Objective::TargetReturn)?;
            if !result.is_converged() {
                tracing::debug!(target, "Dropping unconverged frontier point");
                continue;
            }
            frontier.push(FrontierPoint {
                target_return: target,
                expected_return: result.expected_return,
                volatility: result.expected_volatility,
                sharpe_ratio: result.sharpe_ratio,
                weights: result.weights,
            });
        }

        frontier.sort_by(|a, b| {
            a.volatility
                .total_cmp(&b.volatility)
                .then_with(|| a.expected_return.total_cmp(&b.expected_return))
        });
        frontier.dedup_by(|b, a| {
            (a.volatility - b.volatility).abs() < DUPLICATE_TOLERANCE
                && (a.expected_return - b.expected_return).abs() < DUPLICATE_TOLERANCE
        });

        tracing::info!(points = frontier.len(), min_return = min, max_return = max, "Efficient frontier computed");
        Ok(frontier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::optimizer::SolverSettings;
    use nalgebra::{DMatrix, DVector};

    fn inputs() -> (ExpectedReturns, CovarianceMatrix) {
        let tickers: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let mu = ExpectedReturns::new(tickers.clone(), DVector::from_vec(vec![0.08, 0.12, 0.16])).unwrap();
        let cov = CovarianceMatrix::new(
            tickers,
            DMatrix::from_row_slice(
                3,
                3,
                &[0.04, 0.01, 0.00, 0.01, 0.06, 0.02, 0.00, 0.02, 0.10],
            ),
        )
        .unwrap();
        (mu, cov)
    }

    #[test]
    fn test_frontier_spans_range_sorted_by_volatility() {
        let (mu, cov) = inputs();
        let optimizer = PortfolioOptimizer::new(SolverSettings {
            risk_free_rate: 0.02,
            ..Default::default()
        });
        let frontier = optimizer
            .efficient_frontier(&mu, &cov, &OptimizationConstraints::long_only(1.0), 5)
            .unwrap();
        assert!(!frontier.is_empty());
        assert!(frontier.windows(2).all(|w| w[0].volatility <= w[1].volatility));
        for point in &frontier {
            assert!((point.expected_return - point.target_return).abs() < 1e-6);
            assert!((point.weights.total() - 1.0).abs() < 1e-6);
        }
        // Top of the range is the all-in portfolio
        let top = frontier
            .iter()
            .max_by(|a, b| a.expected_return.total_cmp(&b.expected_return))
            .unwrap();
        assert!((top.expected_return - 0.16).abs() < 1e-6);
    }

    #[test]
    fn test_frontier_needs_two_points() {
        let (mu, cov) = inputs();
        assert!(matches!(
            PortfolioOptimizer::default().efficient_frontier(&mu, &cov, &OptimizationConstraints::long_only(1.0), 1),
            Err(MacroError::InvalidInput(_))
        ));
    }
}
