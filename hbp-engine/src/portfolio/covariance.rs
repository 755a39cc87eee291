//! Covariance estimation.
//!
//! The default estimator shrinks the sample covariance toward a scaled
//! identity with the Ledoit-Wolf intensity, which keeps the result
//! positive-definite even when there are fewer periods than assets.

use nalgebra::{Cholesky, DMatrix};
use serde::{Deserialize, Serialize};

use super::returns::{ReturnMatrix, TRADING_DAYS_PER_YEAR};
use crate::error::{MacroError, Result};

/// Fewest periods any estimator accepts.
pub const MIN_OBSERVATIONS: usize = 2;

/// Relative tolerance for the symmetry check.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Covariance estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceMethod {
    /// Shrinkage toward a scaled identity with data-driven intensity
    #[default]
    LedoitWolf,
    /// Unbiased sample covariance; must already be positive-definite
    Sample,
}

/// Annualized covariance over a named asset universe.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    tickers: Vec<String>,
    matrix: DMatrix<f64>,
    shrinkage: Option<f64>,
}

impl CovarianceMatrix {
    /// Wrap a caller-supplied matrix after checking its shape and diagonal.
    pub fn new(tickers: Vec<String>, matrix: DMatrix<f64>) -> Result<Self> {
        check_covariance(&matrix, tickers.len())?;
        Ok(Self {
            tickers,
            matrix,
            shrinkage: None,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Shrinkage intensity used, for estimated matrices.
    pub fn shrinkage(&self) -> Option<f64> {
        self.shrinkage
    }

    pub fn volatility(&self, i: usize) -> f64 {
        self.matrix[(i, i)].sqrt()
    }

    pub fn is_positive_definite(&self) -> bool {
        Cholesky::new(self.matrix.clone()).is_some()
    }
}

/// Shape, finiteness, symmetry and positive diagonal.
pub fn check_covariance(matrix: &DMatrix<f64>, n: usize) -> Result<()> {
    if !matrix.is_square() || matrix.nrows() != n {
        return Err(MacroError::InvalidCovariance(format!(
            "expected {n}x{n}, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(MacroError::InvalidCovariance("non-finite entry".into()));
    }
    for i in 0..n {
        let variance = matrix[(i, i)];
        if variance <= 0.0 {
            return Err(MacroError::InvalidCovariance(format!(
                "variance of asset {i} is {variance}"
            )));
        }
        for j in (i + 1)..n {
            let (a, b) = (matrix[(i, j)], matrix[(j, i)]);
            let scale = a.abs().max(b.abs()).max(1.0);
            if (a - b).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(MacroError::InvalidCovariance(format!(
                    "not symmetric at ({i}, {j}): {a} vs {b}"
                )));
            }
        }
    }
    Ok(())
}

/// Estimates annualized covariance matrices from return history.
#[derive(Debug, Clone, Copy)]
pub struct CovarianceEstimator {
    method: CovarianceMethod,
    periods_per_year: usize,
}

impl Default for CovarianceEstimator {
    fn default() -> Self {
        Self::new(CovarianceMethod::default(), TRADING_DAYS_PER_YEAR)
    }
}

impl CovarianceEstimator {
    pub fn new(method: CovarianceMethod, periods_per_year: usize) -> Self {
        Self {
            method,
            periods_per_year,
        }
    }

    pub fn method(&self) -> CovarianceMethod {
        self.method
    }

    /// Estimate the covariance of `returns` (N assets x T periods).
    ///
    /// Fails with `InsufficientData` below two periods.
    pub fn estimate(&self, returns: &ReturnMatrix) -> Result<CovarianceMatrix> {
        let periods = returns.n_periods();
        if periods < MIN_OBSERVATIONS {
            return Err(MacroError::InsufficientData {
                observations: periods,
                required: MIN_OBSERVATIONS,
            });
        }
        if returns.n_assets() == 0 {
            return Err(MacroError::InvalidInput("no assets".into()));
        }

        let centered = center(returns.data());
        let (matrix, shrinkage) = match self.method {
            CovarianceMethod::LedoitWolf => {
                let (matrix, shrinkage) = ledoit_wolf(&centered)?;
                (matrix, Some(shrinkage))
            }
            CovarianceMethod::Sample => (sample(&centered)?, None),
        };

        let matrix = matrix * self.periods_per_year as f64;
        tracing::debug!(
            method = ?self.method,
            assets = returns.n_assets(),
            periods,
            shrinkage,
            "Covariance estimated"
        );

        Ok(CovarianceMatrix {
            tickers: returns.tickers().to_vec(),
            matrix,
            shrinkage,
        })
    }
}

/// Subtract each column's mean.
fn center(data: &DMatrix<f64>) -> DMatrix<f64> {
    let mut centered = data.clone();
    for mut column in centered.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    centered
}

fn sample(centered: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let periods = centered.nrows() as f64;
    let cov = (centered.transpose() * centered) / (periods - 1.0);
    if Cholesky::new(cov.clone()).is_none() {
        return Err(MacroError::InvalidCovariance(
            "sample covariance is not positive-definite; use ledoit_wolf".into(),
        ));
    }
    Ok(cov)
}

/// Ledoit-Wolf shrinkage toward `mu * I`, `mu` the average variance.
///
/// Returns the shrunk matrix and the intensity actually applied, which is
/// raised toward 1 if the estimate fails the Cholesky check.
fn ledoit_wolf(centered: &DMatrix<f64>) -> Result<(DMatrix<f64>, f64)> {
    let t = centered.nrows() as f64;
    let n = centered.ncols();

    let emp_cov = (centered.transpose() * centered) / t;
    let mu = emp_cov.trace() / n as f64;
    if mu.is_nan() || mu <= 0.0 {
        return Err(MacroError::InvalidCovariance(
            "return series have zero variance".into(),
        ));
    }

    // beta: estimation error of the sample covariance
    let squared = centered.map(|x| x * x);
    let beta_raw = (squared.transpose() * &squared).sum();
    let delta_raw = emp_cov.map(|x| x * x).sum();
    let beta = (beta_raw / t - delta_raw) / (n as f64 * t);

    // delta: distance between sample covariance and target
    let delta = (delta_raw - 2.0 * mu * emp_cov.trace() + n as f64 * mu * mu) / n as f64;

    let mut shrinkage = if delta > 0.0 {
        (beta.min(delta) / delta).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let target = DMatrix::<f64>::identity(n, n) * mu;
    let blend = |s: f64| &emp_cov * (1.0 - s) + &target * s;

    let mut shrunk = blend(shrinkage);
    let mut attempts = 0;
    while Cholesky::new(shrunk.clone()).is_none() {
        attempts += 1;
        let raised = if attempts >= 50 { 1.0 } else { (shrinkage + 1.0) / 2.0 };
        tracing::warn!(
            from = shrinkage,
            to = raised,
            "Shrunk covariance failed Cholesky check, raising intensity"
        );
        shrinkage = raised;
        shrunk = blend(shrinkage);
        if shrinkage >= 1.0 {
            break;
        }
    }

    Ok((shrunk, shrinkage))
}
