//! Historical return series and expected return estimates.

use std::collections::{BTreeMap, BTreeSet};

use hbp_common::validation::{ensure_finite, Validate, ValidationError, ValidationResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{MacroError, Result};

/// Trading days per year.
pub const TRADING_DAYS_PER_YEAR: usize = 252;

/// Periodic returns of one asset, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub ticker: String,
    pub returns: Vec<f64>,
}

impl ReturnSeries {
    pub fn new(ticker: impl Into<String>, returns: Vec<f64>) -> Self {
        Self {
            ticker: ticker.into(),
            returns,
        }
    }
}

/// Aligned returns, one column per asset and one row per period.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    tickers: Vec<String>,
    data: DMatrix<f64>,
}

impl ReturnMatrix {
    /// Build from aligned series.
    ///
    /// All series must have the same length and finite values; alignment is
    /// the data source's job, misaligned input is rejected.
    pub fn from_series(series: &[ReturnSeries]) -> Result<Self> {
        let Some(first) = series.first() else {
            return Err(MacroError::InvalidInput("no return series supplied".into()));
        };
        let periods = first.returns.len();

        let mut seen = BTreeSet::new();
        for s in series {
            if !seen.insert(s.ticker.as_str()) {
                return Err(MacroError::InvalidInput(format!(
                    "duplicate return series for {}",
                    s.ticker
                )));
            }
            if s.returns.len() != periods {
                return Err(MacroError::InvalidInput(format!(
                    "return series for {} has {} periods, expected {}",
                    s.ticker,
                    s.returns.len(),
                    periods
                )));
            }
            if let Some(bad) = s.returns.iter().find(|r| !r.is_finite()) {
                return Err(MacroError::InvalidInput(format!(
                    "return series for {} contains {bad}",
                    s.ticker
                )));
            }
        }

        let data = DMatrix::from_fn(periods, series.len(), |t, j| series[j].returns[t]);
        Ok(Self {
            tickers: series.iter().map(|s| s.ticker.clone()).collect(),
            data,
        })
    }

    /// Columns for `tickers`, in that order.
    pub fn select(&self, tickers: &[String]) -> Result<Self> {
        let indices = tickers
            .iter()
            .map(|t| {
                self.position(t).ok_or_else(|| {
                    MacroError::data_unavailable(t.as_str(), "no return history")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tickers: tickers.to_vec(),
            data: self.data.select_columns(indices.iter()),
        })
    }

    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn n_assets(&self) -> usize {
        self.data.ncols()
    }

    pub fn n_periods(&self) -> usize {
        self.data.nrows()
    }

    /// `T x N` data matrix.
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }
}

/// Annualized expected return per asset.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedReturns {
    tickers: Vec<String>,
    values: DVector<f64>,
}

impl ExpectedReturns {
    pub fn new(tickers: Vec<String>, values: DVector<f64>) -> Result<Self> {
        if tickers.len() != values.len() {
            return Err(MacroError::InvalidInput(format!(
                "{} tickers but {} expected returns",
                tickers.len(),
                values.len()
            )));
        }
        Ok(Self { tickers, values })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.values[i])
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.tickers
            .iter()
            .cloned()
            .zip(self.values.iter().copied())
            .collect()
    }
}

/// Expected return estimation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedReturnModel {
    /// Return periods per year used to annualize
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: usize,
    /// Relative adjustment per unit of asset score
    #[serde(default = "default_macro_tilt")]
    pub macro_tilt: f64,
}

fn default_periods_per_year() -> usize {
    TRADING_DAYS_PER_YEAR
}

fn default_macro_tilt() -> f64 {
    0.2
}

impl Default for ExpectedReturnModel {
    fn default() -> Self {
        Self {
            periods_per_year: default_periods_per_year(),
            macro_tilt: default_macro_tilt(),
        }
    }
}

impl Validate for ExpectedReturnModel {
    fn validate(&self) -> ValidationResult<()> {
        if self.periods_per_year == 0 {
            return Err(ValidationError::invalid(
                "returns.periods_per_year",
                "must be at least 1",
            ));
        }
        ensure_finite("returns.macro_tilt", self.macro_tilt)?;
        if !(0.0..=1.0).contains(&self.macro_tilt) {
            return Err(ValidationError::invalid(
                "returns.macro_tilt",
                format!("must be between 0 and 1, got {}", self.macro_tilt),
            ));
        }
        Ok(())
    }
}

impl ExpectedReturnModel {
    /// Annualized mean return per asset.
    pub fn historical(&self, returns: &ReturnMatrix) -> Result<ExpectedReturns> {
        if returns.n_periods() == 0 {
            return Err(MacroError::InsufficientData {
                observations: 0,
                required: 1,
            });
        }
        let annualize = self.periods_per_year as f64;
        let values = DVector::from_iterator(
            returns.n_assets(),
            returns
                .data()
                .column_iter()
                .map(|column| column.iter().mean() * annualize),
        );
        ExpectedReturns::new(returns.tickers().to_vec(), values)
    }

    /// Historical returns tilted by the asset scores.
    ///
    /// `mu + tilt * score * |mu|`: a score of +1 raises the estimate by
    /// `tilt` of its magnitude, -1 lowers it by the same amount. Assets
    /// without a score keep the historical estimate.
    pub fn macro_adjusted(
        &self,
        returns: &ReturnMatrix,
        scores: &BTreeMap<String, f64>,
    ) -> Result<ExpectedReturns> {
        let historical = self.historical(returns)?;
        let values = DVector::from_iterator(
            historical.values.len(),
            historical
                .tickers
                .iter()
                .zip(historical.values.iter())
                .map(|(ticker, &mu)| match scores.get(ticker) {
                    Some(&score) => mu + self.macro_tilt * score.clamp(-1.0, 1.0) * mu.abs(),
                    None => mu,
                }),
        );
        ExpectedReturns::new(historical.tickers, values)
    }
}
