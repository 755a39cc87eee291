//! Portfolio construction: expected returns, covariance, constrained
//! optimization and post-trade checks.

pub mod constraints;
pub mod covariance;
pub mod frontier;
pub mod optimizer;
pub mod returns;
pub mod validation;

pub use constraints::{FeasibleSet, MacroBoundPolicy, OptimizationConstraints, WeightBounds};
pub use covariance::{CovarianceEstimator, CovarianceMatrix, CovarianceMethod};
pub use frontier::FrontierPoint;
pub use optimizer::{
    Objective, OptimizationResult, PortfolioOptimizer, PortfolioWeights, SolveStatus, SolverSettings,
};
pub use returns::{ExpectedReturnModel, ExpectedReturns, ReturnMatrix, ReturnSeries};
pub use validation::{PortfolioValidation, ValidationPolicy};
