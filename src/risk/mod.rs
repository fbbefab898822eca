//! Top-level risk namespace: estimation, simulation, and portfolio analytics.
//!
//! This module wires and re-exports:
//! - `returns`: date alignment and EWMA/sample return-model estimation,
//! - `var` + `cvar`: historical and parametric Value-at-Risk and expected
//!   shortfall,
//! - `mc`: pseudo- and quasi-random Monte Carlo simulation of portfolio P&L,
//! - `metrics`: volatility, Sharpe ratio, and drawdown summaries,
//! - `optimizer`: constrained mean-variance weight optimization,
//! - `stress`: deterministic scenario shocks with severity classification,
//! - `engine`: the orchestrating [`RiskEngine`] with its cache and audit
//!   collaborators.
//!
//! It is intentionally a facade: domain logic lives in submodules, while this
//! file defines the public import surface (`quantrisk::risk::*`) for
//! downstream code.

pub mod cvar;
pub mod engine;
pub mod mc;
pub mod metrics;
pub mod optimizer;
pub mod returns;
pub mod stress;
pub mod var;

pub use cvar::{CvarEstimate, MIN_TAIL_SAMPLES, conditional_var, parametric_cvar};
pub use engine::{RiskEngine, RiskEngineConfig, SingleFlightCache};
pub use mc::{MonteCarloEngine, SamplingMode, SimulatedPnl};
pub use metrics::{TRADING_DAYS_PER_YEAR, max_drawdown, sharpe_ratio, volatility};
pub use optimizer::{
    AnnealingOptions, GroupLimit, MeanVarianceOptimizer, OptimizationConstraints,
    OptimizationResult, TerminationReason,
};
pub use returns::{
    AlignedReturns, CovarianceEstimator, DEFAULT_EWMA_LAMBDA, MIN_ALIGNED_OBSERVATIONS,
    ReturnModel, ReturnsEstimator,
};
pub use stress::{StressImpact, StressScenario, StressSeverity, run_stress_tests};
pub use var::{historical_var, parametric_var};
