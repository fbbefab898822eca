//! Historical and parametric Value-at-Risk.
//!
//! References:
//! - McNeil, Frey, Embrechts, *Quantitative Risk Management* (2005/2015).
//! - J.P. Morgan/Reuters, *RiskMetrics Technical Document* (1996).
//!
//! The module uses a loss-positive convention (`loss = -pnl`) and returns
//! non-negative VaR numbers. Horizon scaling follows the square-root-of-time
//! rule, which assumes i.i.d. daily returns; that is a modeling assumption,
//! not a universal truth, and both methods apply it consistently.

use crate::core::ConfidenceLevel;
use crate::math::quantile_linear;

/// Historical VaR from a one-day P&L sample, scaled to `horizon_days`.
///
/// VaR at confidence `c` is the negative of the `(1-c)` percentile of the P&L
/// sample (linear interpolation between order statistics), floored at zero.
///
/// # Examples
/// ```rust
/// use quantrisk::core::ConfidenceLevel;
/// use quantrisk::risk::historical_var;
///
/// let pnl = [-2.0, -1.0, 0.5, 1.0, -0.2];
/// let var_95 = historical_var(&pnl, ConfidenceLevel::C95, 1);
/// assert!(var_95 >= 0.0);
/// ```
pub fn historical_var(pnl: &[f64], confidence: ConfidenceLevel, horizon_days: u32) -> f64 {
    assert!(!pnl.is_empty(), "pnl must not be empty");

    let mut sample = pnl.to_vec();
    let q = quantile_linear(&mut sample, 1.0 - confidence.level());
    ((-q) * (horizon_days as f64).sqrt()).max(0.0)
}

/// Parametric (variance-covariance) VaR under a normal portfolio-return model.
///
/// `mean_daily` and `sigma_daily` are the daily portfolio return mean and
/// standard deviation; the result is a currency amount:
/// `(z_c * sigma * sqrt(h) - mean * h) * portfolio_value`, floored at zero.
pub fn parametric_var(
    mean_daily: f64,
    sigma_daily: f64,
    confidence: ConfidenceLevel,
    horizon_days: u32,
    portfolio_value: f64,
) -> f64 {
    assert!(
        sigma_daily.is_finite() && sigma_daily >= 0.0,
        "sigma_daily must be finite and >= 0"
    );
    assert!(
        portfolio_value.is_finite() && portfolio_value > 0.0,
        "portfolio_value must be finite and > 0"
    );

    let h = horizon_days as f64;
    let z = confidence.z_score();
    ((z * sigma_daily * h.sqrt() - mean_daily * h) * portfolio_value).max(0.0)
}
