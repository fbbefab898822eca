//! Summary risk statistics derived from a portfolio return series.

use crate::core::{RiskError, SharpeRatio};
use crate::math::{mean, sample_std_dev};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Volatility below this is treated as zero for ratio purposes.
const VOLATILITY_FLOOR: f64 = 1e-12;

/// Daily and annualized volatility of a return series.
///
/// Annualization multiplies by `sqrt(252)` under the i.i.d. daily return
/// assumption.
pub fn volatility(returns: &[f64]) -> Result<(f64, f64), RiskError> {
    if returns.len() < 2 {
        return Err(RiskError::InsufficientData(format!(
            "volatility requires at least 2 returns, got {}",
            returns.len()
        )));
    }
    let daily = sample_std_dev(returns);
    Ok((daily, daily * TRADING_DAYS_PER_YEAR.sqrt()))
}

/// Annualized Sharpe ratio, `(mu_annual - rf) / sigma_annual`.
///
/// A zero-volatility series has no meaningful ratio; the result is
/// [`SharpeRatio::Undefined`] rather than an infinity or a sentinel number.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> Result<SharpeRatio, RiskError> {
    let (daily_vol, annual_vol) = volatility(returns)?;
    if daily_vol < VOLATILITY_FLOOR {
        return Ok(SharpeRatio::Undefined);
    }
    let annual_mean = mean(returns) * TRADING_DAYS_PER_YEAR;
    Ok(SharpeRatio::Defined((annual_mean - risk_free_rate) / annual_vol))
}

/// Maximum drawdown of the cumulative growth path implied by `returns`.
///
/// Compounds `(1 + r_t)` and tracks the largest peak-to-trough decline as a
/// positive fraction. An all-gaining series has zero drawdown.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut level = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut worst = 0.0_f64;
    for r in returns {
        level *= 1.0 + r;
        if level > peak {
            peak = level;
        }
        let drawdown = (peak - level) / peak;
        if drawdown > worst {
            worst = drawdown;
        }
    }
    worst
}
