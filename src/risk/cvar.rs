//! Conditional Value-at-Risk (expected shortfall).
//!
//! Empirical CVaR is the mean loss over the worst `(1-c)` fraction of a P&L
//! distribution; the parametric closed form is the normal expected shortfall.
//! Tail buckets below [`MIN_TAIL_SAMPLES`] outcomes are flagged so callers can
//! attach a low-confidence warning instead of silently trusting the number.

use crate::core::ConfidenceLevel;
use crate::math::normal_pdf;

/// Reliability floor for the empirical tail bucket.
pub const MIN_TAIL_SAMPLES: usize = 30;

/// Empirical expected-shortfall estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvarEstimate {
    /// Mean tail loss, loss-positive, floored at zero.
    pub cvar: f64,
    /// Number of outcomes in the tail bucket.
    pub tail_samples: usize,
}

impl CvarEstimate {
    pub fn is_low_confidence(&self) -> bool {
        self.tail_samples < MIN_TAIL_SAMPLES
    }
}

/// Empirical CVaR from a P&L sample at confidence `c`.
///
/// The tail bucket holds the worst `max(1, floor(n * (1-c)))` outcomes.
///
/// # Examples
/// ```rust
/// use quantrisk::core::ConfidenceLevel;
/// use quantrisk::risk::{conditional_var, historical_var};
///
/// let pnl = [-3.0, -2.0, -1.0, 0.5, 1.0];
/// let var_95 = historical_var(&pnl, ConfidenceLevel::C95, 1);
/// let es = conditional_var(&pnl, ConfidenceLevel::C95);
/// assert!(es.cvar >= var_95);
/// ```
pub fn conditional_var(pnl: &[f64], confidence: ConfidenceLevel) -> CvarEstimate {
    assert!(!pnl.is_empty(), "pnl must not be empty");

    let mut losses: Vec<f64> = pnl.iter().map(|x| -x).collect();
    losses.sort_by(|a, b| b.total_cmp(a));

    let tail_fraction = 1.0 - confidence.level();
    let tail_samples = ((losses.len() as f64 * tail_fraction).floor() as usize).max(1);

    let tail_mean = losses[..tail_samples].iter().sum::<f64>() / tail_samples as f64;

    CvarEstimate {
        cvar: tail_mean.max(0.0),
        tail_samples,
    }
}

/// Closed-form expected shortfall for a normal P&L model, as a currency
/// amount over `horizon_days`:
/// `(sigma * sqrt(h) * phi(z_c) / (1-c) - mean * h) * portfolio_value`.
pub fn parametric_cvar(
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

    let h = horizon_days as f64;
    let z = confidence.z_score();
    let tail = 1.0 - confidence.level();
    let es_sigma = sigma_daily * h.sqrt() * normal_pdf(z) / tail;
    ((es_sigma - mean_daily * h) * portfolio_value).max(0.0)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, StandardNormal};

    use super::*;
    use crate::risk::var::{historical_var, parametric_var};

    #[test]
    fn cvar_dominates_var_for_normal_sample() {
        let mut rng = StdRng::seed_from_u64(11);
        let pnl: Vec<f64> = (0..5000).map(|_| StandardNormal.sample(&mut rng)).collect();

        for confidence in [
            ConfidenceLevel::C90,
            ConfidenceLevel::C95,
            ConfidenceLevel::C99,
        ] {
            let var = historical_var(&pnl, confidence, 1);
            let es = conditional_var(&pnl, confidence);
            assert!(es.cvar >= var, "CVaR {} < VaR {var}", es.cvar);
        }
    }

    #[test]
    fn cvar_matches_standard_normal_reference() {
        let mut rng = StdRng::seed_from_u64(3);
        let pnl: Vec<f64> = (0..50_000).map(|_| StandardNormal.sample(&mut rng)).collect();

        // ES_95 for N(0,1) is phi(z_95) / 0.05 = 2.0627.
        let es = conditional_var(&pnl, ConfidenceLevel::C95);
        assert!((es.cvar - 2.0627).abs() < 0.1, "cvar={}", es.cvar);
        assert!(!es.is_low_confidence());
    }

    #[test]
    fn small_tail_flags_low_confidence() {
        let pnl: Vec<f64> = (0..100).map(|i| (i as f64) / 100.0 - 0.5).collect();
        let es = conditional_var(&pnl, ConfidenceLevel::C99);
        assert_eq!(es.tail_samples, 1);
        assert!(es.is_low_confidence());
    }

    #[test]
    fn parametric_cvar_dominates_parametric_var() {
        for confidence in [
            ConfidenceLevel::C90,
            ConfidenceLevel::C95,
            ConfidenceLevel::C99,
        ] {
            let var = parametric_var(0.0005, 0.02, confidence, 5, 1.0e6);
            let cvar = parametric_cvar(0.0005, 0.02, confidence, 5, 1.0e6);
            assert!(cvar >= var);
        }
    }

    #[test]
    fn parametric_cvar_matches_normal_es_formula() {
        let cvar = parametric_cvar(0.0, 1.0, ConfidenceLevel::C99, 1, 1.0);
        // phi(2.3263) / 0.01
        assert_relative_eq!(cvar, 2.665, epsilon = 5e-3);
    }
}
