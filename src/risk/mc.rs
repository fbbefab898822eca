//! Monte Carlo simulation of portfolio outcomes.
//!
//! References:
//! - Glasserman (2004), *Monte Carlo Methods in Financial Engineering*.
//! - Joe and Kuo (2008) for low-discrepancy sequence background.
//!
//! Joint return samples come from independent standard normals correlated via
//! a Cholesky factor of the estimated covariance. A path's horizon portfolio
//! return is `w.mu * h + (w^T L) z * sqrt(h)`; only the projected shock
//! `(w^T L) z` is needed, so the factor is pre-multiplied by the weights and
//! each path reduces to one dot product.
//!
//! Two sampling modes:
//! - `Pseudo`: one xoshiro256++ stream per path index. Chunks parallelize
//!   across rayon workers, and because each path owns its stream, output is
//!   bit-identical for a fixed seed regardless of thread count.
//! - `QuasiSobol`: a single scrambled Sobol sequence of dimension equal to
//!   the asset count, mapped through the inverse normal CDF. Deterministic
//!   given seed and starting index, and converges faster per path.
//!
//! Percentile statistics require the full outcome distribution, so all paths
//! are merged into one buffer before any quantile is taken; per-worker
//! percentiles are never averaged.

use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::core::RiskError;
use crate::math::covariance::DEFAULT_REGULARIZATION_EPSILON;
use crate::math::{
    SOBOL_MAX_DIMENSIONS, SobolSequence, Xoshiro256Rng, factor_covariance, normal_inv_cdf,
    sample_standard_normal, stream_seed, uniform_open01,
};

/// Path-sampling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Pseudo-random per-path streams.
    Pseudo,
    /// Deterministic low-discrepancy (quasi-random) sequence.
    QuasiSobol,
}

/// Simulated P&L distribution plus generation diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPnl {
    /// Horizon P&L per path, in currency, generation order.
    pub pnl: Vec<f64>,
    pub requested_paths: usize,
    /// True when the deadline cut generation short.
    pub truncated: bool,
    /// True when the covariance diagonal needed a regularization bump.
    pub regularized: bool,
}

/// Monte Carlo engine configuration. Sequence state is scoped per
/// [`MonteCarloEngine::simulate`] call; the engine itself is immutable.
#[derive(Debug, Clone)]
pub struct MonteCarloEngine {
    pub num_paths: usize,
    pub seed: u64,
    /// Starting index into the quasi-random sequence.
    pub start_index: u64,
    pub mode: SamplingMode,
    /// Optional wall-clock budget; generation stops at the next chunk
    /// boundary once exceeded.
    pub deadline: Option<Duration>,
    pub chunk_size: usize,
}

impl MonteCarloEngine {
    pub fn new(num_paths: usize, seed: u64) -> Self {
        Self {
            num_paths,
            seed,
            start_index: 0,
            mode: SamplingMode::Pseudo,
            deadline: None,
            chunk_size: 4_096,
        }
    }

    pub fn with_mode(mut self, mode: SamplingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_start_index(mut self, start_index: u64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Simulates the horizon P&L distribution of the portfolio.
    ///
    /// Fails with [`RiskError::CovarianceSingular`] when the covariance
    /// cannot be factorized even after one regularization retry; callers fall
    /// back to the historical method with a warning.
    pub fn simulate(
        &self,
        mean: &[f64],
        covariance: &[Vec<f64>],
        weights: &[f64],
        horizon_days: u32,
        portfolio_value: f64,
    ) -> Result<SimulatedPnl, RiskError> {
        let n_assets = weights.len();
        if mean.len() != n_assets || covariance.len() != n_assets {
            return Err(RiskError::Validation(
                "mean/covariance dimensions do not match weights".to_string(),
            ));
        }
        if self.num_paths == 0 {
            return Err(RiskError::Validation("num_paths must be > 0".to_string()));
        }
        if self.mode == SamplingMode::QuasiSobol && n_assets > SOBOL_MAX_DIMENSIONS {
            return Err(RiskError::Validation(format!(
                "quasi-random sampling supports at most {SOBOL_MAX_DIMENSIONS} assets, got {n_assets}"
            )));
        }

        let (chol, regularized) = factor_covariance(covariance, DEFAULT_REGULARIZATION_EPSILON)?;

        // Project the factor through the weights once: shock = (w^T L) z.
        let mut exposure = vec![0.0_f64; n_assets];
        for (j, e) in exposure.iter_mut().enumerate() {
            *e = (j..n_assets).map(|i| weights[i] * chol[i][j]).sum();
        }

        let h = horizon_days as f64;
        let drift = weights.iter().zip(mean.iter()).map(|(w, m)| w * m).sum::<f64>() * h;
        let sqrt_h = h.sqrt();

        let started = Instant::now();
        let mut pnl = Vec::with_capacity(self.num_paths);
        let mut truncated = false;

        match self.mode {
            SamplingMode::Pseudo => {
                self.run_pseudo(&exposure, drift, sqrt_h, portfolio_value, started, &mut pnl,
                    &mut truncated);
            }
            SamplingMode::QuasiSobol => {
                self.run_quasi(&exposure, drift, sqrt_h, portfolio_value, started, &mut pnl,
                    &mut truncated);
            }
        }

        Ok(SimulatedPnl {
            pnl,
            requested_paths: self.num_paths,
            truncated,
            regularized,
        })
    }

    fn run_pseudo(
        &self,
        exposure: &[f64],
        drift: f64,
        sqrt_h: f64,
        portfolio_value: f64,
        started: Instant,
        pnl: &mut Vec<f64>,
        truncated: &mut bool,
    ) {
        let n_assets = exposure.len();
        let seed = self.seed;

        let path_pnl = |path: usize| -> f64 {
            let mut rng = Xoshiro256Rng::seed_from_u64(stream_seed(seed, path));
            let mut shock = 0.0;
            for e in exposure.iter().take(n_assets) {
                shock += e * sample_standard_normal(&mut rng);
            }
            (drift + shock * sqrt_h) * portfolio_value
        };

        let mut next = 0usize;
        while next < self.num_paths {
            let end = (next + self.chunk_size).min(self.num_paths);

            #[cfg(feature = "parallel")]
            pnl.par_extend((next..end).into_par_iter().map(path_pnl));

            #[cfg(not(feature = "parallel"))]
            pnl.extend((next..end).map(path_pnl));

            next = end;
            if self.expired(started) && next < self.num_paths {
                *truncated = true;
                break;
            }
        }
    }

    fn run_quasi(
        &self,
        exposure: &[f64],
        drift: f64,
        sqrt_h: f64,
        portfolio_value: f64,
        started: Instant,
        pnl: &mut Vec<f64>,
        truncated: &mut bool,
    ) {
        let n_assets = exposure.len();
        let mut sequence = SobolSequence::new(n_assets, self.seed);
        sequence.skip_points(self.start_index);

        let mut point = vec![0.0_f64; n_assets];
        let mut generated = 0usize;

        while generated < self.num_paths {
            let end = (generated + self.chunk_size).min(self.num_paths);
            for _ in generated..end {
                if !sequence.next_into(&mut point) {
                    break;
                }
                let mut shock = 0.0;
                for (e, u) in exposure.iter().zip(point.iter()) {
                    shock += e * normal_inv_cdf(uniform_open01(*u));
                }
                pnl.push((drift + shock * sqrt_h) * portfolio_value);
            }
            generated = end;
            if self.expired(started) && generated < self.num_paths {
                *truncated = true;
                break;
            }
        }
    }

    #[inline]
    fn expired(&self, started: Instant) -> bool {
        self.deadline
            .is_some_and(|budget| started.elapsed() >= budget)
    }
}
