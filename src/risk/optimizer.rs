//! Mean-variance portfolio optimization.
//!
//! Objective: maximize `mu.w - gamma * w' Sigma w` subject to the budget
//! constraint `sum(w) = 1`, per-asset bounds, and group exposure limits.
//!
//! Two solution paths:
//! - When only the budget constraint binds, the problem is an equality-
//!   constrained quadratic program solved exactly via its bordered KKT
//!   system.
//! - When a bound or group limit is active at the exact solution, a
//!   stochastic annealing search takes over: pairwise mass-transfer
//!   proposals keep the budget constraint satisfied by construction,
//!   worsening moves are accepted with Metropolis probability under a
//!   geometrically cooling temperature, and the search stops once the best
//!   objective stops improving.
//!
//! Non-convergence is not an error: the best weights found are returned with
//! a warning so callers can decide whether to accept them.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::warn;

use crate::core::{RiskError, RiskWarning};
use crate::math::portfolio_variance;

/// Optimizer weights must satisfy the budget constraint within this.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// Cap on total weight across a named set of assets.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupLimit {
    pub name: String,
    /// Indices into the asset universe.
    pub assets: Vec<usize>,
    pub max_weight: f64,
}

/// Feasible region for the weight vector.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationConstraints {
    /// Per-asset `(lower, upper)` bounds.
    pub bounds: Vec<(f64, f64)>,
    pub groups: Vec<GroupLimit>,
}

impl OptimizationConstraints {
    /// Long-only, fully-invested defaults: each weight in `[0, 1]`.
    pub fn long_only(n_assets: usize) -> Self {
        Self {
            bounds: vec![(0.0, 1.0); n_assets],
            groups: Vec::new(),
        }
    }

    /// Checks the region is well-formed and can contain a unit-sum vector.
    pub fn validate(&self, n_assets: usize) -> Result<(), RiskError> {
        if self.bounds.len() != n_assets {
            return Err(RiskError::Validation(format!(
                "expected {} bounds, got {}",
                n_assets,
                self.bounds.len()
            )));
        }
        let mut lo_sum = 0.0;
        let mut hi_sum = 0.0;
        for (i, &(lo, hi)) in self.bounds.iter().enumerate() {
            if !(lo.is_finite() && hi.is_finite()) || lo > hi || lo < 0.0 || hi > 1.0 {
                return Err(RiskError::Validation(format!(
                    "invalid bound ({lo}, {hi}) for asset {i}"
                )));
            }
            lo_sum += lo;
            hi_sum += hi;
        }
        if lo_sum > 1.0 + WEIGHT_SUM_TOLERANCE || hi_sum < 1.0 - WEIGHT_SUM_TOLERANCE {
            return Err(RiskError::Validation(format!(
                "bounds admit no unit-sum weights (sum range [{lo_sum}, {hi_sum}])"
            )));
        }
        for group in &self.groups {
            if group.assets.iter().any(|&i| i >= n_assets) {
                return Err(RiskError::Validation(format!(
                    "group '{}' references an asset outside the universe",
                    group.name
                )));
            }
            let floor: f64 = group.assets.iter().map(|&i| self.bounds[i].0).sum();
            if group.max_weight < floor {
                return Err(RiskError::Validation(format!(
                    "group '{}' limit {} is below its lower-bound floor {}",
                    group.name, group.max_weight, floor
                )));
            }
        }
        Ok(())
    }

    fn satisfied_by(&self, weights: &[f64]) -> bool {
        let in_bounds = weights
            .iter()
            .zip(self.bounds.iter())
            .all(|(&w, &(lo, hi))| w >= lo - 1e-12 && w <= hi + 1e-12);
        in_bounds
            && self.groups.iter().all(|g| {
                g.assets.iter().map(|&i| weights[i]).sum::<f64>() <= g.max_weight + 1e-12
            })
    }
}

/// Annealing schedule parameters.
#[derive(Debug, Clone)]
pub struct AnnealingOptions {
    pub initial_temperature: f64,
    /// Geometric cooling factor applied each iteration, in (0, 1).
    pub cooling: f64,
    pub max_iterations: usize,
    /// Iterations without meaningful improvement before stopping.
    pub patience: usize,
    /// Improvement below this does not reset patience.
    pub tolerance: f64,
    /// Scale of the half-normal mass transfer per proposal.
    pub step_size: f64,
    pub seed: u64,
}

impl Default for AnnealingOptions {
    fn default() -> Self {
        Self {
            initial_temperature: 1.0,
            cooling: 0.999,
            max_iterations: 20_000,
            patience: 500,
            tolerance: 1e-9,
            step_size: 0.05,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Exact KKT solution; no inequality constraint was active.
    ClosedForm,
    /// Annealing search stalled below the improvement tolerance.
    ObjectiveTolerance,
    /// Iteration budget exhausted before the search stalled.
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub weights: Vec<f64>,
    pub objective: f64,
    pub converged: bool,
    pub iterations: usize,
    pub reason: TerminationReason,
    pub warnings: Vec<RiskWarning>,
}

/// Mean-variance optimizer with configurable risk aversion.
#[derive(Debug, Clone)]
pub struct MeanVarianceOptimizer {
    pub risk_aversion: f64,
    pub options: AnnealingOptions,
}

impl MeanVarianceOptimizer {
    pub fn new(risk_aversion: f64) -> Self {
        Self {
            risk_aversion,
            options: AnnealingOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AnnealingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn optimize(
        &self,
        expected_returns: &[f64],
        covariance: &[Vec<f64>],
        constraints: &OptimizationConstraints,
    ) -> Result<OptimizationResult, RiskError> {
        let n = expected_returns.len();
        if n == 0 {
            return Err(RiskError::Validation("empty asset universe".to_string()));
        }
        if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
            return Err(RiskError::Validation(
                "covariance dimensions do not match expected returns".to_string(),
            ));
        }
        if self.risk_aversion <= 0.0 {
            return Err(RiskError::Validation(
                "risk aversion must be positive".to_string(),
            ));
        }
        constraints.validate(n)?;
        let proposal = Normal::new(0.0, self.options.step_size)
            .map_err(|e| RiskError::Validation(format!("invalid annealing step size: {e}")))?;

        if let Some(exact) = self.solve_kkt(expected_returns, covariance)? {
            if constraints.satisfied_by(&exact) {
                let objective = self.objective(&exact, expected_returns, covariance);
                return Ok(OptimizationResult {
                    weights: exact,
                    objective,
                    converged: true,
                    iterations: 0,
                    reason: TerminationReason::ClosedForm,
                    warnings: Vec::new(),
                });
            }
        }

        let start = self.feasible_start(expected_returns, constraints)?;
        Ok(self.anneal(expected_returns, covariance, constraints, start, proposal))
    }

    fn objective(&self, w: &[f64], mu: &[f64], cov: &[Vec<f64>]) -> f64 {
        let ret: f64 = w.iter().zip(mu.iter()).map(|(wi, mi)| wi * mi).sum();
        ret - self.risk_aversion * portfolio_variance(w, cov)
    }

    /// Solves the budget-only problem exactly via its bordered KKT system:
    /// `[2*gamma*Sigma, 1; 1', 0] [w; lambda] = [mu; 1]`.
    ///
    /// Returns `None` when the system is singular (degenerate covariance);
    /// the caller proceeds to the stochastic search.
    fn solve_kkt(&self, mu: &[f64], cov: &[Vec<f64>]) -> Result<Option<Vec<f64>>, RiskError> {
        let n = mu.len();
        let mut kkt = DMatrix::<f64>::zeros(n + 1, n + 1);
        for i in 0..n {
            for j in 0..n {
                kkt[(i, j)] = 2.0 * self.risk_aversion * cov[i][j];
            }
            kkt[(i, n)] = 1.0;
            kkt[(n, i)] = 1.0;
        }
        let mut rhs = DVector::<f64>::zeros(n + 1);
        for i in 0..n {
            rhs[i] = mu[i];
        }
        rhs[n] = 1.0;

        match kkt.lu().solve(&rhs) {
            Some(solution) => Ok(Some(solution.as_slice()[..n].to_vec())),
            None => Ok(None),
        }
    }

    /// Lower bounds first, then remaining mass to the highest expected
    /// return with spare capacity. Fails when the bounds and group caps
    /// together leave no room for a fully-invested portfolio.
    fn feasible_start(
        &self,
        mu: &[f64],
        constraints: &OptimizationConstraints,
    ) -> Result<Vec<f64>, RiskError> {
        let n = mu.len();
        let mut w: Vec<f64> = constraints.bounds.iter().map(|&(lo, _)| lo).collect();
        let mut remaining = 1.0 - w.iter().sum::<f64>();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| mu[b].total_cmp(&mu[a]));

        for &i in &order {
            if remaining <= 0.0 {
                break;
            }
            let mut room = constraints.bounds[i].1 - w[i];
            for g in &constraints.groups {
                if g.assets.contains(&i) {
                    let used: f64 = g.assets.iter().map(|&k| w[k]).sum();
                    room = room.min(g.max_weight - used);
                }
            }
            let add = remaining.min(room.max(0.0));
            w[i] += add;
            remaining -= add;
        }

        if remaining > WEIGHT_SUM_TOLERANCE {
            return Err(RiskError::Validation(
                "constraints admit no fully-invested portfolio".to_string(),
            ));
        }
        Ok(w)
    }

    fn anneal(
        &self,
        mu: &[f64],
        cov: &[Vec<f64>],
        constraints: &OptimizationConstraints,
        start: Vec<f64>,
        proposal: Normal<f64>,
    ) -> OptimizationResult {
        let opts = &self.options;
        let mut rng = StdRng::seed_from_u64(opts.seed);

        let mut current = start;
        let mut current_obj = self.objective(&current, mu, cov);
        let mut best = current.clone();
        let mut best_obj = current_obj;

        let n = mu.len();
        let mut temperature = opts.initial_temperature;
        let mut stale = 0usize;
        let mut iterations = 0usize;

        for iter in 0..opts.max_iterations {
            iterations = iter + 1;

            // Transfer mass between a random pair; the sum is invariant.
            let i = rng.random_range(0..n);
            let mut j = rng.random_range(0..n);
            if n > 1 {
                while j == i {
                    j = rng.random_range(0..n);
                }
            }
            let delta = proposal.sample(&mut rng).abs();

            let mut candidate = current.clone();
            candidate[i] -= delta;
            candidate[j] += delta;

            if !constraints.satisfied_by(&candidate) {
                temperature *= opts.cooling;
                stale += 1;
                if stale >= opts.patience {
                    break;
                }
                continue;
            }

            let candidate_obj = self.objective(&candidate, mu, cov);
            let accept = candidate_obj > current_obj
                || rng.random::<f64>() < ((candidate_obj - current_obj) / temperature).exp();
            if accept {
                current = candidate;
                current_obj = candidate_obj;
            }

            if current_obj > best_obj + opts.tolerance {
                best_obj = current_obj;
                best = current.clone();
                stale = 0;
            } else {
                stale += 1;
                if stale >= opts.patience {
                    break;
                }
            }

            temperature *= opts.cooling;
        }

        let converged = stale >= opts.patience;
        let (reason, warnings) = if converged {
            (TerminationReason::ObjectiveTolerance, Vec::new())
        } else {
            warn!(iterations, objective = best_obj, "optimizer hit iteration cap");
            (
                TerminationReason::MaxIterations,
                vec![RiskWarning::NonConvergent { iterations }],
            )
        };

        OptimizationResult {
            weights: best,
            objective: best_obj,
            converged,
            iterations,
            reason,
            warnings,
        }
    }
}
