//! Top-level risk calculation engine.
//!
//! Orchestrates the pipeline: validate inputs, fetch and align historical
//! returns, estimate the return model, run the requested method, and package
//! metrics with any degradation warnings. Each calculation is a pure function
//! of the portfolio snapshot, the request, and the provider's data; the
//! engine holds no mutable state, so independent requests parallelize freely.
//!
//! Collaborators are injected at construction: a [`MarketDataProvider`] is
//! required, while the cache and audit channel are optional and the engine
//! behaves identically without them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::{
    AuditLogger, CacheProvider, ConfidenceLevel, MarketDataProvider, Methodology, Portfolio,
    RiskCalculationRequest, RiskCalculationResult, RiskError, RiskMetrics, RiskMethod,
    RiskWarning, SharpeRatio,
};
use crate::math::{mean, portfolio_variance, sample_std_dev};
use crate::risk::cvar::{conditional_var, parametric_cvar};
use crate::risk::mc::{MonteCarloEngine, SamplingMode, SimulatedPnl};
use crate::risk::metrics::{TRADING_DAYS_PER_YEAR, max_drawdown, sharpe_ratio, volatility};
use crate::risk::returns::{CovarianceEstimator, ReturnModel, ReturnsEstimator};
use crate::risk::var::{historical_var, parametric_var};

/// A single position above this weight triggers a concentration warning.
pub const CONCENTRATION_THRESHOLD: f64 = 0.30;

/// Portfolios with fewer positions than this get a diversification warning.
pub const MIN_DIVERSIFIED_POSITIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct RiskEngineConfig {
    /// Historical window requested from the data provider, in trading days.
    pub lookback_days: usize,
    pub covariance: CovarianceEstimator,
    /// Wall-clock budget for simulation; exceeding it degrades precision
    /// rather than failing.
    pub sla: Option<Duration>,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 252,
            covariance: CovarianceEstimator::default(),
            sla: Some(Duration::from_secs(2)),
        }
    }
}

/// Risk calculation engine with injected collaborators.
pub struct RiskEngine {
    market_data: Arc<dyn MarketDataProvider>,
    cache: Option<Arc<dyn CacheProvider>>,
    audit: Option<Arc<dyn AuditLogger>>,
    config: RiskEngineConfig,
}

impl RiskEngine {
    pub fn new(market_data: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            market_data,
            cache: None,
            audit: None,
            config: RiskEngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RiskEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheProvider>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Canonical cache key over everything that determines the result.
    ///
    /// Positions are sorted by symbol so permutations of the same portfolio
    /// share a fingerprint.
    pub fn fingerprint(portfolio: &Portfolio, request: &RiskCalculationRequest) -> String {
        let mut positions: Vec<_> = portfolio.positions.iter().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut key = String::with_capacity(64 + positions.len() * 24);
        for p in positions {
            key.push_str(&format!("{}:{}:{};", p.symbol, p.weight, p.market_value));
        }
        key.push_str(&format!(
            "|{}|{}|{}|{}|{}",
            request.method.as_str(),
            request.confidence_level.level(),
            request.time_horizon_days,
            request.num_simulations,
            request.seed,
        ));
        key
    }

    /// Runs one risk calculation, going through the cache when one is
    /// configured.
    pub fn calculate(
        &self,
        portfolio: &Portfolio,
        request: &RiskCalculationRequest,
    ) -> Result<RiskCalculationResult, RiskError> {
        portfolio.validate()?;
        request.validate()?;

        let result = match &self.cache {
            Some(cache) => {
                let fingerprint = Self::fingerprint(portfolio, request);
                let mut compute = || self.compute(portfolio, request);
                cache.get_or_compute(&fingerprint, &mut compute)?
            }
            None => self.compute(portfolio, request)?,
        };

        if let Some(audit) = &self.audit {
            audit.record(&result, request, Utc::now());
        }
        Ok(result)
    }

    fn compute(
        &self,
        portfolio: &Portfolio,
        request: &RiskCalculationRequest,
    ) -> Result<RiskCalculationResult, RiskError> {
        let started = Instant::now();
        debug!(
            portfolio = %portfolio.id,
            method = request.method.as_str(),
            simulations = request.num_simulations,
            "starting risk calculation"
        );
        let mut warnings = advisory_warnings(portfolio);

        let symbols = portfolio.symbols();
        let weights = portfolio.weights();
        let value = portfolio.total_value();
        let confidence = request.confidence_level;
        let horizon = request.time_horizon_days;

        let series = self
            .market_data
            .get_returns(&symbols, self.config.lookback_days)?;
        let model = ReturnsEstimator::new(self.config.covariance).estimate(&series, &symbols)?;

        let mut method = request.method;
        let metrics = match method {
            RiskMethod::Historical => {
                historical_metrics(&model, &weights, value, confidence, horizon, request, &mut warnings)
            }
            RiskMethod::Parametric => {
                parametric_metrics(&model, &weights, value, confidence, horizon, request)
            }
            RiskMethod::MonteCarlo | RiskMethod::QuantumMc => {
                let mode = if method.quantum_enhanced() {
                    SamplingMode::QuasiSobol
                } else {
                    SamplingMode::Pseudo
                };
                let mc = MonteCarloEngine::new(request.num_simulations, request.seed)
                    .with_mode(mode)
                    .with_deadline(self.config.sla);

                match monte_carlo_pnl(&mc, &model, &weights, horizon, value, &mut warnings)? {
                    Some(simulated) => simulated_metrics(
                        &simulated.pnl,
                        value,
                        horizon,
                        confidence,
                        request.risk_free_rate,
                        &mut warnings,
                    ),
                    None => {
                        // Covariance unusable even after regularization.
                        method = RiskMethod::Historical;
                        historical_metrics(
                            &model, &weights, value, confidence, horizon, request, &mut warnings,
                        )
                    }
                }
            }
        }?;

        let computation_time_ms = started.elapsed().as_secs_f64() * 1_000.0;
        info!(
            portfolio = %portfolio.id,
            method = method.as_str(),
            confidence = confidence.level(),
            horizon_days = horizon,
            var = metrics.var,
            cvar = metrics.cvar,
            warnings = warnings.len(),
            elapsed_ms = computation_time_ms,
            "risk calculation complete"
        );

        Ok(RiskCalculationResult {
            risk_metrics: metrics,
            methodology: Methodology {
                model_type: method,
                confidence_level: confidence,
                time_horizon_days: horizon,
                quantum_enhancement: method.quantum_enhanced(),
            },
            warnings,
            computation_time_ms,
        })
    }
}

/// Structurally valid but risky portfolio shapes get advisory warnings.
fn advisory_warnings(portfolio: &Portfolio) -> Vec<RiskWarning> {
    let mut warnings = Vec::new();
    for p in &portfolio.positions {
        if p.weight > CONCENTRATION_THRESHOLD {
            warnings.push(RiskWarning::HighConcentration {
                symbol: p.symbol.clone(),
                weight: p.weight,
            });
        }
    }
    if portfolio.positions.len() < MIN_DIVERSIFIED_POSITIONS {
        warnings.push(RiskWarning::LowDiversification {
            positions: portfolio.positions.len(),
        });
    }
    warnings
}

/// Runs the simulation, translating a singular covariance into a historical
/// fallback (`None`) with the appropriate warnings attached.
fn monte_carlo_pnl(
    mc: &MonteCarloEngine,
    model: &ReturnModel,
    weights: &[f64],
    horizon: u32,
    value: f64,
    warnings: &mut Vec<RiskWarning>,
) -> Result<Option<SimulatedPnl>, RiskError> {
    match mc.simulate(&model.mean, &model.covariance, weights, horizon, value) {
        Ok(simulated) => {
            if simulated.regularized {
                warnings.push(RiskWarning::CovarianceRegularized);
            }
            if simulated.truncated {
                warn!(
                    completed = simulated.pnl.len(),
                    requested = simulated.requested_paths,
                    "simulation deadline reached, returning partial estimate"
                );
                warnings.push(RiskWarning::DegradedPrecision {
                    completed: simulated.pnl.len(),
                    requested: simulated.requested_paths,
                });
            }
            Ok(Some(simulated))
        }
        Err(RiskError::CovarianceSingular(reason)) => {
            warn!(%reason, "falling back to historical simulation");
            warnings.push(RiskWarning::HistoricalFallback);
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// Historical simulation: weights applied to each aligned return row, with
/// square-root-of-time horizon scaling (an i.i.d. daily-return assumption).
fn historical_metrics(
    model: &ReturnModel,
    weights: &[f64],
    value: f64,
    confidence: ConfidenceLevel,
    horizon: u32,
    request: &RiskCalculationRequest,
    warnings: &mut Vec<RiskWarning>,
) -> Result<RiskMetrics, RiskError> {
    let daily_returns = model.aligned.portfolio_returns(weights);
    let daily_pnl: Vec<f64> = daily_returns.iter().map(|r| r * value).collect();

    let var = historical_var(&daily_pnl, confidence, horizon);
    let estimate = conditional_var(&daily_pnl, confidence);
    if estimate.is_low_confidence() {
        warnings.push(RiskWarning::LowConfidenceCvar {
            tail_samples: estimate.tail_samples,
        });
    }
    let cvar = estimate.cvar * (horizon as f64).sqrt();

    let (volatility_daily, volatility_annual) = volatility(&daily_returns)?;
    Ok(RiskMetrics {
        var,
        cvar,
        volatility_daily,
        volatility_annual,
        sharpe_ratio: sharpe_ratio(&daily_returns, request.risk_free_rate)?,
        max_drawdown: max_drawdown(&daily_returns),
    })
}

/// Variance-covariance method under a normal portfolio-return model.
fn parametric_metrics(
    model: &ReturnModel,
    weights: &[f64],
    value: f64,
    confidence: ConfidenceLevel,
    horizon: u32,
    request: &RiskCalculationRequest,
) -> Result<RiskMetrics, RiskError> {
    let mean_daily: f64 = weights
        .iter()
        .zip(model.mean.iter())
        .map(|(w, m)| w * m)
        .sum();
    let sigma_daily = portfolio_variance(weights, &model.covariance).sqrt();

    let var = parametric_var(mean_daily, sigma_daily, confidence, horizon, value);
    let cvar = parametric_cvar(mean_daily, sigma_daily, confidence, horizon, value);

    let daily_returns = model.aligned.portfolio_returns(weights);
    let (volatility_daily, volatility_annual) = volatility(&daily_returns)?;
    Ok(RiskMetrics {
        var,
        cvar,
        volatility_daily,
        volatility_annual,
        sharpe_ratio: sharpe_ratio(&daily_returns, request.risk_free_rate)?,
        max_drawdown: max_drawdown(&daily_returns),
    })
}

/// Metrics from a simulated horizon P&L distribution.
///
/// Simulated outcomes are horizon returns, so the daily volatility divides
/// out `sqrt(h)` and the mean divides out `h` before annualization.
fn simulated_metrics(
    pnl: &[f64],
    value: f64,
    horizon: u32,
    confidence: ConfidenceLevel,
    risk_free_rate: f64,
    warnings: &mut Vec<RiskWarning>,
) -> Result<RiskMetrics, RiskError> {
    if pnl.len() < 2 {
        return Err(RiskError::Numerical(
            "simulation produced too few paths for metrics".to_string(),
        ));
    }

    // P&L is already at the requested horizon.
    let var = historical_var(pnl, confidence, 1);
    let estimate = conditional_var(pnl, confidence);
    if estimate.is_low_confidence() {
        warnings.push(RiskWarning::LowConfidenceCvar {
            tail_samples: estimate.tail_samples,
        });
    }

    let horizon_returns: Vec<f64> = pnl.iter().map(|p| p / value).collect();
    let h = horizon as f64;
    let volatility_daily = sample_std_dev(&horizon_returns) / h.sqrt();
    let volatility_annual = volatility_daily * TRADING_DAYS_PER_YEAR.sqrt();

    let sharpe = if volatility_daily < 1e-12 {
        SharpeRatio::Undefined
    } else {
        let annual_mean = mean(&horizon_returns) / h * TRADING_DAYS_PER_YEAR;
        SharpeRatio::Defined((annual_mean - risk_free_rate) / volatility_annual)
    };

    Ok(RiskMetrics {
        var,
        cvar: estimate.cvar,
        volatility_daily,
        volatility_annual,
        sharpe_ratio: sharpe,
        max_drawdown: max_drawdown(&horizon_returns),
    })
}

/// In-process [`CacheProvider`] with the single-flight guarantee: concurrent
/// calls for one fingerprint share a single computation, later calls reuse
/// the stored result. Errors are never cached, so a transient data failure
/// does not poison the key.
#[derive(Default)]
pub struct SingleFlightCache {
    entries: Mutex<HashMap<String, Arc<OnceLock<Result<RiskCalculationResult, RiskError>>>>>,
}

impl SingleFlightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<
        '_,
        HashMap<String, Arc<OnceLock<Result<RiskCalculationResult, RiskError>>>>,
    > {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheProvider for SingleFlightCache {
    fn get_or_compute(
        &self,
        fingerprint: &str,
        compute: &mut dyn FnMut() -> Result<RiskCalculationResult, RiskError>,
    ) -> Result<RiskCalculationResult, RiskError> {
        let cell = self
            .lock()
            .entry(fingerprint.to_string())
            .or_default()
            .clone();

        // OnceLock blocks concurrent initializers, so exactly one caller
        // runs `compute` for this cell.
        let result = cell.get_or_init(|| compute()).clone();

        if result.is_err() {
            let mut entries = self.lock();
            if let Some(stored) = entries.get(fingerprint) {
                if Arc::ptr_eq(stored, &cell) {
                    entries.remove(fingerprint);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    use super::*;
    use crate::core::{Position, ReturnSeries};

    /// Deterministic synthetic daily returns, volatile enough to avoid the
    /// degenerate zero-variance path.
    struct FixtureProvider {
        calls: AtomicUsize,
        days: usize,
    }

    impl FixtureProvider {
        fn new(days: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                days,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl MarketDataProvider for FixtureProvider {
        fn get_returns(
            &self,
            symbols: &[String],
            _lookback_days: usize,
        ) -> Result<ReturnSeries, RiskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let mut series = ReturnSeries::default();
            for (k, symbol) in symbols.iter().enumerate() {
                let observations = (0..self.days)
                    .map(|t| {
                        let date = start + chrono::Days::new(t as u64);
                        let r = 0.01 * ((t + 3 * k + 1) as f64).sin()
                            + 0.002 * ((2 * t + k) as f64).cos();
                        (date, r)
                    })
                    .collect();
                series.insert(symbol.clone(), observations);
            }
            Ok(series)
        }
    }

    fn two_asset_portfolio() -> Portfolio {
        Portfolio::new(
            "test",
            vec![
                Position::new("AAPL", 0.5, 500_000.0),
                Position::new("GOOGL", 0.5, 500_000.0),
            ],
        )
    }

    fn engine(days: usize) -> (RiskEngine, Arc<FixtureProvider>) {
        let provider = Arc::new(FixtureProvider::new(days));
        (RiskEngine::new(provider.clone()), provider)
    }

    #[test]
    fn parametric_result_has_positive_var_and_cvar_dominance() {
        let (engine, _) = engine(120);
        let request = RiskCalculationRequest::new(
            ConfidenceLevel::C95,
            1,
            RiskMethod::Parametric,
        );
        let result = engine.calculate(&two_asset_portfolio(), &request).unwrap();

        assert!(result.risk_metrics.var > 0.0);
        assert!(result.risk_metrics.cvar >= result.risk_metrics.var);
        assert!(!result.methodology.quantum_enhancement);
        assert_eq!(result.methodology.model_type, RiskMethod::Parametric);
    }

    #[test]
    fn monte_carlo_approaches_parametric() {
        let (engine, _) = engine(120);
        let portfolio = two_asset_portfolio();

        let parametric = engine
            .calculate(
                &portfolio,
                &RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::Parametric),
            )
            .unwrap();
        let mc = engine
            .calculate(
                &portfolio,
                &RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::MonteCarlo)
                    .with_num_simulations(100_000),
            )
            .unwrap();

        assert_relative_eq!(
            mc.risk_metrics.var,
            parametric.risk_metrics.var,
            max_relative = 0.05
        );
    }

    #[test]
    fn quantum_mc_sets_methodology_flag_and_is_deterministic() {
        let (engine, _) = engine(120);
        let portfolio = two_asset_portfolio();
        let request =
            RiskCalculationRequest::new(ConfidenceLevel::C99, 5, RiskMethod::QuantumMc)
                .with_seed(7);

        let a = engine.calculate(&portfolio, &request).unwrap();
        let b = engine.calculate(&portfolio, &request).unwrap();

        assert!(a.methodology.quantum_enhancement);
        assert_eq!(a.risk_metrics.var, b.risk_metrics.var);
        assert_eq!(a.risk_metrics.cvar, b.risk_metrics.cvar);
    }

    #[test]
    fn concentrated_two_position_portfolio_gets_advisories() {
        let warnings = advisory_warnings(&Portfolio::new(
            "conc",
            vec![
                Position::new("AAPL", 0.8, 800_000.0),
                Position::new("GOOGL", 0.2, 200_000.0),
            ],
        ));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, RiskWarning::HighConcentration { symbol, .. } if symbol == "AAPL")));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, RiskWarning::LowDiversification { positions: 2 })));
    }

    #[test]
    fn singular_covariance_falls_back_to_historical() {
        let (engine, _) = engine(120);
        let portfolio = two_asset_portfolio();
        let symbols = portfolio.symbols();
        let series = engine.market_data.get_returns(&symbols, 252).unwrap();
        let mut model = ReturnsEstimator::default().estimate(&series, &symbols).unwrap();
        model.covariance = vec![vec![-1.0, 0.0], vec![0.0, -1.0]];

        let mc = MonteCarloEngine::new(10_000, 1);
        let mut warnings = Vec::new();
        let outcome =
            monte_carlo_pnl(&mc, &model, &portfolio.weights(), 1, 1.0e6, &mut warnings).unwrap();

        assert!(outcome.is_none());
        assert_eq!(warnings, vec![RiskWarning::HistoricalFallback]);
    }

    #[test]
    fn zero_deadline_attaches_degraded_precision_warning() {
        let provider = Arc::new(FixtureProvider::new(120));
        let engine = RiskEngine::new(provider).with_config(RiskEngineConfig {
            sla: Some(Duration::ZERO),
            ..RiskEngineConfig::default()
        });
        let request = RiskCalculationRequest::new(
            ConfidenceLevel::C95,
            1,
            RiskMethod::MonteCarlo,
        )
        .with_num_simulations(100_000);

        let result = engine.calculate(&two_asset_portfolio(), &request).unwrap();
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, RiskWarning::DegradedPrecision { .. })));
    }

    #[test]
    fn fingerprint_is_order_insensitive_and_parameter_sensitive() {
        let a = two_asset_portfolio();
        let b = Portfolio::new(
            "test",
            vec![
                Position::new("GOOGL", 0.5, 500_000.0),
                Position::new("AAPL", 0.5, 500_000.0),
            ],
        );
        let request = RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::Parametric);

        assert_eq!(
            RiskEngine::fingerprint(&a, &request),
            RiskEngine::fingerprint(&b, &request)
        );
        assert_ne!(
            RiskEngine::fingerprint(&a, &request),
            RiskEngine::fingerprint(&a, &request.clone().with_seed(99))
        );
    }

    #[test]
    fn cache_avoids_recomputation_for_identical_requests() {
        let provider = Arc::new(FixtureProvider::new(120));
        let engine = RiskEngine::new(provider.clone())
            .with_cache(Arc::new(SingleFlightCache::new()));
        let request = RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::Parametric);
        let portfolio = two_asset_portfolio();

        let first = engine.calculate(&portfolio, &request).unwrap();
        let second = engine.calculate(&portfolio, &request).unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(first.risk_metrics, second.risk_metrics);
    }

    #[test]
    fn cache_does_not_store_errors() {
        struct FailingProvider;
        impl MarketDataProvider for FailingProvider {
            fn get_returns(
                &self,
                _symbols: &[String],
                _lookback_days: usize,
            ) -> Result<ReturnSeries, RiskError> {
                Err(RiskError::DataUnavailable("feed offline".to_string()))
            }
        }

        let cache = Arc::new(SingleFlightCache::new());
        let engine = RiskEngine::new(Arc::new(FailingProvider)).with_cache(cache.clone());
        let request = RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::Parametric);

        let err = engine.calculate(&two_asset_portfolio(), &request).unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn insufficient_history_is_rejected() {
        let (engine, _) = engine(10);
        let request = RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::Historical);
        assert!(matches!(
            engine.calculate(&two_asset_portfolio(), &request),
            Err(RiskError::InsufficientData(_))
        ));
    }

    #[test]
    fn audit_logger_receives_every_result() {
        struct CountingAudit(AtomicUsize);
        impl AuditLogger for CountingAudit {
            fn record(
                &self,
                _result: &RiskCalculationResult,
                _request: &RiskCalculationRequest,
                _timestamp: chrono::DateTime<Utc>,
            ) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let audit = Arc::new(CountingAudit(AtomicUsize::new(0)));
        let provider = Arc::new(FixtureProvider::new(120));
        let engine = RiskEngine::new(provider).with_audit_logger(audit.clone());
        let request = RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::Parametric);

        engine.calculate(&two_asset_portfolio(), &request).unwrap();
        engine.calculate(&two_asset_portfolio(), &request).unwrap();
        assert_eq!(audit.0.load(Ordering::SeqCst), 2);
    }
}
