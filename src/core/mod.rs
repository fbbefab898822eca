//! Core domain types, collaborator traits, and library-wide error structures.
//!
//! This module defines the public data contracts of the engine: portfolio
//! snapshots, calculation requests and results with their JSON wire shapes,
//! the warning and error taxonomies, and the traits external collaborators
//! (market data, cache, audit) implement.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Tolerance on the sum-of-weights invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1.0e-6;

/// Engine and estimator errors surfaced by the API.
///
/// Non-fatal degradations never appear here; they are reported through
/// [`RiskWarning`] entries on the result instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    /// Malformed portfolio or request, rejected before any computation.
    #[error("validation error: {0}")]
    Validation(String),
    /// Too few aligned historical observations to estimate a return model.
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    /// Covariance matrix not factorizable even after regularization.
    #[error("covariance matrix is singular: {0}")]
    CovarianceSingular(String),
    /// Market data source unreachable; propagated unchanged, never substituted.
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),
    /// Numerical failure (overflow, invalid state).
    #[error("numerical error: {0}")]
    Numerical(String),
}

/// Non-fatal degradations attached to a result.
///
/// Serialized as human-readable strings in the `warnings` array so callers can
/// distinguish a trustworthy answer from a degraded one.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskWarning {
    /// Covariance diagonal was bumped to restore positive definiteness.
    CovarianceRegularized,
    /// Monte Carlo covariance was unusable; results use the historical method.
    HistoricalFallback,
    /// CVaR tail bucket holds fewer samples than the reliability floor.
    LowConfidenceCvar { tail_samples: usize },
    /// Simulation stopped at the deadline before reaching the requested paths.
    DegradedPrecision { completed: usize, requested: usize },
    /// Optimizer hit its iteration cap; best solution found is returned.
    NonConvergent { iterations: usize },
    /// A single position dominates the portfolio.
    HighConcentration { symbol: String, weight: f64 },
    /// Too few positions for meaningful diversification.
    LowDiversification { positions: usize },
}

impl fmt::Display for RiskWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CovarianceRegularized => {
                write!(f, "covariance matrix regularized with diagonal epsilon")
            }
            Self::HistoricalFallback => write!(
                f,
                "covariance matrix singular: fell back to historical simulation"
            ),
            Self::LowConfidenceCvar { tail_samples } => write!(
                f,
                "low-confidence CVaR estimate: only {tail_samples} tail samples"
            ),
            Self::DegradedPrecision {
                completed,
                requested,
            } => write!(
                f,
                "degraded precision: deadline reached after {completed} of {requested} paths"
            ),
            Self::NonConvergent { iterations } => write!(
                f,
                "optimizer did not converge within {iterations} iterations; best solution returned"
            ),
            Self::HighConcentration { symbol, weight } => write!(
                f,
                "high concentration risk: {:.1}% in {symbol}",
                weight * 100.0
            ),
            Self::LowDiversification { positions } => {
                write!(f, "low diversification: only {positions} positions")
            }
        }
    }
}

impl Serialize for RiskWarning {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Individual portfolio position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Portfolio weight as a fraction in [0, 1].
    pub weight: f64,
    /// Market value in the portfolio base currency.
    pub market_value: f64,
}

/// Immutable portfolio snapshot supplied per calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub positions: Vec<Position>,
    #[serde(default = "default_currency")]
    pub base_currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Position {
    pub fn new(symbol: impl Into<String>, weight: f64, market_value: f64) -> Self {
        Self {
            symbol: symbol.into(),
            weight,
            market_value,
        }
    }
}

impl Portfolio {
    pub fn new(id: impl Into<String>, positions: Vec<Position>) -> Self {
        Self {
            id: id.into(),
            positions,
            base_currency: default_currency(),
        }
    }

    /// Total market value across positions.
    pub fn total_value(&self) -> f64 {
        self.positions.iter().map(|p| p.market_value).sum()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.iter().map(|p| p.symbol.clone()).collect()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.positions.iter().map(|p| p.weight).collect()
    }

    /// Structural invariants: non-empty, weights sum to one within 1e-6,
    /// unique symbols, per-position bounds, positive total value.
    pub fn validate(&self) -> Result<(), RiskError> {
        if self.positions.is_empty() {
            return Err(RiskError::Validation(
                "portfolio must contain at least one position".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.positions.len());
        for p in &self.positions {
            if p.symbol.is_empty() {
                return Err(RiskError::Validation("empty symbol".to_string()));
            }
            if !seen.insert(p.symbol.as_str()) {
                return Err(RiskError::Validation(format!(
                    "duplicate symbol: {}",
                    p.symbol
                )));
            }
            if !p.weight.is_finite() || !(0.0..=1.0).contains(&p.weight) {
                return Err(RiskError::Validation(format!(
                    "weight for {} must be in [0, 1], got {}",
                    p.symbol, p.weight
                )));
            }
            if !p.market_value.is_finite() || p.market_value < 0.0 {
                return Err(RiskError::Validation(format!(
                    "market value for {} must be finite and >= 0",
                    p.symbol
                )));
            }
        }

        let weight_sum: f64 = self.positions.iter().map(|p| p.weight).sum();
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RiskError::Validation(format!(
                "portfolio weights must sum to 1.0 within {WEIGHT_SUM_TOLERANCE:e}, got {weight_sum}"
            )));
        }

        if self.total_value() <= 0.0 {
            return Err(RiskError::Validation(
                "portfolio total value must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Supported VaR confidence levels with fixed one-sided z-scores.
///
/// The z constants are the conventional inverse-normal values used across the
/// wire contract; they are deliberately fixed rather than recomputed so the
/// parametric method is bit-stable across platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfidenceLevel {
    C90,
    C95,
    C99,
}

impl ConfidenceLevel {
    pub fn level(self) -> f64 {
        match self {
            Self::C90 => 0.90,
            Self::C95 => 0.95,
            Self::C99 => 0.99,
        }
    }

    /// One-sided z-score at this confidence level.
    pub fn z_score(self) -> f64 {
        match self {
            Self::C90 => 1.2816,
            Self::C95 => 1.6449,
            Self::C99 => 2.3263,
        }
    }

    pub fn from_level(level: f64) -> Result<Self, RiskError> {
        const TOL: f64 = 1.0e-9;
        for candidate in [Self::C90, Self::C95, Self::C99] {
            if (level - candidate.level()).abs() < TOL {
                return Ok(candidate);
            }
        }
        Err(RiskError::Validation(format!(
            "unsupported confidence level {level}; expected one of 0.90, 0.95, 0.99"
        )))
    }
}

impl Serialize for ConfidenceLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.level())
    }
}

impl<'de> Deserialize<'de> for ConfidenceLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let level = f64::deserialize(deserializer)?;
        Self::from_level(level).map_err(de::Error::custom)
    }
}

/// Risk methodology selected per request; no global method state exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskMethod {
    Historical,
    Parametric,
    MonteCarlo,
    /// Quasi-random (low-discrepancy) Monte Carlo.
    QuantumMc,
}

impl RiskMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Parametric => "parametric",
            Self::MonteCarlo => "monte_carlo",
            Self::QuantumMc => "quantum_mc",
        }
    }

    /// True for the quasi-random sampling mode.
    pub fn quantum_enhanced(self) -> bool {
        matches!(self, Self::QuantumMc)
    }
}

impl fmt::Display for RiskMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_num_simulations() -> usize {
    10_000
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_seed() -> u64 {
    42
}

/// Methodology parameters for one risk calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCalculationRequest {
    pub confidence_level: ConfidenceLevel,
    /// Horizon in trading days, 1 to 252.
    pub time_horizon_days: u32,
    pub method: RiskMethod,
    #[serde(default = "default_num_simulations")]
    pub num_simulations: usize,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl RiskCalculationRequest {
    pub fn new(confidence_level: ConfidenceLevel, time_horizon_days: u32, method: RiskMethod) -> Self {
        Self {
            confidence_level,
            time_horizon_days,
            method,
            num_simulations: default_num_simulations(),
            risk_free_rate: default_risk_free_rate(),
            seed: default_seed(),
        }
    }

    pub fn with_num_simulations(mut self, num_simulations: usize) -> Self {
        self.num_simulations = num_simulations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), RiskError> {
        if !(1..=252).contains(&self.time_horizon_days) {
            return Err(RiskError::Validation(format!(
                "time horizon must be in [1, 252] trading days, got {}",
                self.time_horizon_days
            )));
        }
        if !(1_000..=100_000).contains(&self.num_simulations) {
            return Err(RiskError::Validation(format!(
                "num_simulations must be in [1000, 100000], got {}",
                self.num_simulations
            )));
        }
        if !self.risk_free_rate.is_finite() || !(0.0..=0.10).contains(&self.risk_free_rate) {
            return Err(RiskError::Validation(format!(
                "risk_free_rate must be in [0, 0.10], got {}",
                self.risk_free_rate
            )));
        }
        Ok(())
    }
}

/// Sharpe ratio with an explicit marker for the zero-volatility case.
///
/// A degenerate portfolio (single asset, zero variance) reports `Undefined`
/// rather than NaN or a division error; the wire form is the string
/// `"undefined"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SharpeRatio {
    Defined(f64),
    Undefined,
}

impl SharpeRatio {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Defined(x) => Some(x),
            Self::Undefined => None,
        }
    }
}

impl Serialize for SharpeRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Defined(x) => serializer.serialize_f64(*x),
            Self::Undefined => serializer.serialize_str("undefined"),
        }
    }
}

impl<'de> Deserialize<'de> for SharpeRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SharpeVisitor;

        impl Visitor<'_> for SharpeVisitor {
            type Value = SharpeRatio;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or the string \"undefined\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<SharpeRatio, E> {
                Ok(SharpeRatio::Defined(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<SharpeRatio, E> {
                Ok(SharpeRatio::Defined(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<SharpeRatio, E> {
                Ok(SharpeRatio::Defined(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SharpeRatio, E> {
                if v == "undefined" {
                    Ok(SharpeRatio::Undefined)
                } else {
                    Err(E::custom(format!("unexpected sharpe_ratio string: {v}")))
                }
            }
        }

        deserializer.deserialize_any(SharpeVisitor)
    }
}

/// Assembled risk metrics. VaR and CVaR are currency amounts; volatilities and
/// max drawdown are fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub var: f64,
    pub cvar: f64,
    pub volatility_daily: f64,
    pub volatility_annual: f64,
    pub sharpe_ratio: SharpeRatio,
    pub max_drawdown: f64,
}

/// Methodology echo attached to every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Methodology {
    pub model_type: RiskMethod,
    pub confidence_level: ConfidenceLevel,
    pub time_horizon_days: u32,
    pub quantum_enhancement: bool,
}

/// Final calculation payload handed to callers and the audit channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskCalculationResult {
    pub risk_metrics: RiskMetrics,
    pub methodology: Methodology,
    pub warnings: Vec<RiskWarning>,
    pub computation_time_ms: f64,
}

/// Historical daily returns per symbol as supplied by the data provider.
///
/// Observations are dated; alignment across symbols happens downstream in the
/// returns estimator (date intersection, no forward-fill).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub series: std::collections::BTreeMap<String, Vec<(NaiveDate, f64)>>,
}

impl ReturnSeries {
    pub fn insert(&mut self, symbol: impl Into<String>, observations: Vec<(NaiveDate, f64)>) {
        self.series.insert(symbol.into(), observations);
    }
}

/// Historical market-data source. Failure is fatal and propagated unchanged;
/// the engine never substitutes synthetic data.
pub trait MarketDataProvider: Send + Sync {
    fn get_returns(&self, symbols: &[String], lookback_days: usize)
    -> Result<ReturnSeries, RiskError>;
}

/// Fire-and-forget audit side channel, off the engine's critical path.
pub trait AuditLogger: Send + Sync {
    fn record(
        &self,
        result: &RiskCalculationResult,
        request: &RiskCalculationRequest,
        timestamp: DateTime<Utc>,
    );
}

/// Optional result cache. Implementations may provide single-flight semantics:
/// concurrent calls with the same fingerprint share one computation.
pub trait CacheProvider: Send + Sync {
    fn get_or_compute(
        &self,
        fingerprint: &str,
        compute: &mut dyn FnMut() -> Result<RiskCalculationResult, RiskError>,
    ) -> Result<RiskCalculationResult, RiskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(symbol: &str, weight: f64, value: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            weight,
            market_value: value,
        }
    }

    fn sample_portfolio() -> Portfolio {
        Portfolio {
            id: "pf-1".to_string(),
            positions: vec![
                position("AAPL", 0.5, 500_000.0),
                position("GOOGL", 0.5, 500_000.0),
            ],
            base_currency: "USD".to_string(),
        }
    }

    #[test]
    fn valid_portfolio_passes_validation() {
        assert!(sample_portfolio().validate().is_ok());
    }

    #[test]
    fn weights_off_by_more_than_tolerance_are_rejected() {
        let mut pf = sample_portfolio();
        pf.positions[0].weight = 0.51;
        let err = pf.validate().unwrap_err();
        assert!(matches!(err, RiskError::Validation(_)));
    }

    #[test]
    fn duplicate_symbols_are_rejected() {
        let mut pf = sample_portfolio();
        pf.positions[1].symbol = "AAPL".to_string();
        assert!(matches!(pf.validate(), Err(RiskError::Validation(_))));
    }

    #[test]
    fn empty_portfolio_is_rejected() {
        let pf = Portfolio {
            id: "empty".to_string(),
            positions: vec![],
            base_currency: "USD".to_string(),
        };
        assert!(matches!(pf.validate(), Err(RiskError::Validation(_))));
    }

    #[test]
    fn zero_value_portfolio_is_rejected() {
        let mut pf = sample_portfolio();
        pf.positions[0].market_value = 0.0;
        pf.positions[1].market_value = 0.0;
        assert!(matches!(pf.validate(), Err(RiskError::Validation(_))));
    }

    #[test]
    fn confidence_level_round_trips_and_rejects_unsupported() {
        assert_eq!(ConfidenceLevel::from_level(0.95).unwrap(), ConfidenceLevel::C95);
        assert!(ConfidenceLevel::from_level(0.97).is_err());

        let json = serde_json::to_string(&ConfidenceLevel::C99).unwrap();
        assert_eq!(json, "0.99");
        let back: ConfidenceLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ConfidenceLevel::C99);
    }

    #[test]
    fn request_validation_bounds() {
        let mut req = RiskCalculationRequest::new(ConfidenceLevel::C95, 1, RiskMethod::Parametric);
        assert!(req.validate().is_ok());

        req.time_horizon_days = 0;
        assert!(req.validate().is_err());
        req.time_horizon_days = 253;
        assert!(req.validate().is_err());

        req.time_horizon_days = 10;
        req.num_simulations = 999;
        assert!(req.validate().is_err());
        req.num_simulations = 100_001;
        assert!(req.validate().is_err());
    }

    #[test]
    fn method_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&RiskMethod::QuantumMc).unwrap(),
            "\"quantum_mc\""
        );
        assert_eq!(
            serde_json::from_str::<RiskMethod>("\"monte_carlo\"").unwrap(),
            RiskMethod::MonteCarlo
        );
    }

    #[test]
    fn sharpe_ratio_serializes_undefined_marker() {
        assert_eq!(
            serde_json::to_string(&SharpeRatio::Undefined).unwrap(),
            "\"undefined\""
        );
        let back: SharpeRatio = serde_json::from_str("\"undefined\"").unwrap();
        assert_eq!(back, SharpeRatio::Undefined);
        let num: SharpeRatio = serde_json::from_str("1.25").unwrap();
        assert_eq!(num, SharpeRatio::Defined(1.25));
    }

    #[test]
    fn warnings_serialize_as_strings() {
        let w = RiskWarning::LowConfidenceCvar { tail_samples: 12 };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("low-confidence CVaR"));
    }
}
