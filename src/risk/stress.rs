//! Deterministic stress scenarios applied to portfolio weights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Portfolio, RiskError};

/// Named instantaneous return shocks per symbol.
///
/// Symbols absent from `shocks` are treated as unshocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    /// Symbol to fractional return shock, e.g. `-0.20` for a 20% drop.
    pub shocks: BTreeMap<String, f64>,
}

impl StressScenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shocks: BTreeMap::new(),
        }
    }

    pub fn with_shock(mut self, symbol: impl Into<String>, shock: f64) -> Self {
        self.shocks.insert(symbol.into(), shock);
        self
    }

    /// A uniform market-wide shock across every portfolio symbol.
    pub fn market_wide(name: impl Into<String>, portfolio: &Portfolio, shock: f64) -> Self {
        let shocks = portfolio
            .symbols()
            .into_iter()
            .map(|s| (s, shock))
            .collect();
        Self {
            name: name.into(),
            shocks,
        }
    }
}

/// Severity bands on the portfolio-level return impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressSeverity {
    Positive,
    Low,
    Moderate,
    High,
    Severe,
}

impl StressSeverity {
    /// Band boundaries: 0 / -5% / -15% / -30% portfolio return.
    pub fn classify(portfolio_return: f64) -> Self {
        if portfolio_return >= 0.0 {
            StressSeverity::Positive
        } else if portfolio_return >= -0.05 {
            StressSeverity::Low
        } else if portfolio_return >= -0.15 {
            StressSeverity::Moderate
        } else if portfolio_return >= -0.30 {
            StressSeverity::High
        } else {
            StressSeverity::Severe
        }
    }
}

/// Outcome of one scenario applied to one portfolio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressImpact {
    pub scenario: String,
    /// Weighted portfolio return under the scenario.
    pub portfolio_return: f64,
    /// Currency impact, negative for losses.
    pub value_impact: f64,
    pub severity: StressSeverity,
}

/// Applies each scenario to the portfolio, returning impacts in input order.
pub fn run_stress_tests(
    portfolio: &Portfolio,
    scenarios: &[StressScenario],
) -> Result<Vec<StressImpact>, RiskError> {
    portfolio.validate()?;
    let value = portfolio.total_value();

    Ok(scenarios
        .iter()
        .map(|scenario| {
            let portfolio_return: f64 = portfolio
                .positions
                .iter()
                .map(|p| p.weight * scenario.shocks.get(&p.symbol).copied().unwrap_or(0.0))
                .sum();
            StressImpact {
                scenario: scenario.name.clone(),
                portfolio_return,
                value_impact: portfolio_return * value,
                severity: StressSeverity::classify(portfolio_return),
            }
        })
        .collect())
}
