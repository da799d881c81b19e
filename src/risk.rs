//! Portfolio risk analytics: tail measures, risk decomposition and
//! scenario stress testing.

use crate::metrics::round2;
use crate::returns::ReturnMatrix;
use crate::types::{AssetClass, AssetProfile, Weights};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const TRADING_DAYS: f64 = 252.0;

/// Risk snapshot of a weighted portfolio over a sample window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskReport {
    /// Annualized volatility per asset, as a fraction.
    pub asset_volatility: BTreeMap<String, f64>,
    /// One-day 95% value at risk, as a positive fraction of portfolio value.
    pub var_95: Option<f64>,
    /// Expected shortfall beyond the 95% VaR, as a positive fraction.
    pub cvar_95: Option<f64>,
    /// Tail-risk score: `|skew| + (kurtosis - 3) / 10`.
    pub tail_risk: Option<f64>,
    /// Percentage contribution of each asset to portfolio volatility,
    /// summing to 100.
    pub risk_contribution: BTreeMap<String, f64>,
}

impl RiskReport {
    pub fn is_empty(&self) -> bool {
        self.asset_volatility.is_empty() && self.risk_contribution.is_empty()
    }
}

/// Compute the risk snapshot for a weight vector over the given returns.
///
/// An empty matrix or empty weights produce an empty report; assets in the
/// weights that are absent from the matrix are ignored.
pub fn risk_metrics(weights: &Weights, returns: &ReturnMatrix) -> RiskReport {
    if returns.is_empty() || weights.is_empty() {
        return RiskReport::default();
    }

    let mut report = RiskReport::default();

    for (col, asset) in returns.assets().iter().enumerate() {
        let vol = sample_std(&returns.column(col)) * TRADING_DAYS.sqrt();
        report.asset_volatility.insert(asset.clone(), vol);
    }

    let series = returns.weighted_returns(weights);
    if series.len() >= 2 {
        let var = -percentile(&series, 5.0);
        let tail: Vec<f64> = series.iter().copied().filter(|r| *r <= -var).collect();
        let cvar = if tail.is_empty() {
            var
        } else {
            -(tail.iter().sum::<f64>() / tail.len() as f64)
        };
        report.var_95 = Some(var);
        report.cvar_95 = Some(cvar);
        report.tail_risk = tail_risk_score(&series).map(round2);
    }

    report.risk_contribution = risk_contributions(weights, returns);
    report
}

/// Marginal risk decomposition `w_i * (Σw)_i / σ_p`, rescaled so the
/// contributions sum to 100.
pub fn risk_contributions(weights: &Weights, returns: &ReturnMatrix) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    if returns.is_empty() {
        return out;
    }

    let cov = returns.covariance();
    let w: Vec<f64> = returns
        .assets()
        .iter()
        .map(|a| weights.get(a).copied().unwrap_or(0.0))
        .collect();

    let sigma_w: Vec<f64> = cov
        .iter()
        .map(|row| row.iter().zip(&w).map(|(c, wi)| c * wi).sum())
        .collect();
    let variance: f64 = w.iter().zip(&sigma_w).map(|(wi, sw)| wi * sw).sum();
    if variance <= 0.0 {
        debug!("portfolio variance is zero, skipping risk decomposition");
        return out;
    }

    for ((asset, wi), sw) in returns.assets().iter().zip(&w).zip(&sigma_w) {
        // Contribution as a share of total variance, in percent.
        out.insert(asset.clone(), round2(wi * sw / variance * 100.0));
    }
    out
}

/// A hypothetical market scenario; absent fields mean no shock on that
/// axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    /// Instantaneous equity market move, as a fraction.
    pub market_change: Option<f64>,
    pub volatility_multiplier: Option<f64>,
    /// Parallel interest-rate shift in absolute terms (0.01 = 100bp).
    pub interest_rate_change: Option<f64>,
    pub credit_spread_change: Option<f64>,
    /// Share of the fund redeemed under the scenario, as a fraction.
    pub redemption_rate: Option<f64>,
    pub bid_ask_spread_multiplier: Option<f64>,
}

impl StressScenario {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            market_change: None,
            volatility_multiplier: None,
            interest_rate_change: None,
            credit_spread_change: None,
            redemption_rate: None,
            bid_ask_spread_multiplier: None,
        }
    }
}

/// The standard scenario battery.
pub fn default_scenarios() -> Vec<StressScenario> {
    vec![
        StressScenario {
            market_change: Some(-0.20),
            volatility_multiplier: Some(2.0),
            ..StressScenario::named("equity_crash")
        },
        StressScenario {
            interest_rate_change: Some(0.03),
            credit_spread_change: Some(0.02),
            ..StressScenario::named("rate_shock")
        },
        StressScenario {
            redemption_rate: Some(0.30),
            bid_ask_spread_multiplier: Some(3.0),
            ..StressScenario::named("liquidity_crisis")
        },
    ]
}

/// Estimated portfolio impact of each scenario, in percent (rounded to two
/// decimals), keyed by scenario name.
///
/// Equity positions take the market move, bond positions take
/// `-duration * rate shift`, and redemptions charge a liquidation cost on
/// the whole book. Assets without a profile are left unshocked.
pub fn stress_test(
    weights: &Weights,
    profiles: &BTreeMap<String, AssetProfile>,
    scenarios: &[StressScenario],
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();

    for scenario in scenarios {
        let mut impact = 0.0;

        for (code, weight) in weights {
            let Some(profile) = profiles.get(code) else {
                continue;
            };
            match profile.class {
                AssetClass::Equity => {
                    if let Some(mc) = scenario.market_change {
                        impact += weight * mc;
                    }
                }
                AssetClass::Bond => {
                    if let Some(dr) = scenario.interest_rate_change {
                        impact += weight * (-profile.duration_or_default() * dr);
                    }
                }
                AssetClass::Money | AssetClass::Other => {}
            }
        }

        if let Some(rate) = scenario.redemption_rate {
            let total: f64 = weights.values().sum();
            impact -= total * rate * 0.01;
        }

        out.insert(scenario.name.clone(), round2(impact * 100.0));
    }
    out
}

fn sample_std(values: &[f64]) -> f64 {
    crate::metrics::std_dev(values)
}

/// Linear-interpolation percentile over the sorted sample, `q` in
/// `[0, 100]`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let pos = q / 100.0 * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// `|skew| + (kurtosis - 3) / 10` from raw population moments; `None` when
/// the series has no dispersion.
fn tail_risk_score(series: &[f64]) -> Option<f64> {
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let m2 = series.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    if m2 <= 0.0 {
        return None;
    }
    let m3 = series.iter().map(|r| (r - mean).powi(3)).sum::<f64>() / n;
    let m4 = series.iter().map(|r| (r - mean).powi(4)).sum::<f64>() / n;

    let skew = m3 / m2.powf(1.5);
    let kurtosis = m4 / (m2 * m2);
    Some(skew.abs() + (kurtosis - 3.0) / 10.0)
}
