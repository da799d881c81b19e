//! Performance metrics over realized portfolio return series.
//!
//! All figures are reported as percentages rounded to two decimals, except
//! ratios (sharpe, sortino, calmar, beta, r_squared, information_ratio,
//! capture ratios) which are plain numbers rounded to two decimals.

use crate::types::NavPoint;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TRADING_DAYS: f64 = 252.0;

/// Flat name -> value metric report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerformanceReport(BTreeMap<String, f64>);

impl PerformanceReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

/// Round to two decimal places for reporting.
pub(crate) fn round2(v: f64) -> f64 {
    if v.is_finite() {
        (v * 100.0).round() / 100.0
    } else {
        0.0
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation (ddof = 1); zero for fewer than two samples.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Maximum peak-to-trough drawdown of the compounded wealth curve, as a
/// non-negative fraction.
pub(crate) fn max_drawdown_from_returns(returns: &[f64]) -> f64 {
    let mut wealth = 1.0;
    let mut peak = 1.0;
    let mut max_dd = 0.0_f64;
    for r in returns {
        wealth *= 1.0 + r;
        if wealth > peak {
            peak = wealth;
        }
        let dd = 1.0 - wealth / peak;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

/// Periodic returns of a NAV curve, between consecutive points.
pub fn nav_curve_returns(curve: &[NavPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|pair| pair[1].value / pair[0].value - 1.0)
        .collect()
}

/// Compound daily returns into calendar-month returns, keyed by
/// `(year, month)` in chronological order.
pub(crate) fn monthly_returns(dates: &[NaiveDate], returns: &[f64]) -> Vec<((i32, u32), f64)> {
    let mut out: Vec<((i32, u32), f64)> = Vec::new();
    for (date, r) in dates.iter().zip(returns) {
        let key = (date.year(), date.month());
        match out.last_mut() {
            Some((k, acc)) if *k == key => *acc = (1.0 + *acc) * (1.0 + r) - 1.0,
            _ => out.push((key, *r)),
        }
    }
    out
}

/// Full metric report for a realized return series.
///
/// `benchmark` enables the relative block (beta, alpha, tracking error,
/// capture ratios); series are aligned on the intersection of dates. The
/// risk-free rate is annual and applied as `rate / 252` per observation.
pub fn calculate(
    dates: &[NaiveDate],
    returns: &[f64],
    benchmark: Option<(&[NaiveDate], &[f64])>,
    risk_free_rate: f64,
) -> PerformanceReport {
    let mut report = PerformanceReport::new();
    let n = dates.len().min(returns.len());
    if n == 0 {
        return report;
    }
    let dates = &dates[..n];
    let returns = &returns[..n];

    return_metrics(&mut report, dates, returns);
    risk_adjusted_metrics(&mut report, returns, risk_free_rate);

    if let Some((bench_dates, bench_returns)) = benchmark {
        relative_metrics(&mut report, dates, returns, bench_dates, bench_returns);
    }

    report
}

fn return_metrics(report: &mut PerformanceReport, dates: &[NaiveDate], returns: &[f64]) {
    let total: f64 = returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
    let annual = (1.0 + total).powf(TRADING_DAYS / returns.len() as f64) - 1.0;

    report.insert("total_return", round2(total * 100.0));
    report.insert("annual_return", round2(annual * 100.0));

    let monthly = monthly_returns(dates, returns);
    if !monthly.is_empty() {
        let values: Vec<f64> = monthly.iter().map(|(_, r)| *r).collect();
        let positive = values.iter().filter(|r| **r > 0.0).count() as f64;
        let best = values.iter().copied().fold(f64::MIN, f64::max);
        let worst = values.iter().copied().fold(f64::MAX, f64::min);

        report.insert(
            "positive_months",
            round2(positive / values.len() as f64 * 100.0),
        );
        report.insert("best_month", round2(best * 100.0));
        report.insert("worst_month", round2(worst * 100.0));
        report.insert("avg_monthly_return", round2(mean(&values) * 100.0));
    }
}

fn risk_adjusted_metrics(report: &mut PerformanceReport, returns: &[f64], risk_free_rate: f64) {
    let daily_rf = risk_free_rate / TRADING_DAYS;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();

    let sd = std_dev(returns);
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_sd = std_dev(&downside);

    let volatility = sd * TRADING_DAYS.sqrt() * 100.0;
    let downside_vol = downside_sd * TRADING_DAYS.sqrt() * 100.0;

    let sharpe = if sd > 0.0 {
        mean(&excess) / sd * TRADING_DAYS.sqrt()
    } else {
        0.0
    };
    let sortino = if downside_sd > 0.0 {
        mean(&excess) / downside_sd * TRADING_DAYS.sqrt()
    } else {
        0.0
    };

    let max_dd = max_drawdown_from_returns(returns) * 100.0;
    let annual = report.get("annual_return").unwrap_or(0.0);
    let calmar = if max_dd > 0.0 { annual / max_dd } else { 0.0 };

    report.insert("volatility", round2(volatility));
    report.insert("downside_volatility", round2(downside_vol));
    report.insert("sharpe_ratio", round2(sharpe));
    report.insert("sortino_ratio", round2(sortino));
    report.insert("max_drawdown", round2(max_dd));
    report.insert("calmar_ratio", round2(calmar));
}

fn relative_metrics(
    report: &mut PerformanceReport,
    dates: &[NaiveDate],
    returns: &[f64],
    bench_dates: &[NaiveDate],
    bench_returns: &[f64],
) {
    // Align the two series on their common dates.
    let bench_by_date: BTreeMap<NaiveDate, f64> = bench_dates
        .iter()
        .copied()
        .zip(bench_returns.iter().copied())
        .collect();

    let mut port = Vec::new();
    let mut bench = Vec::new();
    for (date, r) in dates.iter().zip(returns) {
        if let Some(b) = bench_by_date.get(date) {
            port.push(*r);
            bench.push(*b);
        }
    }
    if port.len() < 2 {
        return;
    }

    let n = port.len() as f64;
    let mp = mean(&port);
    let mb = mean(&bench);

    let cov: f64 = port
        .iter()
        .zip(&bench)
        .map(|(p, b)| (p - mp) * (b - mb))
        .sum::<f64>()
        / (n - 1.0);
    let var_b = std_dev(&bench).powi(2);

    let beta = if var_b > 0.0 { cov / var_b } else { 0.0 };
    let alpha = (mp - beta * mb) * TRADING_DAYS * 100.0;

    let sd_p = std_dev(&port);
    let sd_b = std_dev(&bench);
    let corr = if sd_p > 0.0 && sd_b > 0.0 {
        cov / (sd_p * sd_b)
    } else {
        0.0
    };

    let excess: Vec<f64> = port.iter().zip(&bench).map(|(p, b)| p - b).collect();
    let te = std_dev(&excess) * TRADING_DAYS.sqrt();
    let info_ratio = if te > 0.0 {
        mean(&excess) * TRADING_DAYS / te
    } else {
        0.0
    };

    report.insert("beta", round2(beta));
    report.insert("alpha", round2(alpha));
    report.insert("r_squared", round2(corr * corr));
    report.insert("tracking_error", round2(te * 100.0));
    report.insert("information_ratio", round2(info_ratio));
    report.insert("up_capture", round2(capture_ratio(&port, &bench, true)));
    report.insert("down_capture", round2(capture_ratio(&port, &bench, false)));
}

/// Compounded portfolio growth over benchmark growth, restricted to
/// periods where the benchmark moved in the given direction. Defaults to
/// 1.0 when no such periods exist.
fn capture_ratio(port: &[f64], bench: &[f64], up: bool) -> f64 {
    let mut port_growth = 1.0;
    let mut bench_growth = 1.0;
    let mut seen = false;

    for (p, b) in port.iter().zip(bench) {
        let selected = if up { *b > 0.0 } else { *b < 0.0 };
        if selected {
            port_growth *= 1.0 + p;
            bench_growth *= 1.0 + b;
            seen = true;
        }
    }

    if !seen || (bench_growth - 1.0).abs() < 1e-12 {
        return 1.0;
    }
    (port_growth - 1.0) / (bench_growth - 1.0)
}
