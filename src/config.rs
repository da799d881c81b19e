//! TOML configuration for simulation runs.
//!
//! Every field has a default, so a minimal file only needs the fund pool.
//! Parsing is strict about meaning rather than shape: unknown method or
//! frequency names fail when the file is turned into a
//! [`SimulationConfig`], not silently at rebalance time.

use crate::allocation::{AllocationMethod, Constraints};
use crate::backtest::SimulationConfig;
use crate::error::Result;
use crate::types::RebalanceFrequency;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_start_date() -> String {
    "2020-01-01".to_string()
}

fn default_end_date() -> String {
    "2024-12-31".to_string()
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_method() -> String {
    "mean_variance".to_string()
}

fn default_risk_aversion() -> f64 {
    2.0
}

fn default_rebalance_frequency() -> String {
    "monthly".to_string()
}

fn default_trade_cost() -> f64 {
    0.0015
}

/// Root of the TOML configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backtest: BacktestSection,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub costs: CostsSection,
    #[serde(default)]
    pub data: DataSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default = "default_end_date")]
    pub end_date: String,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            end_date: default_end_date(),
            initial_capital: default_initial_capital(),
            risk_free_rate: default_risk_free_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySection {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: f64,
    #[serde(default)]
    pub max_weight: Option<f64>,
    #[serde(default = "default_rebalance_frequency")]
    pub rebalance_frequency: String,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            method: default_method(),
            risk_aversion: default_risk_aversion(),
            max_weight: None,
            rebalance_frequency: default_rebalance_frequency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostsSection {
    #[serde(default = "default_trade_cost")]
    pub trade_cost: f64,
}

impl Default for CostsSection {
    fn default() -> Self {
        Self {
            trade_cost: default_trade_cost(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataSection {
    #[serde(default)]
    pub fund_pool: Vec<String>,
    /// Directory of per-fund CSV files, `<code>.csv` each.
    #[serde(default)]
    pub nav_dir: Option<String>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve the file into a validated simulation configuration.
    pub fn to_simulation_config(&self) -> Result<SimulationConfig> {
        let method: AllocationMethod = self.strategy.method.parse()?;
        let rebalance_frequency: RebalanceFrequency = self.strategy.rebalance_frequency.parse()?;
        let start_date = NaiveDate::parse_from_str(&self.backtest.start_date, "%Y-%m-%d")?;
        let end_date = NaiveDate::parse_from_str(&self.backtest.end_date, "%Y-%m-%d")?;

        let config = SimulationConfig {
            fund_pool: self.data.fund_pool.clone(),
            start_date,
            end_date,
            method,
            risk_aversion: self.strategy.risk_aversion,
            constraints: Constraints {
                max_weight: self.strategy.max_weight,
            },
            rebalance_frequency,
            trade_cost: self.costs.trade_cost,
            initial_capital: self.backtest.initial_capital,
            risk_free_rate: self.backtest.risk_free_rate,
            show_progress: false,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [data]
            fund_pool = ["510300", "110008"]
            "#,
        )
        .unwrap();

        let sim = config.to_simulation_config().unwrap();
        assert_eq!(sim.fund_pool.len(), 2);
        assert_eq!(sim.method, AllocationMethod::MeanVariance);
        assert_eq!(sim.rebalance_frequency, RebalanceFrequency::Monthly);
        assert!((sim.trade_cost - 0.0015).abs() < 1e-12);
        assert!((sim.initial_capital - 1_000_000.0).abs() < 1e-9);
        assert!((sim.risk_free_rate - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_full_config_round_trip() {
        let config = Config::from_toml(
            r#"
            [backtest]
            start_date = "2023-01-01"
            end_date = "2023-12-31"
            initial_capital = 500000.0
            risk_free_rate = 0.025

            [strategy]
            method = "risk_parity"
            risk_aversion = 3.0
            max_weight = 0.4
            rebalance_frequency = "quarterly"

            [costs]
            trade_cost = 0.002

            [data]
            fund_pool = ["510300"]
            "#,
        )
        .unwrap();

        let sim = config.to_simulation_config().unwrap();
        assert_eq!(sim.method, AllocationMethod::RiskParity);
        assert_eq!(sim.rebalance_frequency, RebalanceFrequency::Quarterly);
        assert_eq!(sim.constraints.max_weight, Some(0.4));
        assert_eq!(
            sim.start_date,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        );
        assert!((sim.trade_cost - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let config = Config::from_toml(
            r#"
            [strategy]
            method = "black_litterman"
            "#,
        )
        .unwrap();
        assert!(config.to_simulation_config().is_err());
    }

    #[test]
    fn test_bad_date_rejected() {
        let config = Config::from_toml(
            r#"
            [backtest]
            start_date = "01/02/2023"
            "#,
        )
        .unwrap();
        assert!(config.to_simulation_config().is_err());
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(Config::from_toml("[strategy").is_err());
    }
}
