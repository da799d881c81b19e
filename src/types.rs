//! Core data types for the simulation pipeline.

use crate::error::{FolioError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single net-asset-value observation for a fund.
///
/// The unit NAV (`nav`) is the canonical price field used for all return
/// computations; the cumulative NAV is carried through for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavRecord {
    pub date: NaiveDate,
    /// Unit net asset value.
    pub nav: f64,
    /// Cumulative net asset value (dividends reinvested).
    pub cum_nav: f64,
}

impl NavRecord {
    pub fn new(date: NaiveDate, nav: f64, cum_nav: f64) -> Self {
        Self { date, nav, cum_nav }
    }

    /// A record is usable when its unit NAV is a positive finite number.
    pub fn is_valid(&self) -> bool {
        self.nav.is_finite() && self.nav > 0.0
    }
}

/// Target allocation weights keyed by fund code.
///
/// An accepted solution sums to 1 within 1e-6; see
/// [`crate::allocation::optimize`].
pub type Weights = BTreeMap<String, f64>;

/// Broad asset classification used by the stress tester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Bond,
    Money,
    #[default]
    Other,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Equity => write!(f, "equity"),
            AssetClass::Bond => write!(f, "bond"),
            AssetClass::Money => write!(f, "money"),
            AssetClass::Other => write!(f, "other"),
        }
    }
}

/// Static fund metadata consumed by scenario shocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetProfile {
    pub code: String,
    pub class: AssetClass,
    /// Interest-rate duration in years; only meaningful for bond funds.
    pub duration: Option<f64>,
}

impl AssetProfile {
    pub fn new(code: impl Into<String>, class: AssetClass) -> Self {
        Self {
            code: code.into(),
            class,
            duration: None,
        }
    }

    /// Create an equity fund profile.
    pub fn equity(code: impl Into<String>) -> Self {
        Self::new(code, AssetClass::Equity)
    }

    /// Create a bond fund profile with an explicit duration.
    pub fn bond(code: impl Into<String>, duration: f64) -> Self {
        Self {
            code: code.into(),
            class: AssetClass::Bond,
            duration: Some(duration),
        }
    }

    /// Duration used in rate-shock scenarios; bond funds without an
    /// explicit figure are assumed to run a 3-year duration.
    pub fn duration_or_default(&self) -> f64 {
        self.duration.unwrap_or(3.0)
    }
}

/// An executed rebalancing trade. Appended to the trade log, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub code: String,
    /// Signed unit delta: positive buys, negative sells.
    pub units: f64,
    /// Unit NAV the trade executed at.
    pub price: f64,
    /// Transaction cost charged on the traded notional.
    pub cost: f64,
}

impl Trade {
    pub fn new(date: NaiveDate, code: impl Into<String>, units: f64, price: f64, cost: f64) -> Self {
        Self {
            date,
            code: code.into(),
            units,
            price,
            cost,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.units > 0.0
    }

    /// Signed traded notional (units x execution price).
    pub fn notional(&self) -> f64 {
        self.units * self.price
    }
}

/// One point of the portfolio NAV curve, relative to initial capital.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl NavPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// How often the backtest re-solves for target weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceFrequency {
    #[default]
    Monthly,
    Quarterly,
}

impl FromStr for RebalanceFrequency {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monthly" => Ok(RebalanceFrequency::Monthly),
            "quarterly" => Ok(RebalanceFrequency::Quarterly),
            other => Err(FolioError::ConfigError(format!(
                "unsupported rebalance frequency: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RebalanceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceFrequency::Monthly => write!(f, "monthly"),
            RebalanceFrequency::Quarterly => write!(f, "quarterly"),
        }
    }
}
