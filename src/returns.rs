//! Aligned return-matrix construction from per-fund NAV series.
//!
//! Everything downstream (allocation, risk, backtest analytics) consumes the
//! [`ReturnMatrix`] built here. Alignment is on the intersection of dates
//! across all usable funds, so a gap in one series drops that date for all
//! of them rather than producing a ragged matrix.

use crate::types::{NavRecord, Weights};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Dates x assets matrix of periodic returns.
///
/// Invariants: dates strictly increasing, asset codes unique, every row has
/// exactly one return per asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnMatrix {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    /// Row-major: `values[row][col]` is the return of `assets[col]` on
    /// `dates[row]`.
    values: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    /// Build an aligned return matrix from per-fund NAV series.
    ///
    /// Funds with fewer than two valid records carry no return information
    /// and are dropped with a warning; this is the missing-data policy, not
    /// an error.
    pub fn from_nav_series(series: &BTreeMap<String, Vec<NavRecord>>) -> Self {
        let mut usable: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();

        for (code, records) in series {
            let by_date: BTreeMap<NaiveDate, f64> = records
                .iter()
                .filter(|r| r.is_valid())
                .map(|r| (r.date, r.nav))
                .collect();

            if by_date.len() < 2 {
                warn!(fund = %code, "insufficient NAV history, excluding fund from return matrix");
                continue;
            }
            usable.insert(code, by_date);
        }

        if usable.is_empty() {
            return Self::empty();
        }

        // Intersection of observation dates across all usable funds.
        let mut common: Option<BTreeSet<NaiveDate>> = None;
        for navs in usable.values() {
            let dates: BTreeSet<NaiveDate> = navs.keys().copied().collect();
            common = Some(match common {
                Some(acc) => acc.intersection(&dates).copied().collect(),
                None => dates,
            });
        }
        let common: Vec<NaiveDate> = common.unwrap_or_default().into_iter().collect();

        if common.len() < 2 {
            warn!("fewer than two common NAV dates across funds, return matrix is empty");
            return Self::empty();
        }

        let assets: Vec<String> = usable.keys().map(|c| c.to_string()).collect();
        let mut values = Vec::with_capacity(common.len() - 1);

        for pair in common.windows(2) {
            let row: Vec<f64> = usable
                .values()
                .map(|navs| {
                    let prev = navs[&pair[0]];
                    let curr = navs[&pair[1]];
                    curr / prev - 1.0
                })
                .collect();
            values.push(row);
        }

        Self {
            // Each return is stamped with the date it was realized on.
            dates: common[1..].to_vec(),
            assets,
            values,
        }
    }

    /// An empty matrix: no assets, no observations.
    pub fn empty() -> Self {
        Self {
            dates: Vec::new(),
            assets: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn n_obs(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_assets() == 0 || self.n_obs() == 0
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// The return of asset column `col` on observation row `row`.
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[row][col]
    }

    /// All observations for one asset column.
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.values.iter().map(|row| row[col]).collect()
    }

    /// Restrict the matrix to observations dated on or before `date`.
    pub fn up_to(&self, date: NaiveDate) -> Self {
        let keep = self.dates.iter().take_while(|d| **d <= date).count();
        Self {
            dates: self.dates[..keep].to_vec(),
            assets: self.assets.clone(),
            values: self.values[..keep].to_vec(),
        }
    }

    /// Sample mean return per asset.
    pub fn mean_vector(&self) -> Vec<f64> {
        let n = self.n_obs();
        if n == 0 {
            return vec![0.0; self.n_assets()];
        }
        (0..self.n_assets())
            .map(|c| self.values.iter().map(|row| row[c]).sum::<f64>() / n as f64)
            .collect()
    }

    /// Sample covariance matrix (ddof = 1).
    pub fn covariance(&self) -> Vec<Vec<f64>> {
        let n = self.n_obs();
        let k = self.n_assets();
        let mut cov = vec![vec![0.0; k]; k];
        if n < 2 {
            return cov;
        }

        let means = self.mean_vector();
        for i in 0..k {
            for j in i..k {
                let sum: f64 = self
                    .values
                    .iter()
                    .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                    .sum();
                let c = sum / (n - 1) as f64;
                cov[i][j] = c;
                cov[j][i] = c;
            }
        }
        cov
    }

    /// Realized portfolio return series for the given weights.
    ///
    /// Assets absent from the weights map contribute zero.
    pub fn weighted_returns(&self, weights: &Weights) -> Vec<f64> {
        let w: Vec<f64> = self
            .assets
            .iter()
            .map(|a| weights.get(a).copied().unwrap_or(0.0))
            .collect();

        self.values
            .iter()
            .map(|row| row.iter().zip(&w).map(|(r, wi)| r * wi).sum())
            .collect()
    }
}
