//! Constrained portfolio allocation.
//!
//! Three formulations over a sample return matrix: mean-variance and
//! minimum-variance (convex QPs solved with Clarabel) and risk parity
//! (equal risk contribution, solved by a damped multiplicative fixed-point
//! iteration). Solver failure and singular covariance degrade to equal
//! weights; the degrade is explicit in [`SolveStatus`] rather than silent.

use crate::error::{FolioError, Result};
use crate::metrics::{max_drawdown_from_returns, round2, std_dev};
use crate::returns::ReturnMatrix;
use crate::types::Weights;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

const TRADING_DAYS: f64 = 252.0;

/// Allocation formulation to solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// Minimize `risk_aversion * w'Σw - μ'w`.
    #[default]
    MeanVariance,
    /// Minimize `w'Σw`, ignoring expected returns.
    MinVariance,
    /// Equalize per-asset risk contributions.
    RiskParity,
}

impl FromStr for AllocationMethod {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean_variance" => Ok(AllocationMethod::MeanVariance),
            "min_variance" => Ok(AllocationMethod::MinVariance),
            "risk_parity" => Ok(AllocationMethod::RiskParity),
            other => Err(FolioError::ConfigError(format!(
                "unsupported allocation method: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationMethod::MeanVariance => write!(f, "mean_variance"),
            AllocationMethod::MinVariance => write!(f, "min_variance"),
            AllocationMethod::RiskParity => write!(f, "risk_parity"),
        }
    }
}

/// Optional constraint set applied to the weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Constraints {
    /// Per-asset weight cap in (0, 1].
    pub max_weight: Option<f64>,
}

impl Constraints {
    pub fn with_max_weight(max_weight: f64) -> Self {
        Self {
            max_weight: Some(max_weight),
        }
    }

    /// Fail fast on a malformed or infeasible constraint set.
    pub fn validate(&self, n_assets: usize) -> Result<()> {
        if let Some(mw) = self.max_weight {
            if !mw.is_finite() || mw <= 0.0 || mw > 1.0 {
                return Err(FolioError::ConfigError(format!(
                    "max_weight must be in (0, 1], got {}",
                    mw
                )));
            }
            if n_assets > 0 && mw * (n_assets as f64) < 1.0 - 1e-9 {
                return Err(FolioError::ConfigError(format!(
                    "max_weight {} is infeasible for {} assets (cap sum < 1)",
                    mw, n_assets
                )));
            }
        }
        Ok(())
    }
}

/// How the weight vector was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// The requested formulation converged to an optimum.
    Optimal,
    /// The solver failed or Σ was singular; weights are the equal-weight
    /// fallback.
    EqualWeightFallback,
}

/// In-sample statistics of the allocated portfolio, percentages rounded to
/// two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationStats {
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

/// Result of a successful `optimize` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub weights: Weights,
    pub stats: AllocationStats,
    pub status: SolveStatus,
}

/// Solve for target weights over the given return matrix.
///
/// Returns `Ok(None)` when the matrix carries no solvable allocation
/// (fewer than two assets or two observations). Configuration misuse is the
/// only hard error; solver trouble degrades to equal weights with
/// [`SolveStatus::EqualWeightFallback`].
pub fn optimize(
    returns: &ReturnMatrix,
    method: AllocationMethod,
    risk_aversion: f64,
    constraints: &Constraints,
) -> Result<Option<Allocation>> {
    constraints.validate(returns.n_assets())?;
    if method == AllocationMethod::MeanVariance && (!risk_aversion.is_finite() || risk_aversion <= 0.0)
    {
        return Err(FolioError::ConfigError(format!(
            "risk_aversion must be positive, got {}",
            risk_aversion
        )));
    }

    let n = returns.n_assets();
    if n < 2 || returns.n_obs() < 2 {
        debug!(
            assets = n,
            observations = returns.n_obs(),
            "return matrix too small, no solvable allocation"
        );
        return Ok(None);
    }

    let cov = returns.covariance();
    let mu = returns.mean_vector();

    let solved = if is_singular(&cov) {
        warn!("covariance matrix is singular, falling back to equal weights");
        None
    } else {
        let attempt = match method {
            AllocationMethod::MeanVariance => {
                let p = scale_matrix(&cov, 2.0 * risk_aversion);
                let q: Vec<f64> = mu.iter().map(|m| -m).collect();
                solve_qp(&p, &q, constraints)
            }
            AllocationMethod::MinVariance => {
                let q = vec![0.0; n];
                solve_qp(&cov, &q, constraints)
            }
            AllocationMethod::RiskParity => risk_parity_weights(&cov),
        };

        match attempt {
            Ok(w) if weights_accepted(&w, constraints) => Some(w),
            Ok(w) => {
                warn!(
                    method = %method,
                    sum = w.iter().sum::<f64>(),
                    "solver returned an infeasible weight vector, falling back to equal weights"
                );
                None
            }
            Err(e) => {
                warn!(method = %method, error = %e, "optimization failed, falling back to equal weights");
                None
            }
        }
    };

    let (raw, status) = match solved {
        Some(w) => (w, SolveStatus::Optimal),
        None => (vec![1.0 / n as f64; n], SolveStatus::EqualWeightFallback),
    };

    let weights: Weights = returns
        .assets()
        .iter()
        .cloned()
        .zip(raw.iter().map(|w| w.max(0.0)))
        .collect();

    let stats = portfolio_stats(returns, &weights);
    Ok(Some(Allocation {
        weights,
        stats,
        status,
    }))
}

/// In-sample portfolio statistics for a weight vector, per-period returns
/// annualized arithmetically.
pub fn portfolio_stats(returns: &ReturnMatrix, weights: &Weights) -> AllocationStats {
    let series = returns.weighted_returns(weights);
    let n = series.len() as f64;
    let mean = if series.is_empty() {
        0.0
    } else {
        series.iter().sum::<f64>() / n
    };
    let sd = std_dev(&series);

    let annual_return = mean * TRADING_DAYS * 100.0;
    let annual_volatility = sd * TRADING_DAYS.sqrt() * 100.0;
    let sharpe_ratio = if sd > 0.0 {
        mean / sd * TRADING_DAYS.sqrt()
    } else {
        0.0
    };
    let max_drawdown = max_drawdown_from_returns(&series) * 100.0;

    AllocationStats {
        annual_return: round2(annual_return),
        annual_volatility: round2(annual_volatility),
        sharpe_ratio: round2(sharpe_ratio),
        max_drawdown: round2(max_drawdown),
    }
}

fn weights_accepted(weights: &[f64], constraints: &Constraints) -> bool {
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-6 {
        return false;
    }
    if weights.iter().any(|w| *w < -1e-6) {
        return false;
    }
    if let Some(mw) = constraints.max_weight {
        if weights.iter().any(|w| *w > mw + 1e-6) {
            return false;
        }
    }
    true
}

fn scale_matrix(m: &[Vec<f64>], factor: f64) -> Vec<Vec<f64>> {
    m.iter()
        .map(|row| row.iter().map(|v| v * factor).collect())
        .collect()
}

/// Tolerance Cholesky probe: a pivot collapsing to zero (relative to the
/// largest variance) marks Σ as singular, which includes perfectly
/// correlated assets and constant-return columns.
fn is_singular(cov: &[Vec<f64>]) -> bool {
    let n = cov.len();
    let diag_max = (0..n).map(|i| cov[i][i]).fold(0.0_f64, f64::max);
    if diag_max <= 0.0 {
        return true;
    }
    let tol = diag_max * 1e-9;

    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = cov[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= tol {
                    return true;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }
    false
}

/// Solve `min 0.5 w'Pw + q'w` s.t. `sum(w) = 1`, `w >= 0`, and optionally
/// `w <= max_weight`, via Clarabel.
fn solve_qp(
    p_dense: &[Vec<f64>],
    q: &[f64],
    constraints: &Constraints,
) -> std::result::Result<Vec<f64>, String> {
    use clarabel::algebra::*;
    use clarabel::solver::*;

    let n = q.len();

    // P in CSC format, column by column.
    let mut p_data = Vec::new();
    let mut p_indices = Vec::new();
    let mut p_indptr = vec![0];
    for j in 0..n {
        for (i, row) in p_dense.iter().enumerate() {
            let val = row[j];
            if val.abs() > 1e-14 {
                p_data.push(val);
                p_indices.push(i);
            }
        }
        p_indptr.push(p_data.len());
    }
    let p = CscMatrix::new(n, n, p_indptr, p_indices, p_data);

    // Constraint rows: [sum(w) = 1; -w <= 0; (w <= max_weight)].
    let capped = constraints.max_weight.is_some();
    let n_ineq = if capped { 2 * n } else { n };

    let mut a_data = Vec::new();
    let mut a_indices = Vec::new();
    let mut a_indptr = vec![0];
    for j in 0..n {
        a_data.push(1.0);
        a_indices.push(0);

        a_data.push(-1.0);
        a_indices.push(1 + j);

        if capped {
            a_data.push(1.0);
            a_indices.push(1 + n + j);
        }
        a_indptr.push(a_data.len());
    }
    let a = CscMatrix::new(1 + n_ineq, n, a_indptr, a_indices, a_data);

    let mut b = vec![1.0];
    b.extend(vec![0.0; n]);
    if let Some(mw) = constraints.max_weight {
        b.extend(vec![mw; n]);
    }

    let cones = [ZeroConeT(1), NonnegativeConeT(n_ineq)];

    let settings = DefaultSettingsBuilder::default()
        .max_iter(200)
        .verbose(false)
        .build()
        .map_err(|e| format!("failed to build solver settings: {}", e))?;

    let mut solver = DefaultSolver::new(&p, q, &a, &b, &cones, settings)
        .map_err(|e| format!("failed to create solver: {:?}", e))?;

    solver.solve();

    if !matches!(solver.solution.status, SolverStatus::Solved) {
        return Err(format!(
            "solver finished with status {:?}",
            solver.solution.status
        ));
    }

    Ok(solver.solution.x.iter().map(|w| w.max(0.0)).collect())
}

/// Equal-risk-contribution weights by damped multiplicative iteration from
/// an equal-weight start. Caps at 500 sweeps; non-convergence is reported
/// as an error so the caller can fall back.
fn risk_parity_weights(cov: &[Vec<f64>]) -> std::result::Result<Vec<f64>, String> {
    let n = cov.len();
    let mut w = vec![1.0 / n as f64; n];

    for _ in 0..500 {
        let sigma_w: Vec<f64> = cov
            .iter()
            .map(|row| row.iter().zip(&w).map(|(c, wi)| c * wi).sum())
            .collect();
        let variance: f64 = w.iter().zip(&sigma_w).map(|(wi, sw)| wi * sw).sum();
        if variance <= 0.0 || !variance.is_finite() {
            return Err("portfolio variance is not positive".to_string());
        }
        let vol = variance.sqrt();

        let rc: Vec<f64> = w.iter().zip(&sigma_w).map(|(wi, sw)| wi * sw / vol).collect();
        let target = vol / n as f64;

        let worst = rc
            .iter()
            .map(|c| (c - target).abs())
            .fold(0.0_f64, f64::max);
        if worst / vol < 1e-9 {
            return Ok(w);
        }

        for i in 0..n {
            let factor = (target / rc[i].max(1e-12)).sqrt().clamp(0.5, 2.0);
            w[i] = (w[i] * factor).max(1e-9);
        }
        let sum: f64 = w.iter().sum();
        for wi in &mut w {
            *wi /= sum;
        }
    }

    Err("equal risk contribution iteration did not converge".to_string())
}
