//! Folio is a fund-portfolio simulation library: aligned return matrices,
//! constrained allocation (mean-variance, minimum-variance, risk parity),
//! risk analytics with scenario stress tests, and a rebalancing backtest
//! engine with full performance reporting.
//!
//! # Quick start
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use folio::{BacktestEngine, InMemorySource, NavRecord, SimulationConfig};
//!
//! fn main() -> folio::Result<()> {
//!     let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
//!     let source = InMemorySource::new().with_fund(
//!         "510300",
//!         vec![
//!             NavRecord::new(d(2), 1.00, 1.00),
//!             NavRecord::new(d(3), 1.01, 1.01),
//!             NavRecord::new(d(4), 1.02, 1.02),
//!         ],
//!     );
//!     let config = SimulationConfig {
//!         fund_pool: vec!["510300".to_string()],
//!         start_date: d(2),
//!         end_date: d(4),
//!         ..SimulationConfig::default()
//!     };
//!     let mut engine = BacktestEngine::from_source(config, &source)?;
//!     let result = engine.run()?;
//!     println!("{:?}", result.performance.get("total_return"));
//!     Ok(())
//! }
//! ```

pub mod allocation;
pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod report;
pub mod returns;
pub mod risk;
pub mod types;

pub use allocation::{
    optimize, Allocation, AllocationMethod, AllocationStats, Constraints, SolveStatus,
};
pub use backtest::{
    run_sweep, BacktestEngine, BacktestResult, BacktestState, SimulationConfig,
};
pub use config::Config;
pub use data::{load_nav_csv, CachedSource, ExpiringCache, InMemorySource, NavSource};
pub use error::{FolioError, Result};
pub use metrics::{calculate, nav_curve_returns, PerformanceReport};
pub use report::ResultFormatter;
pub use returns::ReturnMatrix;
pub use risk::{
    default_scenarios, risk_contributions, risk_metrics, stress_test, RiskReport, StressScenario,
};
pub use types::{
    AssetClass, AssetProfile, NavPoint, NavRecord, RebalanceFrequency, Trade, Weights,
};

/// Install the global tracing subscriber, honoring `RUST_LOG` and
/// defaulting to `info`. Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
