//! Property-based tests for allocation and metric invariants.

use chrono::{Duration, NaiveDate};
use folio::{
    optimize, AllocationMethod, Constraints, NavRecord, ReturnMatrix, SolveStatus, Weights,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

/// Build a return matrix by compounding generated per-period returns into
/// NAV series.
fn matrix_from_returns(returns: &[Vec<f64>]) -> ReturnMatrix {
    let mut series = BTreeMap::new();
    for (idx, asset_returns) in returns.iter().enumerate() {
        let mut nav = 1.0;
        let mut records = vec![NavRecord::new(start_date(), nav, nav)];
        for (i, r) in asset_returns.iter().enumerate() {
            nav *= 1.0 + r;
            let date = start_date() + Duration::days(i as i64 + 1);
            records.push(NavRecord::new(date, nav, nav));
        }
        series.insert(format!("fund{}", idx), records);
    }
    ReturnMatrix::from_nav_series(&series)
}

fn return_matrix_strategy() -> impl Strategy<Value = ReturnMatrix> {
    (2usize..5, 10usize..40).prop_flat_map(|(n_assets, n_obs)| {
        proptest::collection::vec(
            proptest::collection::vec(-0.05f64..0.05, n_obs),
            n_assets,
        )
        .prop_map(|returns| matrix_from_returns(&returns))
    })
}

proptest! {
    #[test]
    fn optimized_weights_form_a_distribution(matrix in return_matrix_strategy()) {
        for method in [
            AllocationMethod::MeanVariance,
            AllocationMethod::MinVariance,
            AllocationMethod::RiskParity,
        ] {
            let alloc = optimize(&matrix, method, 2.0, &Constraints::default())
                .unwrap()
                .unwrap();

            let sum: f64 = alloc.weights.values().sum();
            prop_assert!((sum - 1.0).abs() < 1e-6);
            for w in alloc.weights.values() {
                prop_assert!(*w >= 0.0);
                prop_assert!(*w <= 1.0 + 1e-6);
            }
        }
    }

    #[test]
    fn max_weight_cap_is_never_breached(matrix in return_matrix_strategy()) {
        let n = matrix.n_assets() as f64;
        // Keep the cap feasible for the generated asset count.
        let cap = (1.2 / n).min(1.0);
        let constraints = Constraints::with_max_weight(cap);

        let alloc = optimize(&matrix, AllocationMethod::MinVariance, 2.0, &constraints)
            .unwrap()
            .unwrap();
        for w in alloc.weights.values() {
            prop_assert!(*w <= cap + 1e-6);
        }
    }

    #[test]
    fn duplicate_columns_always_fall_back(
        base in proptest::collection::vec(-0.05f64..0.05, 10..40)
    ) {
        let matrix = matrix_from_returns(&[base.clone(), base]);
        let alloc = optimize(
            &matrix,
            AllocationMethod::MeanVariance,
            2.0,
            &Constraints::default(),
        )
        .unwrap()
        .unwrap();

        prop_assert_eq!(alloc.status, SolveStatus::EqualWeightFallback);
    }

    #[test]
    fn drawdown_is_a_bounded_percentage(
        returns in proptest::collection::vec(-0.2f64..0.2, 5..100)
    ) {
        let dates: Vec<NaiveDate> = (0..returns.len() as i64)
            .map(|i| start_date() + Duration::days(i))
            .collect();
        let report = folio::calculate(&dates, &returns, None, 0.02);

        let dd = report.get("max_drawdown").unwrap();
        prop_assert!(dd >= 0.0);
        prop_assert!(dd <= 100.0);
        prop_assert!(report.get("volatility").unwrap() >= 0.0);
    }

    #[test]
    fn cvar_dominates_var(matrix in return_matrix_strategy()) {
        let equal = 1.0 / matrix.n_assets() as f64;
        let weights: Weights = matrix
            .assets()
            .iter()
            .map(|a| (a.clone(), equal))
            .collect();

        let report = folio::risk_metrics(&weights, &matrix);
        if let (Some(var), Some(cvar)) = (report.var_95, report.cvar_95) {
            prop_assert!(cvar >= var - 1e-12);
        }
    }
}
