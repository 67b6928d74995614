//! Property-based tests using proptest for simulator and policy invariants.
//!
//! These tests verify that:
//! 1. Results have one row per date plus the leading starting-capital row
//! 2. NAV stays positive while daily losses are bounded
//! 3. Equal-weight and momentum-tilt weights keep their fixed shapes
//! 4. Re-running a simulation is bit-identical
//! 5. Cumulative return never rises with slippage
//! 6. Drawdowns are never positive

use chrono::NaiveDate;
use proptest::prelude::*;

use panelbt::analytics::{max_drawdown, PerformanceMetrics};
use panelbt::engine::run_backtest;
use panelbt::panel::Panel;
use panelbt::policy::{AllocationPolicy, EqualWeight, MomentumTilt, BENCHMARK_WEIGHT, TILT_WEIGHT};
use panelbt::types::Observation;

// ============================================================================
// Panel generators
// ============================================================================

fn date(offset: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
}

/// One cell: a clipped return and an optional momentum.
fn cell_strategy() -> impl Strategy<Value = (f64, Option<f64>)> {
    (-0.20..0.20f64, prop::option::of(-0.5..0.5f64))
}

/// Panel of `SPY` plus 1-6 other tickers over 1-40 dates.
///
/// Day-one returns are undefined, as they are after ingestion.
fn panel_strategy() -> impl Strategy<Value = Panel> {
    (1usize..7, 1usize..41).prop_flat_map(|(others, days)| {
        prop::collection::vec(prop::collection::vec(cell_strategy(), days), others + 1).prop_map(
            move |grid| {
                let mut tickers: Vec<String> = (0..others).map(|i| format!("T{:02}", i)).collect();
                tickers.push("SPY".to_string());
                let dates: Vec<NaiveDate> = (0..days).map(date).collect();
                let cells = grid
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .enumerate()
                            .map(|(t, (ret, momentum))| Observation {
                                close: 100.0,
                                ret: if t == 0 { f64::NAN } else { ret },
                                momentum_60: momentum.unwrap_or(f64::NAN),
                                ..Observation::MISSING
                            })
                            .collect()
                    })
                    .collect();
                Panel::new(tickers, dates, cells).unwrap()
            },
        )
    })
}

fn capital_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![Just(500.0), Just(2500.0), Just(5000.0), 1.0..1_000_000.0f64]
}

// ============================================================================
// Simulator properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn result_has_leading_row_and_one_row_per_date(
        panel in panel_strategy(),
        capital in capital_strategy(),
        slippage in 0.0..0.01f64,
    ) {
        let policy = EqualWeight::new(panel.tickers().to_vec());
        let result = run_backtest(&panel, &policy, capital, slippage).unwrap();

        prop_assert_eq!(result.len(), panel.len() + 1);
        prop_assert_eq!(result.records[0].date, panel.dates()[0]);
        prop_assert_eq!(result.records[1].date, panel.dates()[0]);
        prop_assert_eq!(result.records[0].nav, capital);
        prop_assert_eq!(result.records[0].turnover, 0.0);
        for (rec, d) in result.records[1..].iter().zip(panel.dates()) {
            prop_assert_eq!(rec.date, *d);
        }
    }

    #[test]
    fn first_two_navs_equal_capital_without_costs(
        panel in panel_strategy(),
        capital in capital_strategy(),
    ) {
        // Day-one returns are undefined (read as 0) and slippage is off.
        let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY");
        let result = run_backtest(&panel, &policy, capital, 0.0).unwrap();

        prop_assert_eq!(result.records[0].nav, capital);
        prop_assert_eq!(result.records[1].nav, capital);
    }

    #[test]
    fn nav_stays_positive(
        panel in panel_strategy(),
        capital in capital_strategy(),
        slippage in 0.0..0.01f64,
    ) {
        // |return| <= 0.2 and turnover <= 2 keep every step above -1.
        let policies: Vec<Box<dyn AllocationPolicy>> = vec![
            Box::new(EqualWeight::new(panel.tickers().to_vec())),
            Box::new(MomentumTilt::new(panel.tickers().to_vec(), "SPY")),
        ];
        for policy in &policies {
            let result = run_backtest(&panel, &**policy, capital, slippage).unwrap();
            prop_assert!(result.records.iter().all(|r| r.nav > 0.0 && r.nav.is_finite()));
        }
    }

    #[test]
    fn first_turnover_is_l1_norm_of_first_weights(
        panel in panel_strategy(),
        slippage in 0.0..0.01f64,
    ) {
        let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY");
        let snapshot = panel.snapshot(0).unwrap();
        let weights = policy.get_weights(panel.dates()[0], &snapshot).unwrap();
        let l1: f64 = weights.weights().iter().map(|w| w.abs()).sum();

        let result = run_backtest(&panel, &policy, 1000.0, slippage).unwrap();
        prop_assert!((result.records[1].turnover - l1).abs() < 1e-12);
    }

    #[test]
    fn rerun_is_bit_identical(
        panel in panel_strategy(),
        capital in capital_strategy(),
        slippage in 0.0..0.01f64,
    ) {
        let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY").with_top_n(2);
        let a = run_backtest(&panel, &policy, capital, slippage).unwrap();
        let b = run_backtest(&panel, &policy, capital, slippage).unwrap();

        let bits = |r: &panelbt::BacktestResult| -> Vec<(u64, u64)> {
            r.records.iter().map(|x| (x.nav.to_bits(), x.turnover.to_bits())).collect()
        };
        prop_assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn cumulative_return_non_increasing_in_slippage(
        panel in panel_strategy(),
        low in 0.0..0.005f64,
        step in 0.0001..0.005f64,
    ) {
        let policy = EqualWeight::new(panel.tickers().to_vec());
        let cheap = run_backtest(&panel, &policy, 1000.0, low).unwrap();
        let dear = run_backtest(&panel, &policy, 1000.0, low + step).unwrap();

        // Day-one turnover is 1.0, so costs always bite.
        let cheap_final = cheap.final_nav().unwrap();
        let dear_final = dear.final_nav().unwrap();
        prop_assert!(dear_final < cheap_final);
    }

    #[test]
    fn drawdown_never_positive(
        navs in prop::collection::vec(1.0..1_000_000.0f64, 2..200),
    ) {
        let dd = max_drawdown(&navs);
        prop_assert!(dd <= 0.0);
        prop_assert!(dd > -1.0);

        let metrics = PerformanceMetrics::from_navs(&navs).unwrap();
        prop_assert!(metrics.max_drawdown <= 0.0);
        prop_assert!(metrics.annual_vol >= 0.0);
    }

    #[test]
    fn steady_growth_has_positive_sharpe(
        start in 100.0..10_000.0f64,
        step in 0.0001..0.01f64,
        len in 3usize..120,
    ) {
        // Alternate two step sizes so the returns are not all identical.
        let mut navs = vec![start];
        for i in 1..len {
            let r = if i % 2 == 0 { step } else { step * 1.5 };
            let next = navs[i - 1] * (1.0 + r);
            navs.push(next);
        }
        let metrics = PerformanceMetrics::from_navs(&navs).unwrap();
        prop_assert!(metrics.sharpe_ratio > 0.0);
        prop_assert_eq!(metrics.max_drawdown, 0.0);
    }
}

// ============================================================================
// Policy properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn equal_weight_is_uniform_and_sums_to_one(panel in panel_strategy()) {
        let policy = EqualWeight::new(panel.tickers().to_vec());
        let n = panel.num_tickers() as f64;
        for (i, &d) in panel.dates().iter().enumerate() {
            let snapshot = panel.snapshot(i).unwrap();
            let weights = policy.get_weights(d, &snapshot).unwrap();
            prop_assert!(weights.weights().iter().all(|&w| w == 1.0 / n));
            prop_assert!((weights.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn momentum_tilt_keeps_80_20_split(
        panel in panel_strategy(),
        top_n in 1usize..8,
    ) {
        let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY").with_top_n(top_n);
        for (i, &d) in panel.dates().iter().enumerate() {
            let snapshot = panel.snapshot(i).unwrap();
            let weights = policy.get_weights(d, &snapshot).unwrap();
            prop_assert_eq!(weights.get("SPY"), Some(BENCHMARK_WEIGHT));

            let selected = policy.select(&snapshot).unwrap();
            prop_assert!(selected.len() <= top_n);
            let satellite: f64 = weights
                .iter()
                .filter(|(t, _)| *t != "SPY")
                .map(|(_, w)| w)
                .sum();
            if selected.is_empty() {
                // No ranked ticker: the tilt stays in cash.
                prop_assert_eq!(satellite, 0.0);
            } else {
                prop_assert!((satellite - TILT_WEIGHT).abs() < 1e-12);
                let nonzero = weights.iter().filter(|(t, w)| *t != "SPY" && *w > 0.0).count();
                prop_assert_eq!(nonzero, selected.len());
            }
        }
    }
}
