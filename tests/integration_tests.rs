//! Integration tests for panel construction, simulation and the study pipeline.

use chrono::NaiveDate;
use panelbt::analytics::{summarize, PerformanceMetrics};
use panelbt::batch::{group_rows, run_batch, to_rows};
use panelbt::data::{load_dir, DataConfig};
use panelbt::engine::{run_backtest, BacktestConfig, Engine};
use panelbt::error::BacktestError;
use panelbt::export::{load_results, save_results, write_csv};
use panelbt::features::{compute_signals, SignalConfig};
use panelbt::panel::{Panel, DEFAULT_RETURN_CLIP};
use panelbt::policy::{
    AllocationPolicy, EqualWeight, FeatureMatrix, ModelAdapter, MomentumTilt, PolicyKind,
    PolicySettings, Scorer,
};
use panelbt::sensitivity::{run_sensitivity, slippage_violations, Period, SensitivityConfig};
use panelbt::stats::{bootstrap_cum_diff, paired_tests};
use panelbt::types::Observation;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(offset)
}

fn obs(ret: f64) -> Observation {
    Observation {
        close: 100.0,
        ret,
        ..Observation::MISSING
    }
}

/// Deterministic close path with a drift and some oscillation.
fn closes(days: usize, start: f64, drift: f64, phase: f64) -> Vec<f64> {
    let mut price = start;
    (0..days)
        .map(|i| {
            let wiggle = ((i as f64 * 0.7 + phase).sin() * 0.012) + ((i as f64 * 1.3).cos() * 0.004);
            price *= 1.0 + drift + wiggle;
            price
        })
        .collect()
}

/// Write one CSV of daily bars per ticker.
fn write_bars(dir: &Path, ticker: &str, closes: &[f64]) {
    let mut text = String::from("date,open,high,low,close,volume\n");
    for (i, c) in closes.iter().enumerate() {
        text.push_str(&format!(
            "{},{:.4},{:.4},{:.4},{:.4},{}\n",
            day(i as i64),
            c,
            c * 1.01,
            c * 0.99,
            c,
            1_000_000 + i * 10
        ));
    }
    fs::write(dir.join(format!("{}.csv", ticker)), text).unwrap();
}

/// Build a signal-bearing panel from CSV files on disk.
fn study_panel(dir: &Path, days: usize) -> Panel {
    write_bars(dir, "AAA", &closes(days, 50.0, 0.002, 0.0));
    write_bars(dir, "BBB", &closes(days, 80.0, -0.001, 1.0));
    write_bars(dir, "CCC", &closes(days, 20.0, 0.0005, 2.0));
    write_bars(dir, "SPY", &closes(days, 300.0, 0.0008, 3.0));

    let bars = load_dir(dir, "*.csv", &DataConfig::default()).unwrap();
    let mut panel = Panel::from_bars(&bars, DEFAULT_RETURN_CLIP).unwrap();
    compute_signals(&mut panel, &SignalConfig::default()).unwrap();
    panel
}

/// A, B and a benchmark over two dates with fixed returns.
fn scenario_panel() -> Panel {
    Panel::new(
        vec!["A".to_string(), "B".to_string(), "SPY".to_string()],
        vec![day(0), day(1)],
        vec![
            vec![obs(0.01), obs(0.02)],
            vec![obs(-0.02), obs(0.01)],
            vec![obs(0.00), obs(0.00)],
        ],
    )
    .unwrap()
}

#[test]
fn test_equal_weight_two_day_scenario() {
    let panel = scenario_panel();
    let policy = EqualWeight::new(panel.tickers().to_vec());
    let result = run_backtest(&panel, &policy, 1000.0, 0.0).unwrap();

    assert_eq!(result.len(), panel.len() + 1);
    assert_eq!(result.records[0].date, result.records[1].date);
    assert_eq!(result.records[0].nav, 1000.0);
    assert_eq!(result.records[0].turnover, 0.0);

    assert!((result.records[1].nav - 996.67).abs() < 0.005);
    assert!((result.records[1].turnover - 1.0).abs() < 1e-12);
    assert!(result.records[2].turnover.abs() < 1e-12);

    let expected_day2 = result.records[1].nav * (1.0 + 0.03 / 3.0);
    assert!((result.records[2].nav - expected_day2).abs() < 1e-9);
}

#[test]
fn test_momentum_tilt_missing_benchmark_fails_run() {
    let panel = Panel::new(
        vec!["A".to_string(), "B".to_string()],
        vec![day(0)],
        vec![vec![obs(0.01)], vec![obs(0.02)]],
    )
    .unwrap();
    let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY");

    match run_backtest(&panel, &policy, 1000.0, 0.0) {
        Err(BacktestError::MissingTicker { ticker, .. }) => assert_eq!(ticker, "SPY"),
        other => panic!("expected MissingTicker, got {:?}", other.map(|r| r.len())),
    }
}

#[test]
fn test_batch_skips_failed_runs() {
    let panel = Panel::new(
        vec!["A".to_string(), "B".to_string()],
        vec![day(0), day(1)],
        vec![vec![obs(0.01), obs(0.0)], vec![obs(0.02), obs(0.0)]],
    )
    .unwrap();
    let policies: Vec<Box<dyn AllocationPolicy>> = vec![
        Box::new(MomentumTilt::new(panel.tickers().to_vec(), "SPY")),
        Box::new(EqualWeight::new(panel.tickers().to_vec())),
    ];

    let results = run_batch(&panel, &policies, &[500.0, 2500.0], 0.0005);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.model == "equal_weight"));
    assert_eq!(results[0].starting_capital, 500.0);
    assert_eq!(results[1].starting_capital, 2500.0);
}

#[test]
fn test_empty_date_range_is_skippable() {
    let panel = scenario_panel();
    let engine = Engine::new(BacktestConfig {
        starting_capital: 1000.0,
        slippage_rate: 0.0005,
        start_date: Some(day(100)),
        end_date: Some(day(200)),
        ..Default::default()
    });
    let policy = EqualWeight::new(panel.tickers().to_vec());

    let result = engine.run(&panel, &policy).unwrap();
    assert!(result.is_empty());
    assert!(PerformanceMetrics::from_result(&result).is_err());
}

#[test]
fn test_external_model_adapter_passes_scores_through() {
    let panel = scenario_panel();
    let scorer: Arc<dyn Scorer> = Arc::new(|features: &FeatureMatrix| -> panelbt::Result<Vec<f64>> {
        // Long the first row, short the second: leverage is not corrected.
        let mut w = vec![0.0; features.num_rows()];
        w[0] = 1.5;
        w[1] = -0.5;
        Ok(w)
    });
    let policy = ModelAdapter::new("stub_model", panel.tickers().to_vec(), scorer);

    let result = run_backtest(&panel, &policy, 1000.0, 0.0).unwrap();
    assert_eq!(result.model, "stub_model");
    assert!((result.records[1].turnover - 2.0).abs() < 1e-12);
    let day1 = 1000.0 * (1.0 + 1.5 * 0.01 - 0.5 * -0.02);
    assert!((result.records[1].nav - day1).abs() < 1e-9);
}

#[test]
fn test_csv_ingest_builds_aligned_panel() {
    let dir = tempfile::tempdir().unwrap();
    let panel = study_panel(dir.path(), 120);

    assert_eq!(panel.tickers(), &["AAA", "BBB", "CCC", "SPY"]);
    assert_eq!(panel.len(), 120);
    assert_eq!(panel.dates()[0], day(0));

    let spy = panel.series("SPY").unwrap();
    assert!(spy[0].ret.is_nan());
    assert!(spy[1..].iter().all(|o| o.ret.abs() <= DEFAULT_RETURN_CLIP));
    assert!(spy[59].momentum_60.is_nan());
    assert!(!spy[60].momentum_60.is_nan());
    assert!(spy[29].vol_30.is_nan());
    assert!(!spy[30].vol_30.is_nan());

    let summary = panel.summary();
    assert_eq!(summary.num_tickers, 4);
    assert_eq!(summary.incomplete().count(), 0);
}

#[test]
fn test_panel_parquet_round_trip_preserves_simulation() {
    let dir = tempfile::tempdir().unwrap();
    let panel = study_panel(dir.path(), 90);
    let path = dir.path().join("panel_signals.parquet");
    panel.write_parquet(&path).unwrap();
    let back = Panel::read_parquet(&path).unwrap();

    assert_eq!(back.tickers(), panel.tickers());
    assert_eq!(back.dates(), panel.dates());

    let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY");
    let a = run_backtest(&panel, &policy, 500.0, 0.0005).unwrap();
    let b = run_backtest(&back, &policy, 500.0, 0.0005).unwrap();
    assert_eq!(a.records, b.records);
}

#[test]
fn test_full_study_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let panel = study_panel(dir.path(), 150);

    let settings = PolicySettings {
        benchmark: "SPY".to_string(),
        top_n: 2,
    };
    let policies: Vec<Box<dyn AllocationPolicy>> = PolicyKind::all()
        .iter()
        .map(|k| k.build(panel.tickers(), &settings))
        .collect();
    let capitals = [500.0, 2500.0, 5000.0];
    let results = run_batch(&panel, &policies, &capitals, 0.0005);
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.len() == panel.len() + 1));

    // Persist and reload the way the CLI does.
    let rows = to_rows(&results);
    let results_path = dir.path().join("backtest_results.parquet");
    save_results(&rows, &results_path).unwrap();
    let loaded = group_rows(&load_results(&results_path).unwrap(), 0.0005);
    assert_eq!(loaded.len(), 6);
    for (a, b) in results.iter().zip(&loaded) {
        assert_eq!(a.model, b.model);
        assert_eq!(a.starting_capital, b.starting_capital);
        assert_eq!(a.records, b.records);
    }

    let summaries = summarize(&loaded);
    assert_eq!(summaries.len(), 6);
    for s in &summaries {
        assert!(s.max_drawdown <= 0.0);
        assert!(s.annual_vol > 0.0);
    }
    let summary_path = dir.path().join("performance_summary.csv");
    write_csv(&summaries, &summary_path).unwrap();
    assert_eq!(fs::read_to_string(&summary_path).unwrap().lines().count(), 7);

    let tests = paired_tests(&loaded, "momentum_tilt", "equal_weight", 500.0).unwrap();
    assert_eq!(tests.n, panel.len());
    assert!((0.0..=1.0).contains(&tests.p_val));
    assert!((0.0..=1.0).contains(&tests.p_wilcoxon));

    let ci = bootstrap_cum_diff(&loaded, "momentum_tilt", "equal_weight", 500.0, 500, 42).unwrap();
    assert!(ci.lower <= ci.upper);
    let again = bootstrap_cum_diff(&loaded, "momentum_tilt", "equal_weight", 500.0, 500, 42).unwrap();
    assert_eq!(ci, again);
}

#[test]
fn test_sensitivity_sweep_monotone_in_slippage() {
    let dir = tempfile::tempdir().unwrap();
    let panel = study_panel(dir.path(), 150);

    let config = SensitivityConfig::default()
        .with_slippages(vec![0.0, 0.0005, 0.0010])
        .with_capitals(vec![1000.0])
        .with_periods(vec![
            Period::new("all", day(0), day(149)),
            Period::new("late", day(90), day(149)),
            Period::new("none", day(400), day(500)),
        ]);
    let records = run_sensitivity(&panel, &config).unwrap();

    // Two non-empty periods, 3 slippages x 2 policies x 1 capital each.
    assert_eq!(records.len(), 12);
    assert!(records.iter().all(|r| r.period != "none"));
    assert!(slippage_violations(&records).is_empty());

    for model in ["equal_weight", "momentum_tilt"] {
        let series: Vec<f64> = records
            .iter()
            .filter(|r| r.period == "all" && r.model == model)
            .map(|r| r.cumulative_return)
            .collect();
        assert_eq!(series.len(), 3);
        assert!(series[0] > series[1], "{}: {:?}", model, series);
        assert!(series[1] > series[2], "{}: {:?}", model, series);
    }

    let bps: Vec<i64> = records
        .iter()
        .filter(|r| r.period == "all" && r.model == "equal_weight")
        .map(|r| r.slippage_bps)
        .collect();
    assert_eq!(bps, vec![0, 5, 10]);
}

#[test]
fn test_rerun_is_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let panel = study_panel(dir.path(), 100);
    let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY");

    let first = run_backtest(&panel, &policy, 2500.0, 0.001).unwrap();
    let second = run_backtest(&panel, &policy, 2500.0, 0.001).unwrap();
    let bits = |r: &panelbt::BacktestResult| -> Vec<u64> {
        r.records.iter().map(|rec| rec.nav.to_bits()).collect()
    };
    assert_eq!(bits(&first), bits(&second));
}
