//! Batch runner over (policy, capital) combinations.

use crate::engine::{run_backtest, BacktestConfig, BacktestResult, Engine};
use crate::error::Result;
use crate::panel::Panel;
use crate::policy::AllocationPolicy;
use crate::types::{NavRecord, ResultRow};
use rayon::prelude::*;
use tracing::{info, warn};

/// Capital levels run by default.
pub const DEFAULT_CAPITALS: [f64; 3] = [500.0, 2500.0, 5000.0];

/// Slippage rate used by default (5 bps).
pub const DEFAULT_SLIPPAGE: f64 = 0.0005;

/// Unique (policy, capital) jobs in policy order, then capital order.
///
/// Repeated capital levels (exact match) and repeated policy labels are
/// dropped with a warning.
fn batch_jobs<'a>(
    policies: &'a [Box<dyn AllocationPolicy>],
    capitals: &[f64],
) -> Vec<(&'a dyn AllocationPolicy, f64)> {
    let mut levels: Vec<f64> = Vec::with_capacity(capitals.len());
    for &capital in capitals {
        if levels.contains(&capital) {
            warn!("Duplicate capital level {} ignored", capital);
        } else {
            levels.push(capital);
        }
    }

    let mut labels: Vec<&str> = Vec::with_capacity(policies.len());
    let mut jobs = Vec::with_capacity(policies.len() * levels.len());
    for policy in policies {
        if labels.contains(&policy.name()) {
            warn!("Duplicate policy {} ignored", policy.name());
            continue;
        }
        labels.push(policy.name());
        jobs.extend(levels.iter().map(|&c| (&**policy, c)));
    }
    jobs
}

fn keep_success(
    policy: &dyn AllocationPolicy,
    capital: f64,
    outcome: Result<BacktestResult>,
) -> Option<BacktestResult> {
    match outcome {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(
                "Backtest {} (capital {}) run failed: {}",
                policy.name(),
                capital,
                e
            );
            None
        }
    }
}

/// Run every policy at every capital level.
///
/// Runs execute in parallel. A failing run is logged and left out; the rest
/// come back in policy order, then capital order. Each (policy, capital)
/// combination runs at most once.
pub fn run_batch(
    panel: &Panel,
    policies: &[Box<dyn AllocationPolicy>],
    capitals: &[f64],
    slippage_rate: f64,
) -> Vec<BacktestResult> {
    let jobs = batch_jobs(policies, capitals);

    info!(
        "Running batch: {} runs over {} dates",
        jobs.len(),
        panel.len()
    );

    let results: Vec<BacktestResult> = jobs
        .par_iter()
        .filter_map(|&(policy, capital)| {
            info!("Running backtest: {}, capital={}", policy.name(), capital);
            keep_success(
                policy,
                capital,
                run_backtest(panel, policy, capital, slippage_rate),
            )
        })
        .collect();

    info!("Batch complete: {}/{} runs succeeded", results.len(), jobs.len());
    results
}

/// Same jobs as [`run_batch`], one at a time with a progress bar per run.
pub fn run_batch_with_progress(
    panel: &Panel,
    policies: &[Box<dyn AllocationPolicy>],
    capitals: &[f64],
    slippage_rate: f64,
) -> Vec<BacktestResult> {
    let jobs = batch_jobs(policies, capitals);
    let total = jobs.len();

    let results: Vec<BacktestResult> = jobs
        .into_iter()
        .filter_map(|(policy, capital)| {
            let engine = Engine::new(BacktestConfig {
                starting_capital: capital,
                slippage_rate,
                show_progress: true,
                ..Default::default()
            });
            keep_success(policy, capital, engine.run(panel, policy))
        })
        .collect();

    info!("Batch complete: {}/{} runs succeeded", results.len(), total);
    results
}

/// Flatten results into labelled rows.
pub fn to_rows(results: &[BacktestResult]) -> Vec<ResultRow> {
    results.iter().flat_map(|r| r.to_rows()).collect()
}

/// Rebuild per-run results from labelled rows.
///
/// Rows are grouped by (model, capital) in order of first appearance and
/// sorted by date within a group; the sort is stable so the duplicated first
/// date keeps its row order. Rows carry no slippage, so the caller supplies it.
pub fn group_rows(rows: &[ResultRow], slippage_rate: f64) -> Vec<BacktestResult> {
    let mut groups: Vec<BacktestResult> = Vec::new();
    for row in rows {
        let record = NavRecord {
            date: row.date,
            nav: row.nav,
            turnover: row.turnover,
        };
        match groups
            .iter_mut()
            .find(|g| g.model == row.model && g.starting_capital == row.capital)
        {
            Some(group) => group.records.push(record),
            None => groups.push(BacktestResult {
                model: row.model.clone(),
                starting_capital: row.capital,
                slippage_rate,
                records: vec![record],
            }),
        }
    }
    for group in &mut groups {
        group.records.sort_by_key(|r| r.date);
    }
    groups
}

/// Find the run for `model` at `capital`.
pub fn find_result<'a>(
    results: &'a [BacktestResult],
    model: &str,
    capital: f64,
) -> Option<&'a BacktestResult> {
    results
        .iter()
        .find(|r| r.model == model && (r.starting_capital - capital).abs() < 1e-9)
}
