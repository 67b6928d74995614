//! Slippage and capital sensitivity sweeps.
//!
//! For each named period the panel is restricted to the period's dates and
//! every (slippage, policy, capital) combination is simulated. Each run
//! contributes one [`SensitivityRecord`] with the usual performance metrics.
//!
//! A period without trading dates logs a warning and contributes nothing, so
//! one empty window never sinks the sweep.
//!
//! # Example
//!
//! ```ignore
//! use panelbt::sensitivity::{Period, SensitivityConfig, run_sensitivity};
//!
//! let config = SensitivityConfig::default()
//!     .with_slippages(vec![0.0, 0.0005, 0.0010])
//!     .add_period(Period::new("2020", start, end));
//! let records = run_sensitivity(&panel, &config)?;
//! ```

use crate::analytics::PerformanceMetrics;
use crate::batch::DEFAULT_CAPITALS;
use crate::engine::run_backtest;
use crate::error::{BacktestError, Result};
use crate::panel::Panel;
use crate::policy::{PolicyKind, PolicySettings};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Slippage grid run by default: 2, 5 and 10 bps.
pub const DEFAULT_SLIPPAGES: [f64; 3] = [0.0002, 0.0005, 0.0010];

/// Named inclusive date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(name: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// Full-year period from January 1 of `first` to December 31 of `last`.
    pub fn years(first: i32, last: i32) -> Option<Self> {
        Some(Self::new(
            format!("{}-{}", first, last),
            NaiveDate::from_ymd_opt(first, 1, 1)?,
            NaiveDate::from_ymd_opt(last, 12, 31)?,
        ))
    }
}

/// Baseline 2018-2023 and pre-COVID 2015-2019 windows.
pub fn default_periods() -> Vec<Period> {
    [(2018, 2023), (2015, 2019)]
        .iter()
        .filter_map(|&(a, b)| Period::years(a, b))
        .collect()
}

/// Grid of a sensitivity sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityConfig {
    #[serde(default = "default_slippages")]
    pub slippages: Vec<f64>,
    #[serde(default = "default_capitals")]
    pub capitals: Vec<f64>,
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyKind>,
    #[serde(default = "default_periods")]
    pub periods: Vec<Period>,
    #[serde(default)]
    pub policy_settings: PolicySettings,
}

fn default_slippages() -> Vec<f64> {
    DEFAULT_SLIPPAGES.to_vec()
}

fn default_capitals() -> Vec<f64> {
    DEFAULT_CAPITALS.to_vec()
}

fn default_policies() -> Vec<PolicyKind> {
    PolicyKind::all().to_vec()
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            slippages: default_slippages(),
            capitals: default_capitals(),
            policies: default_policies(),
            periods: default_periods(),
            policy_settings: PolicySettings::default(),
        }
    }
}

impl SensitivityConfig {
    pub fn with_slippages(mut self, slippages: Vec<f64>) -> Self {
        self.slippages = slippages;
        self
    }

    pub fn with_capitals(mut self, capitals: Vec<f64>) -> Self {
        self.capitals = capitals;
        self
    }

    pub fn with_policies(mut self, policies: Vec<PolicyKind>) -> Self {
        self.policies = policies;
        self
    }

    /// Replace all periods with `periods`.
    pub fn with_periods(mut self, periods: Vec<Period>) -> Self {
        self.periods = periods;
        self
    }

    pub fn add_period(mut self, period: Period) -> Self {
        self.periods.push(period);
        self
    }

    /// Number of runs per non-empty period.
    pub fn runs_per_period(&self) -> usize {
        self.slippages.len() * self.policies.len() * self.capitals.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.slippages.is_empty() || self.capitals.is_empty() || self.policies.is_empty() {
            return Err(BacktestError::ConfigError(
                "Sensitivity grid needs at least one slippage, capital and policy".to_string(),
            ));
        }
        if let Some(s) = self.slippages.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(BacktestError::ConfigError(format!(
                "Slippage must be non-negative, got {}",
                s
            )));
        }
        if let Some(p) = self.periods.iter().find(|p| p.start > p.end) {
            return Err(BacktestError::ConfigError(format!(
                "Period {} starts after it ends",
                p.name
            )));
        }
        Ok(())
    }
}

/// Whole basis points of a slippage rate, rounded to nearest.
pub fn slippage_bps(slippage_rate: f64) -> i64 {
    (slippage_rate * 10_000.0).round() as i64
}

/// Metrics of one run in the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRecord {
    pub period: String,
    pub slippage_bps: i64,
    pub model: String,
    pub capital: f64,
    pub cumulative_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub annual_vol: f64,
}

/// Run the full sweep over every configured period.
pub fn run_sensitivity(panel: &Panel, config: &SensitivityConfig) -> Result<Vec<SensitivityRecord>> {
    config.validate()?;

    let mut records = Vec::new();
    for period in &config.periods {
        records.extend(run_period(panel, period, config));
    }
    info!(
        "Sensitivity sweep complete: {} records over {} periods",
        records.len(),
        config.periods.len()
    );
    Ok(records)
}

/// Run the grid for one period.
///
/// Records come back in slippage, policy, capital order. Failed runs are
/// logged and left out.
pub fn run_period(panel: &Panel, period: &Period, config: &SensitivityConfig) -> Vec<SensitivityRecord> {
    let sub = panel.filter_dates(Some(period.start), Some(period.end));
    if sub.is_empty() {
        warn!(
            "No trading dates for period {} ({} to {}), skipping",
            period.name, period.start, period.end
        );
        return Vec::new();
    }

    let policies: Vec<_> = config
        .policies
        .iter()
        .map(|kind| kind.build(sub.tickers(), &config.policy_settings))
        .collect();

    let jobs: Vec<(f64, usize, f64)> = config
        .slippages
        .iter()
        .flat_map(|&slip| {
            let capitals = &config.capitals;
            (0..policies.len()).flat_map(move |p| capitals.iter().map(move |&cap| (slip, p, cap)))
        })
        .collect();

    info!(
        "Period {}: {} runs over {} dates",
        period.name,
        jobs.len(),
        sub.len()
    );

    jobs.par_iter()
        .filter_map(|&(slip, p, capital)| {
            let policy = &*policies[p];
            let metrics = run_backtest(&sub, policy, capital, slip)
                .and_then(|result| PerformanceMetrics::from_result(&result));
            match metrics {
                Ok(m) => Some(SensitivityRecord {
                    period: period.name.clone(),
                    slippage_bps: slippage_bps(slip),
                    model: policy.name().to_string(),
                    capital,
                    cumulative_return: m.cumulative_return,
                    sharpe_ratio: m.sharpe_ratio,
                    max_drawdown: m.max_drawdown,
                    annual_vol: m.annual_vol,
                }),
                Err(e) => {
                    warn!(
                        "Period {} {} (capital {}, slippage {}) run failed: {}",
                        period.name,
                        policy.name(),
                        capital,
                        slip,
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

/// A rise in cumulative return when slippage went up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlippageViolation {
    pub period: String,
    pub model: String,
    pub capital: f64,
    pub from_bps: i64,
    pub to_bps: i64,
    pub from_return: f64,
    pub to_return: f64,
}

/// Find every (period, model, capital) whose cumulative return increases
/// with slippage. An empty vec means the sweep is monotone.
pub fn slippage_violations(records: &[SensitivityRecord]) -> Vec<SlippageViolation> {
    let mut keys: Vec<(&str, &str, f64)> = Vec::new();
    for r in records {
        let key = (r.period.as_str(), r.model.as_str(), r.capital);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let mut violations = Vec::new();
    for (period, model, capital) in keys {
        let mut series: Vec<&SensitivityRecord> = records
            .iter()
            .filter(|r| r.period == period && r.model == model && r.capital == capital)
            .collect();
        series.sort_by_key(|r| r.slippage_bps);

        for pair in series.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if hi.slippage_bps > lo.slippage_bps && hi.cumulative_return > lo.cumulative_return {
                violations.push(SlippageViolation {
                    period: period.to_string(),
                    model: model.to_string(),
                    capital,
                    from_bps: lo.slippage_bps,
                    to_bps: hi.slippage_bps,
                    from_return: lo.cumulative_return,
                    to_return: hi.cumulative_return,
                });
            }
        }
    }
    violations
}

/// Sharpe ratio by slippage for each model of `period` at `capital`.
pub fn sharpe_by_slippage(
    records: &[SensitivityRecord],
    period: &str,
    capital: f64,
) -> Vec<(String, Vec<(i64, f64)>)> {
    let mut curves: Vec<(String, Vec<(i64, f64)>)> = Vec::new();
    for r in records
        .iter()
        .filter(|r| r.period == period && r.capital == capital)
    {
        let point = (r.slippage_bps, r.sharpe_ratio);
        match curves.iter_mut().find(|(m, _)| *m == r.model) {
            Some((_, points)) => points.push(point),
            None => curves.push((r.model.clone(), vec![point])),
        }
    }
    for (_, points) in &mut curves {
        points.sort_by_key(|p| p.0);
    }
    curves
}
