//! Backtest simulator.
//!
//! Walks the panel's dates in ascending order, asks the policy for weights on
//! each date and compounds NAV:
//!
//! ```text
//! gross    = weights . returns          (undefined returns read as 0)
//! turnover = |weights - prev_weights|_1
//! net      = gross - turnover * slippage_rate
//! nav      = nav * (1 + net)
//! ```
//!
//! The result holds one record per date plus a leading record that repeats
//! the first date with the starting capital and zero turnover.

use crate::error::{BacktestError, Result};
use crate::panel::Panel;
use crate::policy::AllocationPolicy;
use crate::types::{NavRecord, ResultRow, WeightVector};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration for a single simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Capital at the start of the run.
    pub starting_capital: f64,
    /// Cost per unit of turnover (0.0005 = 5 bps).
    pub slippage_rate: f64,
    /// Show progress bar during the run.
    #[serde(default)]
    pub show_progress: bool,
    /// Start date filter (inclusive).
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// End date filter (inclusive).
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            starting_capital: 10_000.0,
            slippage_rate: 0.0005,
            show_progress: false,
            start_date: None,
            end_date: None,
        }
    }
}

impl BacktestConfig {
    /// Check capital and slippage.
    pub fn validate(&self) -> Result<()> {
        validate_inputs(self.starting_capital, self.slippage_rate)
    }
}

fn validate_inputs(starting_capital: f64, slippage_rate: f64) -> Result<()> {
    if !starting_capital.is_finite() || starting_capital <= 0.0 {
        return Err(BacktestError::InvalidInput(format!(
            "Starting capital must be positive, got {}",
            starting_capital
        )));
    }
    if !slippage_rate.is_finite() || slippage_rate < 0.0 {
        return Err(BacktestError::InvalidInput(format!(
            "Slippage rate must be non-negative, got {}",
            slippage_rate
        )));
    }
    Ok(())
}

/// State carried from one date to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub nav: f64,
    /// Previous weights, aligned to the panel's ticker order.
    pub prev_weights: Vec<f64>,
}

/// What happened on one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub gross_return: f64,
    pub turnover: f64,
    pub net_return: f64,
}

impl SimulationState {
    /// Zero weights over `num_tickers` and NAV at the starting capital.
    pub fn new(starting_capital: f64, num_tickers: usize) -> Self {
        Self {
            nav: starting_capital,
            prev_weights: vec![0.0; num_tickers],
        }
    }

    /// Apply one date's weights and realized returns.
    pub fn step(self, weights: Vec<f64>, returns: &[f64], slippage_rate: f64) -> (Self, StepOutcome) {
        let gross_return: f64 = weights.iter().zip(returns).map(|(w, r)| w * r).sum();
        let turnover: f64 = weights
            .iter()
            .zip(&self.prev_weights)
            .map(|(w, p)| (w - p).abs())
            .sum();
        let net_return = gross_return - turnover * slippage_rate;

        let next = Self {
            nav: self.nav * (1.0 + net_return),
            prev_weights: weights,
        };
        let outcome = StepOutcome {
            gross_return,
            turnover,
            net_return,
        };
        (next, outcome)
    }
}

/// Output of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Policy label.
    pub model: String,
    pub starting_capital: f64,
    pub slippage_rate: f64,
    /// Leading synthetic record, then one record per date.
    pub records: Vec<NavRecord>,
}

impl BacktestResult {
    fn empty(model: &str, starting_capital: f64, slippage_rate: f64) -> Self {
        Self {
            model: model.to_string(),
            starting_capital,
            slippage_rate,
            records: Vec::new(),
        }
    }

    /// True when the panel had no trading dates.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn navs(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.nav).collect()
    }

    pub fn final_nav(&self) -> Option<f64> {
        self.records.last().map(|r| r.nav)
    }

    pub fn total_turnover(&self) -> f64 {
        self.records.iter().map(|r| r.turnover).sum()
    }

    /// Flatten into labelled rows.
    pub fn to_rows(&self) -> Vec<ResultRow> {
        self.records
            .iter()
            .map(|r| ResultRow {
                date: r.date,
                nav: r.nav,
                turnover: r.turnover,
                model: self.model.clone(),
                capital: self.starting_capital,
            })
            .collect()
    }
}

/// Map a policy's weights onto the panel's ticker order.
///
/// Panel tickers the policy leaves out get weight 0; a weighted ticker the
/// panel lacks is an error.
pub fn align_weights(weights: &WeightVector, panel: &Panel) -> Result<Vec<f64>> {
    let mut aligned = vec![0.0; panel.num_tickers()];
    for (ticker, w) in weights.iter() {
        let idx = panel
            .ticker_index(ticker)
            .ok_or_else(|| BacktestError::missing_ticker(ticker, "weighted ticker not in panel"))?;
        aligned[idx] = w;
    }
    Ok(aligned)
}

/// Run one simulation over every date of `panel`.
///
/// An empty panel produces an empty result. A policy error aborts the run.
pub fn run_backtest(
    panel: &Panel,
    policy: &dyn AllocationPolicy,
    starting_capital: f64,
    slippage_rate: f64,
) -> Result<BacktestResult> {
    simulate(panel, policy, starting_capital, slippage_rate, None)
}

fn simulate(
    panel: &Panel,
    policy: &dyn AllocationPolicy,
    starting_capital: f64,
    slippage_rate: f64,
    progress: Option<&ProgressBar>,
) -> Result<BacktestResult> {
    validate_inputs(starting_capital, slippage_rate)?;

    if panel.is_empty() {
        warn!(
            "No trading dates for {} (capital {}); returning empty result",
            policy.name(),
            starting_capital
        );
        return Ok(BacktestResult::empty(
            policy.name(),
            starting_capital,
            slippage_rate,
        ));
    }

    debug!(
        "Simulating {} over {} dates, {} tickers, capital {}, slippage {}",
        policy.name(),
        panel.len(),
        panel.num_tickers(),
        starting_capital,
        slippage_rate
    );

    let dates = panel.dates();
    let mut records = Vec::with_capacity(dates.len() + 1);
    records.push(NavRecord {
        date: dates[0],
        nav: starting_capital,
        turnover: 0.0,
    });

    let mut state = SimulationState::new(starting_capital, panel.num_tickers());
    for (i, &date) in dates.iter().enumerate() {
        let snapshot = panel.snapshot(i)?;
        let returns = panel.realized_returns(i);
        let weights = policy.get_weights(date, &snapshot)?;
        let aligned = align_weights(&weights, panel)?;

        let (next, outcome) = state.step(aligned, &returns, slippage_rate);
        state = next;
        records.push(NavRecord {
            date,
            nav: state.nav,
            turnover: outcome.turnover,
        });

        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    Ok(BacktestResult {
        model: policy.name().to_string(),
        starting_capital,
        slippage_rate,
        records,
    })
}

/// Simulator driven by a [`BacktestConfig`].
pub struct Engine {
    config: BacktestConfig,
}

impl Engine {
    /// Create a new engine.
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run `policy` over the configured date range of `panel`.
    pub fn run(&self, panel: &Panel, policy: &dyn AllocationPolicy) -> Result<BacktestResult> {
        self.config.validate()?;

        let filtered;
        let panel = if self.config.start_date.is_some() || self.config.end_date.is_some() {
            filtered = panel.filter_dates(self.config.start_date, self.config.end_date);
            &filtered
        } else {
            panel
        };

        info!(
            "Running backtest: {} on {} tickers ({} dates)",
            policy.name(),
            panel.num_tickers(),
            panel.len()
        );

        let progress = if self.config.show_progress && !panel.is_empty() {
            let pb = ProgressBar::new(panel.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let result = simulate(
            panel,
            policy,
            self.config.starting_capital,
            self.config.slippage_rate,
            progress.as_ref(),
        );

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let result = result?;
        if let Some(nav) = result.final_nav() {
            info!(
                "Backtest complete: {} final NAV {:.2} from {:.2}",
                result.model, nav, result.starting_capital
            );
        }
        Ok(result)
    }
}
