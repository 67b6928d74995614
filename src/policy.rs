//! Allocation policies: map a date's signal snapshot to target weights.
//!
//! Every policy is a pure function of `(date, snapshot)` and state fixed at
//! construction. Nothing is mutated between calls, so a simulation can be
//! replayed bit for bit and policies can be shared across parallel runs.
//!
//! Three implementations are provided:
//!
//! - [`EqualWeight`]: `1/N` on every ticker of its universe.
//! - [`MomentumTilt`]: a fixed 80% on a benchmark ticker, with the remaining
//!   20% split equally among the top-momentum non-benchmark tickers.
//! - [`ModelAdapter`]: hands a feature matrix to an injected [`Scorer`] and
//!   passes the scores through as weights.

use crate::error::{BacktestError, Result};
use crate::features::SIGNAL_COLUMNS;
use crate::types::{SignalSnapshot, WeightVector};
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Weight given to the benchmark by [`MomentumTilt`].
pub const BENCHMARK_WEIGHT: f64 = 0.80;
/// Weight shared by the tilt selection of [`MomentumTilt`].
pub const TILT_WEIGHT: f64 = 0.20;
/// Default benchmark ticker.
pub const DEFAULT_BENCHMARK: &str = "SPY";
/// Default size of the momentum selection.
pub const DEFAULT_TOP_N: usize = 5;

/// Capability shared by all allocation policies.
pub trait AllocationPolicy: Send + Sync {
    /// Label used in results.
    fn name(&self) -> &str;

    /// The fixed ticker universe this policy allocates over.
    fn tickers(&self) -> &[String];

    /// Target weights for `date`.
    fn get_weights(&self, date: NaiveDate, snapshot: &SignalSnapshot) -> Result<WeightVector>;
}

/// Equal weights over a fixed universe.
#[derive(Debug, Clone)]
pub struct EqualWeight {
    name: String,
    tickers: Vec<String>,
}

impl EqualWeight {
    pub fn new(tickers: Vec<String>) -> Self {
        Self {
            name: PolicyKind::EqualWeight.label().to_string(),
            tickers,
        }
    }

    /// Override the result label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl AllocationPolicy for EqualWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn tickers(&self) -> &[String] {
        &self.tickers
    }

    fn get_weights(&self, _date: NaiveDate, _snapshot: &SignalSnapshot) -> Result<WeightVector> {
        let n = self.tickers.len();
        let weight = if n == 0 { 0.0 } else { 1.0 / n as f64 };
        WeightVector::new(self.tickers.clone(), vec![weight; n])
    }
}

/// Benchmark core plus a momentum-ranked satellite.
///
/// Non-benchmark tickers are ranked by `momentum_60` descending; undefined
/// momentum is excluded from the ranking. The sort is stable, so ties keep
/// universe order (implementation-defined tie order). If nothing qualifies,
/// the satellite weight stays unallocated.
#[derive(Debug, Clone)]
pub struct MomentumTilt {
    name: String,
    tickers: Vec<String>,
    benchmark: String,
    top_n: usize,
}

impl MomentumTilt {
    /// Create a tilt over `tickers`; the benchmark joins the universe if absent.
    pub fn new(mut tickers: Vec<String>, benchmark: impl Into<String>) -> Self {
        let benchmark = benchmark.into();
        if !tickers.contains(&benchmark) {
            tickers.push(benchmark.clone());
        }
        Self {
            name: PolicyKind::MomentumTilt.label().to_string(),
            tickers,
            benchmark,
            top_n: DEFAULT_TOP_N,
        }
    }

    /// Set the number of tickers in the momentum selection.
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn benchmark(&self) -> &str {
        &self.benchmark
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Non-benchmark tickers picked on this snapshot, best first.
    pub fn select(&self, snapshot: &SignalSnapshot) -> Result<Vec<usize>> {
        let mut ranked: Vec<(usize, f64)> = Vec::with_capacity(self.tickers.len());
        for (idx, ticker) in self.tickers.iter().enumerate() {
            if *ticker == self.benchmark {
                continue;
            }
            let signals = snapshot
                .get(ticker)
                .ok_or_else(|| BacktestError::missing_ticker(ticker.as_str(), "absent from snapshot"))?;
            if !signals.momentum_60.is_nan() {
                ranked.push((idx, signals.momentum_60));
            }
        }

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked
            .into_iter()
            .take(self.top_n)
            .map(|(idx, _)| idx)
            .collect())
    }
}

impl AllocationPolicy for MomentumTilt {
    fn name(&self) -> &str {
        &self.name
    }

    fn tickers(&self) -> &[String] {
        &self.tickers
    }

    fn get_weights(&self, _date: NaiveDate, snapshot: &SignalSnapshot) -> Result<WeightVector> {
        if !snapshot.contains(&self.benchmark) {
            return Err(BacktestError::missing_ticker(
                self.benchmark.as_str(),
                "momentum tilt benchmark absent from snapshot",
            ));
        }

        let selected = self.select(snapshot)?;
        let mut weights = vec![0.0; self.tickers.len()];
        if let Some(idx) = self.tickers.iter().position(|t| *t == self.benchmark) {
            weights[idx] = BENCHMARK_WEIGHT;
        }
        if !selected.is_empty() {
            let each = TILT_WEIGHT / selected.len() as f64;
            for idx in selected {
                weights[idx] = each;
            }
        }

        WeightVector::new(self.tickers.clone(), weights)
    }
}

/// Ticker-by-signal matrix handed to an external scorer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureMatrix {
    /// Row labels, in the adapter's declared order.
    pub tickers: Vec<String>,
    /// Column labels.
    pub columns: Vec<String>,
    /// `values[row][col]`; undefined signals are NaN.
    pub values: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Extract the signal columns for `tickers` from a snapshot.
    pub fn from_snapshot(snapshot: &SignalSnapshot, tickers: &[String]) -> Result<Self> {
        let values = tickers
            .iter()
            .map(|t| {
                snapshot
                    .get(t)
                    .map(|s| vec![s.momentum_60, s.vol_30])
                    .ok_or_else(|| BacktestError::missing_ticker(t.as_str(), "absent from snapshot"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tickers: tickers.to_vec(),
            columns: SIGNAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            values,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.values.len()
    }

    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }
}

/// External model boundary: one raw weight per feature-matrix row.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;
}

impl<F> Scorer for F
where
    F: Fn(&FeatureMatrix) -> Result<Vec<f64>> + Send + Sync,
{
    fn score(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        self(features)
    }
}

/// Policy delegating to an injected scorer.
///
/// Scores are used verbatim as weights: no normalization, clipping or sign
/// checks. Only the output length is checked against the universe.
#[derive(Clone)]
pub struct ModelAdapter {
    name: String,
    tickers: Vec<String>,
    scorer: Arc<dyn Scorer>,
}

impl ModelAdapter {
    pub fn new(name: impl Into<String>, tickers: Vec<String>, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            name: name.into(),
            tickers,
            scorer,
        }
    }
}

impl fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("name", &self.name)
            .field("tickers", &self.tickers)
            .finish_non_exhaustive()
    }
}

impl AllocationPolicy for ModelAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn tickers(&self) -> &[String] {
        &self.tickers
    }

    fn get_weights(&self, date: NaiveDate, snapshot: &SignalSnapshot) -> Result<WeightVector> {
        let features = FeatureMatrix::from_snapshot(snapshot, &self.tickers)?;
        let scores = self.scorer.score(&features)?;
        if scores.len() != self.tickers.len() {
            return Err(BacktestError::ModelError(format!(
                "Scorer for {} returned {} weights for {} tickers on {}",
                self.name,
                scores.len(),
                self.tickers.len(),
                date
            )));
        }
        WeightVector::new(self.tickers.clone(), scores)
    }
}

/// Built-in policy selector used by configuration and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Equal weight across the universe
    EqualWeight,
    /// 80% benchmark, 20% across the top-momentum tickers
    MomentumTilt,
}

impl PolicyKind {
    /// Result label of the built-in policy.
    pub fn label(&self) -> &'static str {
        match self {
            PolicyKind::EqualWeight => "equal_weight",
            PolicyKind::MomentumTilt => "momentum_tilt",
        }
    }

    pub fn all() -> [PolicyKind; 2] {
        [PolicyKind::EqualWeight, PolicyKind::MomentumTilt]
    }

    /// Instantiate over a ticker universe.
    pub fn build(&self, tickers: &[String], settings: &PolicySettings) -> Box<dyn AllocationPolicy> {
        match self {
            PolicyKind::EqualWeight => Box::new(EqualWeight::new(tickers.to_vec())),
            PolicyKind::MomentumTilt => Box::new(
                MomentumTilt::new(tickers.to_vec(), settings.benchmark.clone())
                    .with_top_n(settings.top_n),
            ),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Construction parameters for the built-in policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_benchmark() -> String {
    DEFAULT_BENCHMARK.to_string()
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            benchmark: default_benchmark(),
            top_n: default_top_n(),
        }
    }
}
