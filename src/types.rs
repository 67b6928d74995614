//! Core data types shared by the panel, the policies and the simulator.

use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Daily OHLCV bar for a single ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar.
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate that bar data is consistent.
    pub fn validate(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
    }
}

/// One (ticker, date) cell of the panel.
///
/// Undefined values (before a ticker's first bar, or signals whose window is
/// not yet full) are `f64::NAN`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(rename = "return")]
    pub ret: f64,
    pub momentum_60: f64,
    pub vol_30: f64,
}

impl Observation {
    /// A cell with every column undefined.
    pub const MISSING: Observation = Observation {
        open: f64::NAN,
        high: f64::NAN,
        low: f64::NAN,
        close: f64::NAN,
        volume: f64::NAN,
        ret: f64::NAN,
        momentum_60: f64::NAN,
        vol_30: f64::NAN,
    };

    /// Cell carrying a bar's prices, with return and signals still undefined.
    pub fn from_bar(bar: &Bar) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            ..Self::MISSING
        }
    }

    /// Whether the close price is defined.
    pub fn has_close(&self) -> bool {
        !self.close.is_nan()
    }
}

/// Per-ticker values a policy may read on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerSignals {
    pub momentum_60: f64,
    pub vol_30: f64,
    /// Same-day realized return (may be NaN on the first date).
    #[serde(rename = "return")]
    pub ret: f64,
}

impl From<&Observation> for TickerSignals {
    fn from(obs: &Observation) -> Self {
        Self {
            momentum_60: obs.momentum_60,
            vol_30: obs.vol_30,
            ret: obs.ret,
        }
    }
}

/// Slice of the panel for one date, indexed by ticker.
#[derive(Debug, Clone)]
pub struct SignalSnapshot<'a> {
    date: NaiveDate,
    tickers: &'a [String],
    signals: Vec<TickerSignals>,
}

impl<'a> SignalSnapshot<'a> {
    /// Build a snapshot; `signals[i]` belongs to `tickers[i]`.
    pub fn new(date: NaiveDate, tickers: &'a [String], signals: Vec<TickerSignals>) -> Result<Self> {
        if tickers.len() != signals.len() {
            return Err(BacktestError::InvalidInput(format!(
                "Snapshot has {} tickers but {} signal rows",
                tickers.len(),
                signals.len()
            )));
        }
        Ok(Self {
            date,
            tickers,
            signals,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn tickers(&self) -> &[String] {
        self.tickers
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.position(ticker).is_some()
    }

    /// Signals for a ticker, if present.
    pub fn get(&self, ticker: &str) -> Option<&TickerSignals> {
        self.position(ticker).map(|i| &self.signals[i])
    }

    /// Iterate `(ticker, signals)` in panel order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TickerSignals)> {
        self.tickers
            .iter()
            .map(String::as_str)
            .zip(self.signals.iter())
    }

    fn position(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }
}

/// Target allocation: fraction of capital per ticker.
///
/// Weights are never normalized; a vector summing below 1.0 holds implicit cash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    tickers: Vec<String>,
    weights: Vec<f64>,
}

impl WeightVector {
    /// Pair tickers with weights; lengths must match.
    pub fn new(tickers: Vec<String>, weights: Vec<f64>) -> Result<Self> {
        if tickers.len() != weights.len() {
            return Err(BacktestError::InvalidInput(format!(
                "Weight vector has {} tickers but {} weights",
                tickers.len(),
                weights.len()
            )));
        }
        Ok(Self { tickers, weights })
    }

    /// All-zero weights over a universe.
    pub fn zeros(tickers: &[String]) -> Self {
        Self {
            tickers: tickers.to_vec(),
            weights: vec![0.0; tickers.len()],
        }
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weight of a ticker, `None` if it is outside the vector's universe.
    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.weights[i])
    }

    /// Set the weight of a ticker already in the universe.
    pub fn set(&mut self, ticker: &str, weight: f64) -> Result<()> {
        let idx = self
            .tickers
            .iter()
            .position(|t| t == ticker)
            .ok_or_else(|| BacktestError::missing_ticker(ticker, "not in weight universe"))?;
        self.weights[idx] = weight;
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.tickers
            .iter()
            .map(String::as_str)
            .zip(self.weights.iter().copied())
    }
}

/// One row of a simulation result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavRecord {
    pub date: NaiveDate,
    pub nav: f64,
    pub turnover: f64,
}

/// A labelled result row as persisted for downstream analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub date: NaiveDate,
    pub nav: f64,
    pub turnover: f64,
    pub model: String,
    pub capital: f64,
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@{} nav={:.2} turnover={:.4}",
            self.date, self.model, self.capital, self.nav, self.turnover
        )
    }
}
