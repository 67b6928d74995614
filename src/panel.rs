//! The master panel: a ticker x date grid of prices, returns and signals.
//!
//! Every ticker has a cell for every date on the panel's calendar. Gaps in the
//! raw bars are forward-filled when the panel is built, never later; cells
//! before a ticker's first bar stay undefined (NaN).

use crate::data::{date_column, f64_column, string_column};
use crate::error::{BacktestError, Result};
use crate::types::{Bar, Observation, SignalSnapshot, TickerSignals};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Default bound applied to daily close-to-close returns.
pub const DEFAULT_RETURN_CLIP: f64 = 0.20;

/// Column layout used when the panel is persisted in long format.
pub const PANEL_COLUMNS: [&str; 10] = [
    "ticker",
    "date",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "return",
    "momentum_60",
    "vol_30",
];

/// Ticker x date table of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    tickers: Vec<String>,
    dates: Vec<NaiveDate>,
    /// `cells[ticker][date]`
    cells: Vec<Vec<Observation>>,
}

impl Panel {
    /// Assemble a panel from parts.
    ///
    /// Dates must be strictly ascending, tickers unique, and `cells` must hold
    /// one row per ticker with one observation per date.
    pub fn new(
        tickers: Vec<String>,
        dates: Vec<NaiveDate>,
        cells: Vec<Vec<Observation>>,
    ) -> Result<Self> {
        if cells.len() != tickers.len() {
            return Err(BacktestError::DataError(format!(
                "Panel has {} tickers but {} rows",
                tickers.len(),
                cells.len()
            )));
        }
        if let Some((ticker, row)) = tickers
            .iter()
            .zip(cells.iter())
            .find(|(_, row)| row.len() != dates.len())
        {
            return Err(BacktestError::DataError(format!(
                "Ticker {} has {} observations for {} dates",
                ticker,
                row.len(),
                dates.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BacktestError::DataError(
                "Panel dates must be strictly ascending".to_string(),
            ));
        }
        let unique: BTreeSet<&String> = tickers.iter().collect();
        if unique.len() != tickers.len() {
            return Err(BacktestError::DataError(
                "Panel tickers must be unique".to_string(),
            ));
        }

        Ok(Self {
            tickers,
            dates,
            cells,
        })
    }

    /// A panel with no tickers and no dates.
    pub fn empty() -> Self {
        Self {
            tickers: Vec::new(),
            dates: Vec::new(),
            cells: Vec::new(),
        }
    }

    /// Build the master panel from raw bars per ticker.
    ///
    /// The calendar covers every day from the earliest first bar to the latest
    /// last bar. Each ticker is reindexed onto it and forward-filled, then
    /// `return` is the close-to-close change clipped to `[-clip, clip]`.
    pub fn from_bars(bars: &BTreeMap<String, Vec<Bar>>, clip: f64) -> Result<Self> {
        if clip.is_nan() || clip <= 0.0 {
            return Err(BacktestError::InvalidInput(format!(
                "Return clip must be positive, got {}",
                clip
            )));
        }

        let start = bars.values().filter_map(|b| b.iter().map(|x| x.date).min()).min();
        let end = bars.values().filter_map(|b| b.iter().map(|x| x.date).max()).max();
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(BacktestError::NoData),
        };

        let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();

        let mut tickers = Vec::with_capacity(bars.len());
        let mut cells = Vec::with_capacity(bars.len());
        for (ticker, series) in bars {
            let mut sorted: Vec<&Bar> = series.iter().collect();
            sorted.sort_by_key(|b| b.date);
            // Duplicate dates keep the first bar, as in `load_data`.
            sorted.dedup_by_key(|b| b.date);

            let mut row = Vec::with_capacity(dates.len());
            let mut next = 0;
            let mut last: Option<Observation> = None;
            for date in &dates {
                while next < sorted.len() && sorted[next].date <= *date {
                    last = Some(Observation::from_bar(sorted[next]));
                    next += 1;
                }
                row.push(last.unwrap_or(Observation::MISSING));
            }

            let filled = row.iter().filter(|o| o.has_close()).count();
            debug!(
                "{}: {} raw bars, {} filled cells over {} days",
                ticker,
                series.len(),
                filled,
                dates.len()
            );

            tickers.push(ticker.clone());
            cells.push(row);
        }

        let mut panel = Self::new(tickers, dates, cells)?;
        panel.compute_returns(clip);

        info!(
            "Built panel: {} tickers x {} days ({} to {})",
            panel.num_tickers(),
            panel.len(),
            start,
            end
        );
        Ok(panel)
    }

    /// Recompute `return` from closes, clipped to `[-clip, clip]`.
    pub fn compute_returns(&mut self, clip: f64) {
        for row in &mut self.cells {
            let mut prev_close = f64::NAN;
            for obs in row.iter_mut() {
                obs.ret = (obs.close / prev_close - 1.0).clamp(-clip, clip);
                prev_close = obs.close;
            }
        }
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Number of dates.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// True when there are no trading dates.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn num_tickers(&self) -> usize {
        self.tickers.len()
    }

    pub fn ticker_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.ticker_index(ticker).is_some()
    }

    /// All observations of one ticker, in date order.
    pub fn series(&self, ticker: &str) -> Option<&[Observation]> {
        self.ticker_index(ticker).map(|i| self.cells[i].as_slice())
    }

    pub(crate) fn series_mut(&mut self, ticker_idx: usize) -> &mut [Observation] {
        &mut self.cells[ticker_idx]
    }

    /// Observation at `(ticker, date)`.
    pub fn get(&self, ticker: &str, date: NaiveDate) -> Option<&Observation> {
        let t = self.ticker_index(ticker)?;
        let d = self.dates.binary_search(&date).ok()?;
        Some(&self.cells[t][d])
    }

    /// Close prices of one ticker.
    pub fn closes(&self, ticker: &str) -> Result<Vec<f64>> {
        self.series(ticker)
            .map(|s| s.iter().map(|o| o.close).collect())
            .ok_or_else(|| BacktestError::missing_ticker(ticker, "not in panel"))
    }

    /// Signals of every ticker on the date at `date_idx`.
    pub fn snapshot(&self, date_idx: usize) -> Result<SignalSnapshot<'_>> {
        let date = *self.dates.get(date_idx).ok_or_else(|| {
            BacktestError::InvalidInput(format!(
                "Date index {} out of range for {} dates",
                date_idx,
                self.dates.len()
            ))
        })?;
        let signals = self
            .cells
            .iter()
            .map(|row| TickerSignals::from(&row[date_idx]))
            .collect();
        SignalSnapshot::new(date, &self.tickers, signals)
    }

    /// Same-day returns of every ticker, undefined values read as 0.0.
    pub fn realized_returns(&self, date_idx: usize) -> Vec<f64> {
        self.cells
            .iter()
            .map(|row| {
                let r = row[date_idx].ret;
                if r.is_nan() {
                    0.0
                } else {
                    r
                }
            })
            .collect()
    }

    /// Sub-panel restricted to `start..=end`; either bound may be open.
    ///
    /// A range with no dates yields an empty panel that keeps the tickers.
    pub fn filter_dates(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Panel {
        let lo = start.map_or(0, |s| self.dates.partition_point(|d| *d < s));
        let hi = end.map_or(self.dates.len(), |e| self.dates.partition_point(|d| *d <= e));
        let hi = hi.max(lo);

        Panel {
            tickers: self.tickers.clone(),
            dates: self.dates[lo..hi].to_vec(),
            cells: self.cells.iter().map(|row| row[lo..hi].to_vec()).collect(),
        }
    }

    /// Sub-panel keeping only the given tickers, in the given order.
    pub fn select_tickers(&self, tickers: &[String]) -> Result<Panel> {
        let cells = tickers
            .iter()
            .map(|t| {
                self.ticker_index(t)
                    .map(|i| self.cells[i].clone())
                    .ok_or_else(|| BacktestError::missing_ticker(t.as_str(), "not in panel"))
            })
            .collect::<Result<Vec<_>>>()?;
        Panel::new(tickers.to_vec(), self.dates.clone(), cells)
    }

    /// Write the panel to Parquet in long format, one row per (ticker, date).
    pub fn write_parquet(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let batch = self.to_long_batch()?;
        let rows = batch.num_rows();
        write_batches(path, &[batch])?;
        info!("Wrote panel ({} rows) to {}", rows, path.display());
        Ok(())
    }

    /// Long-format record batch, ticker-major.
    fn to_long_batch(&self) -> Result<arrow::record_batch::RecordBatch> {
        use arrow::array::{ArrayRef, Date32Array, Float64Array, StringArray};
        use arrow::datatypes::{DataType, Date32Type, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use std::sync::Arc;

        let mut fields = vec![
            Field::new("ticker", DataType::Utf8, false),
            Field::new("date", DataType::Date32, false),
        ];
        fields.extend(
            PANEL_COLUMNS[2..]
                .iter()
                .map(|name| Field::new(*name, DataType::Float64, true)),
        );
        let schema = Arc::new(Schema::new(fields));

        let n = self.num_tickers() * self.len();
        let mut tickers = Vec::with_capacity(n);
        let mut dates = Vec::with_capacity(n);
        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); 8];
        for (ticker, row) in self.tickers.iter().zip(&self.cells) {
            for (date, obs) in self.dates.iter().zip(row) {
                tickers.push(ticker.as_str());
                dates.push(Date32Type::from_naive_date(*date));
                let values = [
                    obs.open,
                    obs.high,
                    obs.low,
                    obs.close,
                    obs.volume,
                    obs.ret,
                    obs.momentum_60,
                    obs.vol_30,
                ];
                for (col, v) in columns.iter_mut().zip(values) {
                    col.push(v);
                }
            }
        }

        let mut arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(tickers)),
            Arc::new(Date32Array::from(dates)),
        ];
        arrays.extend(
            columns
                .into_iter()
                .map(|c| Arc::new(Float64Array::from(c)) as ArrayRef),
        );

        RecordBatch::try_new(schema, arrays).map_err(|e| {
            BacktestError::DataError(format!("Failed to create record batch: {}", e))
        })
    }

    /// Read a long-format panel written by [`Panel::write_parquet`].
    ///
    /// `momentum_60` and `vol_30` are optional (a panel saved before signals
    /// were computed). Every (ticker, date) pair must appear exactly once.
    pub fn read_parquet(path: impl AsRef<Path>) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let path = path.as_ref();
        info!("Loading panel from: {}", path.display());

        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| BacktestError::DataError(format!("Failed to open parquet file: {}", e)))?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| {
            BacktestError::DataError(format!("Failed to build parquet reader: {}", e))
        })?;

        let index_of = |name: &str| schema.index_of(name).ok();
        let required = |name: &str| {
            index_of(name).ok_or_else(|| {
                BacktestError::DataError(format!("Panel file is missing column '{}'", name))
            })
        };
        let ticker_idx = required("ticker")?;
        let date_idx = required("date")?;
        let value_idx: Vec<Option<usize>> = PANEL_COLUMNS[2..]
            .iter()
            .map(|name| index_of(*name))
            .collect();
        for name in &PANEL_COLUMNS[2..8] {
            required(*name)?;
        }

        let mut grid: BTreeMap<(String, NaiveDate), Observation> = BTreeMap::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                BacktestError::DataError(format!("Failed to read parquet batch: {}", e))
            })?;
            let tickers = string_column(batch.column(ticker_idx).as_ref())?;
            let dates = date_column(batch.column(date_idx).as_ref(), None)?;
            let values = value_idx
                .iter()
                .map(|idx| match idx {
                    Some(i) => f64_column(batch.column(*i).as_ref()),
                    None => Ok(vec![f64::NAN; batch.num_rows()]),
                })
                .collect::<Result<Vec<_>>>()?;

            for row in 0..batch.num_rows() {
                let obs = Observation {
                    open: values[0][row],
                    high: values[1][row],
                    low: values[2][row],
                    close: values[3][row],
                    volume: values[4][row],
                    ret: values[5][row],
                    momentum_60: values[6][row],
                    vol_30: values[7][row],
                };
                let key = (tickers[row].clone(), dates[row]);
                if grid.insert(key, obs).is_some() {
                    return Err(BacktestError::DataError(format!(
                        "Duplicate panel row for {} on {}",
                        tickers[row], dates[row]
                    )));
                }
            }
        }

        let tickers: Vec<String> = grid
            .keys()
            .map(|(t, _)| t.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let dates: Vec<NaiveDate> = grid
            .keys()
            .map(|(_, d)| *d)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if grid.len() != tickers.len() * dates.len() {
            return Err(BacktestError::DataError(format!(
                "Panel is not rectangular: {} rows for {} tickers x {} dates",
                grid.len(),
                tickers.len(),
                dates.len()
            )));
        }

        // BTreeMap iteration is ticker-major, date-minor: exactly the row layout.
        let mut cells: Vec<Vec<Observation>> = Vec::with_capacity(tickers.len());
        let mut values = grid.into_values();
        for _ in &tickers {
            cells.push(values.by_ref().take(dates.len()).collect());
        }

        Panel::new(tickers, dates, cells)
    }

    /// Coverage and return-distribution summary.
    pub fn summary(&self) -> PanelSummary {
        let tickers = self
            .tickers
            .iter()
            .zip(&self.cells)
            .map(|(ticker, row)| {
                let observations = row.iter().filter(|o| o.has_close()).count();
                TickerCoverage {
                    ticker: ticker.clone(),
                    observations,
                    missing_closes: row.len() - observations,
                }
            })
            .collect();

        let returns: Vec<f64> = self
            .cells
            .iter()
            .flat_map(|row| row.iter().map(|o| o.ret))
            .filter(|r| !r.is_nan())
            .collect();

        PanelSummary {
            num_tickers: self.num_tickers(),
            num_dates: self.len(),
            start: self.dates.first().copied(),
            end: self.dates.last().copied(),
            tickers,
            returns: Distribution::describe(&returns),
        }
    }
}

/// Write record batches sharing one schema to a Parquet file.
fn write_batches(path: &Path, batches: &[arrow::record_batch::RecordBatch]) -> Result<()> {
    use parquet::arrow::ArrowWriter;

    let schema = match batches.first() {
        Some(batch) => batch.schema(),
        None => return Err(BacktestError::NoData),
    };

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None).map_err(|e| {
        BacktestError::DataError(format!("Failed to create parquet writer: {}", e))
    })?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| BacktestError::DataError(format!("Failed to write parquet: {}", e)))?;
    }
    writer
        .close()
        .map_err(|e| BacktestError::DataError(format!("Failed to close parquet file: {}", e)))?;
    Ok(())
}

/// Coverage of one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerCoverage {
    pub ticker: String,
    /// Cells with a defined close.
    pub observations: usize,
    /// Cells without a close (leading days before the first bar).
    pub missing_closes: usize,
}

/// Describe-style summary of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1).
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

impl Distribution {
    /// Summarize a sample; an empty sample yields NaN statistics.
    pub fn describe(values: &[f64]) -> Self {
        let count = values.len();
        if count == 0 {
            return Self {
                count,
                mean: f64::NAN,
                std: f64::NAN,
                min: f64::NAN,
                q25: f64::NAN,
                median: f64::NAN,
                q75: f64::NAN,
                max: f64::NAN,
            };
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mean = values.iter().sum::<f64>() / count as f64;
        let std = if count > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        } else {
            f64::NAN
        };

        Self {
            count,
            mean,
            std,
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.50),
            q75: quantile(&sorted, 0.75),
            max: sorted[count - 1],
        }
    }
}

/// Linear-interpolated quantile of sorted data.
pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Summary produced by [`Panel::summary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSummary {
    pub num_tickers: usize,
    pub num_dates: usize,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub tickers: Vec<TickerCoverage>,
    pub returns: Distribution,
}

impl PanelSummary {
    /// Tickers with at least one missing close.
    pub fn incomplete(&self) -> impl Iterator<Item = &TickerCoverage> {
        self.tickers.iter().filter(|t| t.missing_closes > 0)
    }
}
