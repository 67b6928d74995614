//! Loading of per-ticker daily bars from CSV and Parquet files.

use crate::error::{BacktestError, Result};
use crate::types::Bar;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw CSV row with flexible column names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Open", alias = "o")]
    open: f64,
    #[serde(alias = "High", alias = "h")]
    high: f64,
    #[serde(alias = "Low", alias = "l")]
    low: f64,
    #[serde(alias = "Close", alias = "c", alias = "Adj Close", alias = "adj_close")]
    close: f64,
    #[serde(alias = "Volume", alias = "v", alias = "vol", alias = "Vol", default)]
    volume: f64,
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string for parsing (e.g., "%Y-%m-%d").
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
    /// Validate bar data (high >= low, etc.).
    pub validate_bars: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: true,
            validate_bars: true,
        }
    }
}

/// Detect the CSV delimiter from the first few lines of the file.
///
/// Picks the candidate producing a consistent column count of at least five.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in &[b',', b'\t', b';', b'|'] {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();

        let first_count = counts[0];
        let consistent = counts.iter().all(|&c| c == first_count);
        if consistent && first_count >= 5 && first_count > best_score {
            best_score = first_count;
            best_delimiter = delim;
        }
    }

    debug!(
        "Detected delimiter {:?} with score {}",
        best_delimiter as char, best_score
    );
    Ok(best_delimiter)
}

/// Parse a calendar date, trying an explicit format first and then common layouts.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%d-%b-%Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    // Unix epoch in milliseconds (vendor aggregates) or seconds
    if let Ok(ts) = s.parse::<i64>() {
        let parsed = if ts > 1_000_000_000_000 {
            DateTime::from_timestamp_millis(ts)
        } else {
            DateTime::from_timestamp(ts, 0)
        };
        if let Some(dt) = parsed {
            return Ok(dt.date_naive());
        }
    }

    Err(BacktestError::DataError(format!(
        "Could not parse date: '{}'",
        s
    )))
}

/// Sort bars by date and drop duplicate dates, keeping the first occurrence.
fn finalize_bars(mut bars: Vec<Bar>, skipped: usize, source: &Path) -> Result<Vec<Bar>> {
    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, source.display());
    }

    bars.sort_by_key(|b| b.date);
    let original_len = bars.len();
    bars.dedup_by_key(|b| b.date);
    if bars.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - bars.len());
    }

    if bars.is_empty() {
        return Err(BacktestError::NoData);
    }

    info!(
        "Loaded {} bars from {} to {}",
        bars.len(),
        bars[0].date,
        bars[bars.len() - 1].date
    );
    Ok(bars)
}

/// Load daily OHLCV bars from a CSV file.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut bars = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize().enumerate() {
        let row: CsvRow = match result {
            Ok(r) => r,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(BacktestError::CsvError(e)),
        };

        let date = match parse_date(&row.date, config.date_format.as_deref()) {
            Ok(d) => d,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {} due to date parse error: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let bar = Bar::new(date, row.open, row.high, row.low, row.close, row.volume);
        if config.validate_bars && !bar.validate() {
            if config.skip_invalid {
                debug!("Skipping row {} due to invalid bar data: {:?}", row_num + 1, bar);
                skipped += 1;
                continue;
            }
            return Err(BacktestError::DataError(format!(
                "Invalid bar data at row {}: {:?}",
                row_num + 1,
                bar
            )));
        }

        bars.push(bar);
    }

    finalize_bars(bars, skipped, path)
}

fn find_column_index(schema: &arrow::datatypes::Schema, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|name| schema.index_of(name).ok())
}

/// Read a numeric Arrow column as `f64`, nulls becoming NaN.
pub(crate) fn f64_column(array: &dyn arrow::array::Array) -> Result<Vec<f64>> {
    use arrow::array::{Array, Float32Array, Float64Array, Int64Array};

    if let Some(arr) = array.as_any().downcast_ref::<Float64Array>() {
        return Ok((0..arr.len())
            .map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) })
            .collect());
    }
    if let Some(arr) = array.as_any().downcast_ref::<Float32Array>() {
        return Ok((0..arr.len())
            .map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) as f64 })
            .collect());
    }
    if let Some(arr) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok((0..arr.len())
            .map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) as f64 })
            .collect());
    }
    Err(BacktestError::DataError(format!(
        "Unsupported numeric column type: {:?}",
        array.data_type()
    )))
}

/// Read a Utf8 or LargeUtf8 column.
pub(crate) fn string_column(array: &dyn arrow::array::Array) -> Result<Vec<String>> {
    use arrow::array::{Array, LargeStringArray, StringArray};

    if let Some(arr) = array.as_any().downcast_ref::<StringArray>() {
        return Ok((0..arr.len()).map(|i| arr.value(i).to_string()).collect());
    }
    if let Some(arr) = array.as_any().downcast_ref::<LargeStringArray>() {
        return Ok((0..arr.len()).map(|i| arr.value(i).to_string()).collect());
    }
    Err(BacktestError::DataError(format!(
        "Unsupported string column type: {:?}",
        array.data_type()
    )))
}

/// Read an Arrow date-like column as calendar dates.
pub(crate) fn date_column(
    array: &dyn arrow::array::Array,
    date_format: Option<&str>,
) -> Result<Vec<NaiveDate>> {
    use arrow::array::{
        Array, Date32Array, Date64Array, Int64Array, StringArray, TimestampMicrosecondArray,
        TimestampMillisecondArray, TimestampNanosecondArray,
    };

    let null_err = |i: usize| BacktestError::DataError(format!("Null date at row {}", i));
    let range_err = |v: i64| BacktestError::DataError(format!("Date out of range: {}", v));

    if let Some(arr) = array.as_any().downcast_ref::<Date32Array>() {
        return (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    return Err(null_err(i));
                }
                arr.value_as_date(i)
                    .ok_or_else(|| range_err(arr.value(i) as i64))
            })
            .collect();
    }
    if let Some(arr) = array.as_any().downcast_ref::<Date64Array>() {
        return (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    return Err(null_err(i));
                }
                DateTime::from_timestamp_millis(arr.value(i))
                    .map(|dt| dt.date_naive())
                    .ok_or_else(|| range_err(arr.value(i)))
            })
            .collect();
    }
    if let Some(arr) = array.as_any().downcast_ref::<TimestampMillisecondArray>() {
        return (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    return Err(null_err(i));
                }
                DateTime::from_timestamp_millis(arr.value(i))
                    .map(|dt| dt.date_naive())
                    .ok_or_else(|| range_err(arr.value(i)))
            })
            .collect();
    }
    if let Some(arr) = array.as_any().downcast_ref::<TimestampMicrosecondArray>() {
        return (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    return Err(null_err(i));
                }
                DateTime::from_timestamp_micros(arr.value(i))
                    .map(|dt| dt.date_naive())
                    .ok_or_else(|| range_err(arr.value(i)))
            })
            .collect();
    }
    if let Some(arr) = array.as_any().downcast_ref::<TimestampNanosecondArray>() {
        return (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    return Err(null_err(i));
                }
                Ok(DateTime::from_timestamp_nanos(arr.value(i)).date_naive())
            })
            .collect();
    }
    if let Some(arr) = array.as_any().downcast_ref::<Int64Array>() {
        return (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    return Err(null_err(i));
                }
                parse_date(&arr.value(i).to_string(), None)
            })
            .collect();
    }
    if let Some(arr) = array.as_any().downcast_ref::<StringArray>() {
        return (0..arr.len())
            .map(|i| {
                if arr.is_null(i) {
                    return Err(null_err(i));
                }
                parse_date(arr.value(i), date_format)
            })
            .collect();
    }

    Err(BacktestError::DataError(format!(
        "Unsupported date column type: {:?}",
        array.data_type()
    )))
}

/// Load daily OHLCV bars from a Parquet file.
///
/// Accepts `date`/`timestamp` columns stored as Date32, Date64, Arrow
/// timestamps, Unix epochs or strings.
pub fn load_parquet(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let path = path.as_ref();
    info!("Loading Parquet data from: {}", path.display());

    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| BacktestError::DataError(format!("Failed to open parquet file: {}", e)))?;
    let schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| BacktestError::DataError(format!("Failed to build parquet reader: {}", e)))?;

    let missing = |what: &str| {
        BacktestError::DataError(format!("No {} column found in parquet file", what))
    };
    let date_idx = find_column_index(
        &schema,
        &["date", "Date", "timestamp", "Timestamp", "datetime", "time"],
    )
    .ok_or_else(|| missing("date"))?;
    let open_idx = find_column_index(&schema, &["open", "Open", "o"]).ok_or_else(|| missing("open"))?;
    let high_idx = find_column_index(&schema, &["high", "High", "h"]).ok_or_else(|| missing("high"))?;
    let low_idx = find_column_index(&schema, &["low", "Low", "l"]).ok_or_else(|| missing("low"))?;
    let close_idx = find_column_index(&schema, &["close", "Close", "c", "adj_close", "Adj Close"])
        .ok_or_else(|| missing("close"))?;
    let volume_idx = find_column_index(&schema, &["volume", "Volume", "v", "vol"]);

    let mut bars = Vec::new();
    let mut skipped = 0;

    for batch in reader {
        let batch = batch.map_err(|e| {
            BacktestError::DataError(format!("Failed to read parquet batch: {}", e))
        })?;

        let dates = date_column(batch.column(date_idx).as_ref(), config.date_format.as_deref())?;
        let opens = f64_column(batch.column(open_idx).as_ref())?;
        let highs = f64_column(batch.column(high_idx).as_ref())?;
        let lows = f64_column(batch.column(low_idx).as_ref())?;
        let closes = f64_column(batch.column(close_idx).as_ref())?;
        let volumes = match volume_idx {
            Some(idx) => f64_column(batch.column(idx).as_ref())?,
            None => vec![0.0; batch.num_rows()],
        };

        for i in 0..batch.num_rows() {
            let volume = if volumes[i].is_nan() { 0.0 } else { volumes[i] };
            let bar = Bar::new(dates[i], opens[i], highs[i], lows[i], closes[i], volume);
            let has_prices = [bar.open, bar.high, bar.low, bar.close]
                .iter()
                .all(|v| !v.is_nan());
            if !has_prices || (config.validate_bars && !bar.validate()) {
                if config.skip_invalid {
                    skipped += 1;
                    continue;
                }
                return Err(BacktestError::DataError(format!(
                    "Invalid bar data: {:?}",
                    bar
                )));
            }
            bars.push(bar);
        }
    }

    finalize_bars(bars, skipped, path)
}

/// Detect input file format based on extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Parquet,
}

impl DataFormat {
    /// Detect format from file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(DataFormat::Csv),
            "parquet" | "pq" => Some(DataFormat::Parquet),
            _ => None,
        }
    }
}

/// Load bars from a file, auto-detecting format from the extension.
pub fn load_data(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let format = DataFormat::from_path(path).ok_or_else(|| {
        BacktestError::DataError(format!(
            "Unknown file format for: {}. Supported: .csv, .parquet, .pq",
            path.display()
        ))
    })?;

    match format {
        DataFormat::Csv => load_csv(path, config),
        DataFormat::Parquet => load_parquet(path, config),
    }
}

/// Load every matching file in a directory; the ticker is the file stem.
///
/// Files that fail to load are logged and skipped. Fails only when nothing
/// could be loaded.
pub fn load_dir(
    dir: impl AsRef<Path>,
    pattern: &str,
    config: &DataConfig,
) -> Result<BTreeMap<String, Vec<Bar>>> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(BacktestError::DataError(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let glob_pattern = dir.join(pattern);
    let glob_pattern_str = glob_pattern.to_string_lossy();
    info!("Loading files matching: {}", glob_pattern_str);

    let paths = glob::glob(&glob_pattern_str).map_err(|e| {
        BacktestError::DataError(format!("Invalid glob pattern '{}': {}", pattern, e))
    })?;

    let mut result = BTreeMap::new();
    let mut errors = 0;

    for entry in paths {
        let path = match entry {
            Ok(p) => p,
            Err(e) => {
                warn!("Glob error: {}", e);
                errors += 1;
                continue;
            }
        };

        let ticker = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s.to_string(),
            None => {
                warn!("Could not extract ticker from path: {}", path.display());
                errors += 1;
                continue;
            }
        };

        debug!("Loading {} from {}", ticker, path.display());
        match load_data(&path, config) {
            Ok(bars) => {
                result.insert(ticker, bars);
            }
            Err(e) => {
                warn!("Failed to load {}: {}", path.display(), e);
                errors += 1;
            }
        }
    }

    if result.is_empty() {
        return Err(BacktestError::DataError(format!(
            "No files loaded from {} matching '{}' ({} errors)",
            dir.display(),
            pattern,
            errors
        )));
    }

    info!(
        "Loaded {} tickers from {} ({} errors)",
        result.len(),
        dir.display(),
        errors
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("2024-01-15", None).unwrap(), expected);
        assert_eq!(parse_date("2024/01/15", None).unwrap(), expected);
        assert_eq!(parse_date("2024-01-15 16:00:00", None).unwrap(), expected);
        assert_eq!(parse_date("15.01.2024", Some("%d.%m.%Y")).unwrap(), expected);
        // 2024-01-15T00:00:00Z in epoch millis
        assert_eq!(parse_date("1705276800000", None).unwrap(), expected);
        assert!(parse_date("not a date", None).is_err());
    }

    #[test]
    fn test_load_csv_sorts_and_dedups() {
        let file = write_csv(
            "date,open,high,low,close,volume\n\
             2024-01-03,101,103,100,102,1000\n\
             2024-01-02,100,102,99,101,1000\n\
             2024-01-02,100,102,99,101,1000\n",
        );
        let bars = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].date < bars[1].date);
    }

    #[test]
    fn test_load_csv_skips_invalid_rows() {
        let file = write_csv(
            "Date,Open,High,Low,Close,Volume\n\
             2024-01-02,100,102,99,101,1000\n\
             garbage,1,1,1,1,1\n\
             2024-01-04,100,90,99,101,1000\n",
        );
        let bars = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(bars.len(), 1);

        let strict = DataConfig {
            skip_invalid: false,
            ..Default::default()
        };
        assert!(load_csv(file.path(), &strict).is_err());
    }

    #[test]
    fn test_load_csv_empty_is_no_data() {
        let file = write_csv("date,open,high,low,close,volume\n");
        assert!(matches!(
            load_csv(file.path(), &DataConfig::default()),
            Err(BacktestError::NoData)
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(DataFormat::from_path("a/SPY.csv"), Some(DataFormat::Csv));
        assert_eq!(DataFormat::from_path("SPY.PARQUET"), Some(DataFormat::Parquet));
        assert_eq!(DataFormat::from_path("SPY.pq"), Some(DataFormat::Parquet));
        assert_eq!(DataFormat::from_path("SPY.txt"), None);
    }

    #[test]
    fn test_load_dir_uses_file_stem() {
        let dir = tempdir().unwrap();
        let csv = "date,open,high,low,close,volume\n2024-01-02,100,102,99,101,1000\n";
        std::fs::write(dir.path().join("SPY.csv"), csv).unwrap();
        std::fs::write(dir.path().join("AAPL.csv"), csv).unwrap();
        std::fs::write(dir.path().join("BROKEN.csv"), "nothing useful").unwrap();

        let data = load_dir(dir.path(), "*.csv", &DataConfig::default()).unwrap();
        let tickers: Vec<&String> = data.keys().collect();
        assert_eq!(tickers, vec!["AAPL", "SPY"]);
    }

    #[test]
    fn test_load_dir_nothing_loaded() {
        let dir = tempdir().unwrap();
        assert!(load_dir(dir.path(), "*.csv", &DataConfig::default()).is_err());
        assert!(load_dir(dir.path().join("missing"), "*.csv", &DataConfig::default()).is_err());
    }
}
