//! Export utilities for backtest output.
//!
//! | Output | Format |
//! |--------|--------|
//! | Result rows `(date, nav, turnover, model, capital)` | Parquet, CSV |
//! | Performance summary | CSV |
//! | Sensitivity records | CSV |
//! | Statistical tests | CSV |
//! | Run metadata, reports | JSON |

use crate::data::{date_column, f64_column, string_column, DataFormat};
use crate::error::{BacktestError, Result};
use crate::types::ResultRow;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Columns of a results file, in order.
pub const RESULT_COLUMNS: [&str; 5] = ["date", "nav", "turnover", "model", "capital"];

/// Write any serializable records to CSV with a header row.
pub fn write_csv<T: Serialize>(records: &[T], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

/// Read records from a CSV file with a header row.
pub fn read_csv<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

/// Write a value as pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write result rows to Parquet.
pub fn write_results_parquet(rows: &[ResultRow], path: impl AsRef<Path>) -> Result<()> {
    use arrow::array::{ArrayRef, Date32Array, Float64Array, StringArray};
    use arrow::datatypes::{DataType, Date32Type, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    let path = path.as_ref();
    if rows.is_empty() {
        return Err(BacktestError::DataError(
            "No result rows to export".to_string(),
        ));
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("nav", DataType::Float64, false),
        Field::new("turnover", DataType::Float64, false),
        Field::new("model", DataType::Utf8, false),
        Field::new("capital", DataType::Float64, false),
    ]));

    let dates: Vec<i32> = rows
        .iter()
        .map(|r| Date32Type::from_naive_date(r.date))
        .collect();
    let navs: Vec<f64> = rows.iter().map(|r| r.nav).collect();
    let turnovers: Vec<f64> = rows.iter().map(|r| r.turnover).collect();
    let models: Vec<&str> = rows.iter().map(|r| r.model.as_str()).collect();
    let capitals: Vec<f64> = rows.iter().map(|r| r.capital).collect();

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(Date32Array::from(dates)),
        Arc::new(Float64Array::from(navs)),
        Arc::new(Float64Array::from(turnovers)),
        Arc::new(StringArray::from(models)),
        Arc::new(Float64Array::from(capitals)),
    ];

    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| BacktestError::DataError(format!("Failed to create record batch: {}", e)))?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)
        .map_err(|e| BacktestError::DataError(format!("Failed to create parquet writer: {}", e)))?;

    writer
        .write(&batch)
        .map_err(|e| BacktestError::DataError(format!("Failed to write parquet: {}", e)))?;

    writer
        .close()
        .map_err(|e| BacktestError::DataError(format!("Failed to close parquet file: {}", e)))?;

    info!("Wrote {} result rows to {}", rows.len(), path.display());
    Ok(())
}

/// Read result rows written by [`write_results_parquet`].
pub fn read_results_parquet(path: impl AsRef<Path>) -> Result<Vec<ResultRow>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| BacktestError::DataError(format!("Failed to open parquet file: {}", e)))?;
    let schema = builder.schema().clone();
    let reader = builder
        .build()
        .map_err(|e| BacktestError::DataError(format!("Failed to build parquet reader: {}", e)))?;

    let idx: Vec<usize> = RESULT_COLUMNS
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|_| {
                BacktestError::DataError(format!("Results file is missing column '{}'", name))
            })
        })
        .collect::<Result<_>>()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch
            .map_err(|e| BacktestError::DataError(format!("Failed to read parquet batch: {}", e)))?;
        let dates = date_column(batch.column(idx[0]).as_ref(), None)?;
        let navs = f64_column(batch.column(idx[1]).as_ref())?;
        let turnovers = f64_column(batch.column(idx[2]).as_ref())?;
        let models = string_column(batch.column(idx[3]).as_ref())?;
        let capitals = f64_column(batch.column(idx[4]).as_ref())?;

        for (i, model) in models.into_iter().enumerate() {
            rows.push(ResultRow {
                date: dates[i],
                nav: navs[i],
                turnover: turnovers[i],
                model,
                capital: capitals[i],
            });
        }
    }
    Ok(rows)
}

/// Write result rows, choosing Parquet or CSV from the extension.
pub fn save_results(rows: &[ResultRow], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match DataFormat::from_path(path) {
        Some(DataFormat::Parquet) => write_results_parquet(rows, path),
        Some(DataFormat::Csv) => write_csv(rows, path),
        None => Err(unknown_format(path)),
    }
}

/// Read result rows, choosing Parquet or CSV from the extension.
pub fn load_results(path: impl AsRef<Path>) -> Result<Vec<ResultRow>> {
    let path = path.as_ref();
    let rows = match DataFormat::from_path(path) {
        Some(DataFormat::Parquet) => read_results_parquet(path)?,
        Some(DataFormat::Csv) => read_csv(path)?,
        None => return Err(unknown_format(path)),
    };
    info!("Loaded {} result rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn unknown_format(path: &Path) -> BacktestError {
    BacktestError::DataError(format!(
        "Unknown file format for: {}. Supported: .csv, .parquet, .pq",
        path.display()
    ))
}
