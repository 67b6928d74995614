//! Error types for the allocation backtester.

use thiserror::Error;

/// Main error type for panel construction, simulation and reporting.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Missing ticker '{ticker}' ({context})")]
    MissingTicker { ticker: String, context: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Insufficient data: required {required}, available {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("No data loaded")]
    NoData,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BacktestError {
    /// Shorthand for a ticker that a policy or lookup required but could not find.
    pub fn missing_ticker(ticker: impl Into<String>, context: impl Into<String>) -> Self {
        BacktestError::MissingTicker {
            ticker: ticker.into(),
            context: context.into(),
        }
    }
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ticker_message() {
        let err = BacktestError::missing_ticker("SPY", "benchmark absent from snapshot");
        assert_eq!(
            err.to_string(),
            "Missing ticker 'SPY' (benchmark absent from snapshot)"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BacktestError = io.into();
        assert!(matches!(err, BacktestError::IoError(_)));
    }
}
