//! panelbt - portfolio-allocation backtesting over daily multi-ticker price panels.
//!
//! # Overview
//!
//! A study runs in stages, each usable on its own:
//!
//! - **Ingest**: per-ticker daily bars become one [`panel::Panel`] on a shared
//!   calendar, forward-filled, with clipped close-to-close returns
//! - **Signals**: trailing momentum and rolling volatility per ticker
//! - **Simulate**: an [`policy::AllocationPolicy`] picks target weights every
//!   day and the engine compounds NAV net of turnover slippage
//! - **Analyze**: cumulative return, annualized Sharpe and volatility, max drawdown
//! - **Sweep**: slippage, capital and policy grids over named periods
//! - **Compare**: paired t and Wilcoxon tests plus a bootstrap interval
//!
//! # Quick Start
//!
//! ```no_run
//! use panelbt::{
//!     analytics::PerformanceMetrics,
//!     engine::run_backtest,
//!     features::{compute_signals, SignalConfig},
//!     panel::Panel,
//!     policy::MomentumTilt,
//! };
//!
//! let mut panel = Panel::read_parquet("data/processed/panel.parquet").unwrap();
//! compute_signals(&mut panel, &SignalConfig::default()).unwrap();
//!
//! let policy = MomentumTilt::new(panel.tickers().to_vec(), "SPY");
//! let result = run_backtest(&panel, &policy, 500.0, 0.0005).unwrap();
//!
//! let metrics = PerformanceMetrics::from_result(&result).unwrap();
//! println!("Return: {:.2}%", metrics.cumulative_return * 100.0);
//! println!("Sharpe: {:.2}", metrics.sharpe_ratio);
//! ```
//!
//! # Custom Policies
//!
//! Implement [`policy::AllocationPolicy`] to plug in your own allocation rule:
//!
//! ```
//! use panelbt::policy::AllocationPolicy;
//! use panelbt::types::{SignalSnapshot, WeightVector};
//! use chrono::NaiveDate;
//! use panelbt::Result;
//!
//! struct AllIn {
//!     tickers: Vec<String>,
//! }
//!
//! impl AllocationPolicy for AllIn {
//!     fn name(&self) -> &str {
//!         "all_in_first"
//!     }
//!
//!     fn tickers(&self) -> &[String] {
//!         &self.tickers
//!     }
//!
//!     fn get_weights(&self, _date: NaiveDate, _snapshot: &SignalSnapshot) -> Result<WeightVector> {
//!         let mut weights = WeightVector::zeros(&self.tickers);
//!         weights.set(&self.tickers[0], 1.0)?;
//!         Ok(weights)
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Bars, observations, snapshots, weight vectors, NAV records
//! - [`data`]: Bar loading from CSV and Parquet
//! - [`panel`]: Panel construction, persistence and inspection
//! - [`features`]: Momentum and volatility signals
//! - [`policy`]: Allocation policy trait and built-in policies
//! - [`engine`]: Daily NAV simulation
//! - [`analytics`]: Performance metrics and reporting
//! - [`batch`]: Parallel runs over policies and capital levels
//! - [`sensitivity`]: Slippage sweeps over named periods
//! - [`stats`]: Paired significance tests and bootstrap intervals
//! - [`export`]: Result files in Parquet, CSV and JSON
//! - [`viz`]: Sparklines and SVG charts
//! - [`metadata`]: Run metadata for reproducibility
//! - [`config`]: TOML study configuration

pub mod analytics;
pub mod batch;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod export;
pub mod features;
pub mod metadata;
pub mod panel;
pub mod policy;
pub mod sensitivity;
pub mod stats;
pub mod types;
pub mod viz;

// Re-exports for convenience
pub use analytics::{PerformanceMetrics, PerformanceSummary, ResultFormatter};
pub use batch::run_batch;
pub use config::StudyConfig;
pub use engine::{run_backtest, BacktestConfig, BacktestResult, Engine};
pub use error::{BacktestError, Result};
pub use features::{compute_signals, SignalConfig};
pub use panel::Panel;
pub use policy::{AllocationPolicy, EqualWeight, ModelAdapter, MomentumTilt, PolicyKind};
pub use sensitivity::{run_sensitivity, Period, SensitivityConfig, SensitivityRecord};
pub use stats::{bootstrap_cum_diff, paired_tests, BootstrapInterval, TestResult};
pub use types::{Bar, NavRecord, Observation, ResultRow, SignalSnapshot, WeightVector};

// Data handling re-exports
pub use data::{load_data, load_dir, DataConfig};

// Visualization utilities
pub use viz::{sparkline, sparkline_with_config, SparklineConfig};
