//! Study configuration file.
//!
//! Supports loading a whole study (ingest, signals, batch runs, sensitivity,
//! statistics) from a TOML file.

use crate::batch::{DEFAULT_CAPITALS, DEFAULT_SLIPPAGE};
use crate::engine::BacktestConfig;
use crate::error::{BacktestError, Result};
use crate::features::SignalConfig;
use crate::panel::DEFAULT_RETURN_CLIP;
use crate::policy::{PolicyKind, PolicySettings, DEFAULT_BENCHMARK, DEFAULT_TOP_N};
use crate::sensitivity::SensitivityConfig;
use crate::stats::StatsConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete study configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub signals: SignalSettings,
    #[serde(default)]
    pub backtest: BacktestSettings,
    #[serde(default)]
    pub sensitivity: SensitivityConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub output: OutputSettings,
}

/// Input locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    /// Directory of per-ticker bar files.
    #[serde(default = "default_bars_dir")]
    pub bars_dir: PathBuf,
    /// Glob pattern matched inside `bars_dir`.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Panel written by ingest.
    #[serde(default = "default_panel_path")]
    pub panel_path: PathBuf,
    /// Panel with signal columns filled.
    #[serde(default = "default_signals_panel_path")]
    pub signals_panel_path: PathBuf,
    /// Explicit date format for bar files.
    #[serde(default)]
    pub date_format: Option<String>,
}

fn default_bars_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_pattern() -> String {
    "*.csv".to_string()
}

fn default_panel_path() -> PathBuf {
    PathBuf::from("data/processed/panel.parquet")
}

fn default_signals_panel_path() -> PathBuf {
    PathBuf::from("data/processed/panel_signals.parquet")
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            bars_dir: default_bars_dir(),
            pattern: default_pattern(),
            panel_path: default_panel_path(),
            signals_panel_path: default_signals_panel_path(),
            date_format: None,
        }
    }
}

/// Signal windows and the return clip bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSettings {
    #[serde(default = "default_momentum_window")]
    pub momentum_window: usize,
    #[serde(default = "default_vol_window")]
    pub vol_window: usize,
    /// Daily returns are clipped to `[-return_clip, return_clip]`.
    #[serde(default = "default_return_clip")]
    pub return_clip: f64,
}

fn default_momentum_window() -> usize {
    SignalConfig::default().momentum_window
}

fn default_vol_window() -> usize {
    SignalConfig::default().vol_window
}

fn default_return_clip() -> f64 {
    DEFAULT_RETURN_CLIP
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            momentum_window: default_momentum_window(),
            vol_window: default_vol_window(),
            return_clip: default_return_clip(),
        }
    }
}

impl SignalSettings {
    pub fn to_signal_config(&self) -> SignalConfig {
        SignalConfig {
            momentum_window: self.momentum_window,
            vol_window: self.vol_window,
        }
    }
}

/// Batch run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_capitals")]
    pub capitals: Vec<f64>,
    #[serde(default = "default_slippage")]
    pub slippage: f64,
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyKind>,
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Run one job at a time with a progress bar instead of in parallel.
    #[serde(default)]
    pub show_progress: bool,
}

fn default_capitals() -> Vec<f64> {
    DEFAULT_CAPITALS.to_vec()
}

fn default_slippage() -> f64 {
    DEFAULT_SLIPPAGE
}

fn default_policies() -> Vec<PolicyKind> {
    PolicyKind::all().to_vec()
}

fn default_benchmark() -> String {
    DEFAULT_BENCHMARK.to_string()
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            capitals: default_capitals(),
            slippage: default_slippage(),
            policies: default_policies(),
            benchmark: default_benchmark(),
            top_n: default_top_n(),
            start_date: None,
            end_date: None,
            show_progress: false,
        }
    }
}

impl BacktestSettings {
    pub fn policy_settings(&self) -> PolicySettings {
        PolicySettings {
            benchmark: self.benchmark.clone(),
            top_n: self.top_n,
        }
    }
}

/// Where results, reports and plots go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl OutputSettings {
    pub fn results_path(&self) -> PathBuf {
        self.dir.join("backtest_results.parquet")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join("performance_summary.csv")
    }

    pub fn sensitivity_path(&self) -> PathBuf {
        self.dir.join("sensitivity_results.csv")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join("stat_tests.csv")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("run_metadata.json")
    }
}

impl StudyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: StudyConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BacktestError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.signals.to_signal_config().validate()?;
        if !self.signals.return_clip.is_finite() || self.signals.return_clip <= 0.0 {
            return Err(BacktestError::ConfigError(format!(
                "return_clip must be positive, got {}",
                self.signals.return_clip
            )));
        }
        if self.backtest.capitals.is_empty() || self.backtest.policies.is_empty() {
            return Err(BacktestError::ConfigError(
                "[backtest] needs at least one capital and one policy".to_string(),
            ));
        }
        for &capital in &self.backtest.capitals {
            self.to_backtest_config(capital).validate()?;
        }
        self.sensitivity.validate()?;
        if self.stats.n_boot == 0 {
            return Err(BacktestError::ConfigError(
                "n_boot must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine configuration for one capital level of the batch.
    pub fn to_backtest_config(&self, starting_capital: f64) -> BacktestConfig {
        BacktestConfig {
            starting_capital,
            slippage_rate: self.backtest.slippage,
            show_progress: self.backtest.show_progress,
            start_date: self.backtest.start_date,
            end_date: self.backtest.end_date,
        }
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# panelbt study configuration

[data]
bars_dir = "data/raw"
pattern = "*.csv"
panel_path = "data/processed/panel.parquet"
signals_panel_path = "data/processed/panel_signals.parquet"
# date_format = "%Y-%m-%d"

[signals]
momentum_window = 60
vol_window = 30
return_clip = 0.20      # daily returns clipped to +/-20%

[backtest]
capitals = [500.0, 2500.0, 5000.0]
slippage = 0.0005       # 5 bps per unit of turnover
policies = ["equal_weight", "momentum_tilt"]
benchmark = "SPY"
top_n = 5
# start_date = "2018-01-01"
# end_date = "2023-12-31"
show_progress = false   # true: sequential runs with a progress bar

[sensitivity]
slippages = [0.0002, 0.0005, 0.0010]
capitals = [500.0, 2500.0, 5000.0]
policies = ["equal_weight", "momentum_tilt"]

[[sensitivity.periods]]
name = "2018-2023"
start = "2018-01-01"
end = "2023-12-31"

[[sensitivity.periods]]
name = "2015-2019"
start = "2015-01-01"
end = "2019-12-31"

[stats]
model_a = "momentum_tilt"
model_b = "equal_weight"
capital = 500.0
n_boot = 10000
seed = 42

[output]
dir = "output"
"#
        .to_string()
    }
}
