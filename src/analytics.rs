//! Performance analytics and reporting.

use crate::engine::BacktestResult;
use crate::error::{BacktestError, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};
use tracing::warn;

/// Trading days used to annualize daily statistics.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Simple returns `nav[i] / nav[i-1] - 1` for consecutive pairs.
pub fn period_returns(navs: &[f64]) -> Vec<f64> {
    navs.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Arithmetic mean; NaN when empty.
pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by n).
pub(crate) fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Deepest peak-to-trough decline as a non-positive fraction.
pub fn max_drawdown(navs: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &nav in navs {
        peak = peak.max(nav);
        let dd = (nav - peak) / peak;
        if dd < worst {
            worst = dd;
        }
    }
    worst
}

/// Drawdown at every point of the series.
pub fn drawdown_series(navs: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    navs.iter()
        .map(|&nav| {
            peak = peak.max(nav);
            (nav - peak) / peak
        })
        .collect()
}

/// Return and risk statistics of one NAV series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub cumulative_return: f64,
    /// Annualized; NaN when every period return is identical and zero.
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub annual_vol: f64,
}

impl PerformanceMetrics {
    /// Compute metrics from an ordered NAV series of at least two points.
    ///
    /// Division by a zero standard deviation follows IEEE semantics: the
    /// Sharpe ratio comes out NaN or infinite rather than as an error.
    pub fn from_navs(navs: &[f64]) -> Result<Self> {
        if navs.len() < 2 {
            return Err(BacktestError::InsufficientData {
                required: 2,
                available: navs.len(),
            });
        }

        let returns = period_returns(navs);
        let std = population_std(&returns);
        let annualizer = TRADING_DAYS_PER_YEAR.sqrt();

        Ok(Self {
            cumulative_return: navs[navs.len() - 1] / navs[0] - 1.0,
            sharpe_ratio: mean(&returns) / std * annualizer,
            max_drawdown: max_drawdown(navs),
            annual_vol: std * annualizer,
        })
    }

    pub fn from_result(result: &BacktestResult) -> Result<Self> {
        Self::from_navs(&result.navs())
    }
}

/// One row of the performance summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub model: String,
    pub capital: f64,
    pub cumulative_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub annual_vol: f64,
    pub final_nav: f64,
    pub total_turnover: f64,
}

impl PerformanceSummary {
    pub fn from_result(result: &BacktestResult) -> Result<Self> {
        let metrics = PerformanceMetrics::from_result(result)?;
        Ok(Self {
            model: result.model.clone(),
            capital: result.starting_capital,
            cumulative_return: metrics.cumulative_return,
            sharpe_ratio: metrics.sharpe_ratio,
            max_drawdown: metrics.max_drawdown,
            annual_vol: metrics.annual_vol,
            final_nav: result.final_nav().unwrap_or(f64::NAN),
            total_turnover: result.total_turnover(),
        })
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            cumulative_return: self.cumulative_return,
            sharpe_ratio: self.sharpe_ratio,
            max_drawdown: self.max_drawdown,
            annual_vol: self.annual_vol,
        }
    }
}

/// Summarize every result, skipping those too short to analyze.
pub fn summarize(results: &[BacktestResult]) -> Vec<PerformanceSummary> {
    results
        .iter()
        .filter_map(|r| match PerformanceSummary::from_result(r) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(
                    "Skipping summary for {} (capital {}): {}",
                    r.model, r.starting_capital, e
                );
                None
            }
        })
        .collect()
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a results report for one run to stdout.
    pub fn print_report(result: &BacktestResult) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " BACKTEST RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Model:           {}", result.model);
        if let (Some(first), Some(last)) = (result.records.first(), result.records.last()) {
            println!(
                "  Period:          {} to {}",
                first.date.format("%Y-%m-%d"),
                last.date.format("%Y-%m-%d")
            );
        }
        println!("  Trading Days:    {}", result.len().saturating_sub(1));
        println!(
            "  Slippage:        {:>9.1} bps",
            result.slippage_rate * 10_000.0
        );
        println!();

        let metrics = match PerformanceMetrics::from_result(result) {
            Ok(m) => m,
            Err(e) => {
                println!("  {}", format!("No metrics: {}", e).yellow());
                println!("{}", "═".repeat(60).blue());
                return;
            }
        };

        println!("{}", "Performance".bold().underline());
        println!("  Initial Capital: ${:>12.2}", result.starting_capital);
        println!(
            "  Final NAV:       ${:>12.2}  {}",
            result.final_nav().unwrap_or(f64::NAN),
            Self::format_pct_change(metrics.cumulative_return * 100.0)
        );
        println!(
            "  Total Return:    {:>12.2}%",
            metrics.cumulative_return * 100.0
        );
        println!();

        println!("{}", "Risk Metrics".bold().underline());
        println!("  Max Drawdown:    {:>12.2}%", metrics.max_drawdown * 100.0);
        println!("  Volatility:      {:>12.2}%", metrics.annual_vol * 100.0);
        println!("  Sharpe Ratio:    {:>12.2}", metrics.sharpe_ratio);
        println!();

        println!("{}", "Costs".bold().underline());
        println!("  Total Turnover:  {:>12.4}", result.total_turnover());
        println!(
            "  Slippage Paid:   {:>12.4}%",
            result.total_turnover() * result.slippage_rate * 100.0
        );
        println!();

        println!("{}", "═".repeat(60).blue());
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    /// Render summaries as a table.
    pub fn table(summaries: &[PerformanceSummary]) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Model", "Capital", "Return %", "Sharpe", "Max DD %", "Vol %", "Final NAV", "Turnover",
        ]);

        for s in summaries {
            builder.push_record([
                s.model.clone(),
                format!("{:.0}", s.capital),
                format!("{:.2}", s.cumulative_return * 100.0),
                format!("{:.2}", s.sharpe_ratio),
                format!("{:.2}", s.max_drawdown * 100.0),
                format!("{:.2}", s.annual_vol * 100.0),
                format!("{:.2}", s.final_nav),
                format!("{:.2}", s.total_turnover),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Print summaries as a table.
    pub fn print_table(summaries: &[PerformanceSummary]) {
        println!("{}", Self::table(summaries));
    }

    /// Export summaries to JSON.
    pub fn to_json(summaries: &[PerformanceSummary]) -> String {
        serde_json::to_string_pretty(summaries).unwrap_or_else(|_| "[]".to_string())
    }

    /// Export one summary to a CSV line.
    pub fn to_csv_line(s: &PerformanceSummary) -> String {
        format!(
            "{},{},{:.6},{:.6},{:.6},{:.6},{:.2},{:.4}",
            s.model,
            s.capital,
            s.cumulative_return,
            s.sharpe_ratio,
            s.max_drawdown,
            s.annual_vol,
            s.final_nav,
            s.total_turnover
        )
    }

    /// Get CSV header.
    pub fn csv_header() -> &'static str {
        "model,capital,cumulative_return,sharpe_ratio,max_drawdown,annual_vol,final_nav,total_turnover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NavRecord;
    use chrono::NaiveDate;

    fn result_from_navs(navs: &[f64]) -> BacktestResult {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        BacktestResult {
            model: "equal_weight".to_string(),
            starting_capital: navs[0],
            slippage_rate: 0.0005,
            records: navs
                .iter()
                .enumerate()
                .map(|(i, &nav)| NavRecord {
                    date: start + chrono::Duration::days(i.saturating_sub(1) as i64),
                    nav,
                    turnover: if i == 1 { 1.0 } else { 0.0 },
                })
                .collect(),
        }
    }

    #[test]
    fn test_period_returns() {
        let r = period_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.1).abs() < 1e-12);
        assert!((r[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_calculation() {
        let navs = [100.0, 110.0, 99.0, 121.0];
        let m = PerformanceMetrics::from_navs(&navs).unwrap();

        assert!((m.cumulative_return - 0.21).abs() < 1e-12);
        assert!((m.max_drawdown + 0.1).abs() < 1e-12);

        let r = period_returns(&navs);
        let mean = r.iter().sum::<f64>() / 3.0;
        let std = (r.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 3.0).sqrt();
        assert!((m.annual_vol - std * 252.0_f64.sqrt()).abs() < 1e-12);
        assert!((m.sharpe_ratio - mean / std * 252.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_sharpe_is_nan() {
        let m = PerformanceMetrics::from_navs(&[100.0, 100.0, 100.0]).unwrap();
        assert!(m.sharpe_ratio.is_nan());
        assert_eq!(m.annual_vol, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.cumulative_return, 0.0);
    }

    #[test]
    fn test_increasing_series_positive_sharpe() {
        let m = PerformanceMetrics::from_navs(&[100.0, 101.0, 103.0, 103.5, 106.0]).unwrap();
        assert!(m.sharpe_ratio.is_finite());
        assert!(m.sharpe_ratio > 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn test_insufficient_data() {
        assert!(matches!(
            PerformanceMetrics::from_navs(&[100.0]),
            Err(BacktestError::InsufficientData {
                required: 2,
                available: 1
            })
        ));
    }

    #[test]
    fn test_drawdown_series() {
        let dd = drawdown_series(&[100.0, 120.0, 90.0, 130.0]);
        assert_eq!(dd[0], 0.0);
        assert_eq!(dd[1], 0.0);
        assert!((dd[2] + 0.25).abs() < 1e-12);
        assert_eq!(dd[3], 0.0);
    }

    #[test]
    fn test_summary_from_result() {
        let result = result_from_navs(&[1000.0, 1000.0, 1010.0, 1005.0]);
        let s = PerformanceSummary::from_result(&result).unwrap();
        assert_eq!(s.model, "equal_weight");
        assert_eq!(s.capital, 1000.0);
        assert_eq!(s.final_nav, 1005.0);
        assert_eq!(s.total_turnover, 1.0);
        assert!((s.cumulative_return - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_summarize_skips_empty() {
        let empty = BacktestResult {
            model: "momentum_tilt".to_string(),
            starting_capital: 500.0,
            slippage_rate: 0.0,
            records: vec![],
        };
        let summaries = summarize(&[result_from_navs(&[1.0, 1.0, 1.1]), empty]);
        assert_eq!(summaries.len(), 1);
    }

    #[test]
    fn test_json_export() {
        let s = PerformanceSummary::from_result(&result_from_navs(&[1.0, 1.0, 1.1])).unwrap();
        let json = ResultFormatter::to_json(&[s]);
        assert!(json.contains("equal_weight"));
        assert!(json.contains("cumulative_return"));
    }

    #[test]
    fn test_csv_export() {
        let s = PerformanceSummary::from_result(&result_from_navs(&[1.0, 1.0, 1.1])).unwrap();
        let line = ResultFormatter::to_csv_line(&s);
        assert!(line.starts_with("equal_weight,1,"));
        assert_eq!(
            line.split(',').count(),
            ResultFormatter::csv_header().split(',').count()
        );
    }

    #[test]
    fn test_table_contains_rows() {
        let s = PerformanceSummary::from_result(&result_from_navs(&[1.0, 1.0, 1.1])).unwrap();
        let table = ResultFormatter::table(&[s]);
        assert!(table.contains("equal_weight"));
        assert!(table.contains("Sharpe"));
    }
}
