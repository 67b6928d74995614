//! Visualization utilities for backtest output.
//!
//! Terminal sparklines for quick looks at NAV series, and hand-written SVG
//! charts:
//! - equity curves, one line per (model, capital) run
//! - Sharpe ratio bars grouped by model and capital
//! - Sharpe ratio against slippage
//! - close-price spot check for one ticker
//!
//! # Example
//!
//! ```ignore
//! use panelbt::viz::{sparkline, save_svg, write_equity_curves_svg, ChartConfig};
//!
//! println!("NAV: {}", sparkline(&result.navs(), 40));
//! save_svg("equity_curves.svg", |w| {
//!     write_equity_curves_svg(w, &results, &ChartConfig::titled("Equity Curves"))
//! })?;
//! ```

use crate::analytics::PerformanceSummary;
use crate::engine::BacktestResult;
use crate::error::Result;
use crate::panel::Panel;
use chrono::NaiveDate;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Characters used for sparkline rendering, ordered from low to high.
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Line and bar colors, cycled per series.
const PALETTE: [&str; 8] = [
    "#28a745", "#007bff", "#dc3545", "#fd7e14", "#6f42c1", "#17a2b8", "#ffc107", "#20c997",
];

const GRID_COLOR: &str = "#e0e0e0";
const TEXT_COLOR: &str = "#666";

/// Series longer than this are thinned before plotting.
const MAX_POINTS: usize = 500;

/// Configuration for sparkline generation.
#[derive(Debug, Clone)]
pub struct SparklineConfig {
    /// Maximum width in characters.
    pub width: usize,
    /// Custom minimum value (if not normalizing from data).
    pub min_value: Option<f64>,
    /// Custom maximum value (if not normalizing from data).
    pub max_value: Option<f64>,
}

impl Default for SparklineConfig {
    fn default() -> Self {
        Self {
            width: 40,
            min_value: None,
            max_value: None,
        }
    }
}

/// Generate an ASCII sparkline from a slice of values.
///
/// # Example
/// ```
/// let spark = panelbt::viz::sparkline(&[100.0, 102.0, 101.0, 105.0], 4);
/// assert_eq!(spark.chars().count(), 4);
/// ```
pub fn sparkline(values: &[f64], width: usize) -> String {
    sparkline_with_config(
        values,
        &SparklineConfig {
            width,
            ..Default::default()
        },
    )
}

/// Generate an ASCII sparkline with custom configuration.
///
/// Non-finite values are skipped.
pub fn sparkline_with_config(values: &[f64], config: &SparklineConfig) -> String {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || config.width == 0 {
        return String::new();
    }

    let sampled = downsample(&finite, config.width);

    let min_val = config
        .min_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::INFINITY, f64::min));
    let max_val = config
        .max_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    let range = max_val - min_val;

    sampled
        .iter()
        .map(|&val| {
            let normalized = if range > 0.0 {
                ((val - min_val) / range).clamp(0.0, 1.0)
            } else {
                0.5
            };
            SPARKLINE_CHARS[((normalized * 7.0).round() as usize).min(7)]
        })
        .collect()
}

/// Downsample a slice of values to a target length using averaging.
fn downsample(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() <= target_len {
        return values.to_vec();
    }

    let chunk_size = values.len() as f64 / target_len as f64;
    (0..target_len)
        .filter_map(|i| {
            let start = (i as f64 * chunk_size).floor() as usize;
            let end = (((i + 1) as f64 * chunk_size).ceil() as usize).min(values.len());
            (start < end).then(|| values[start..end].iter().sum::<f64>() / (end - start) as f64)
        })
        .collect()
}

/// Sparkline of a run's NAV series.
pub fn nav_sparkline(result: &BacktestResult, width: usize) -> String {
    sparkline(&result.navs(), width)
}

/// Size and title of an SVG chart.
#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
    pub title: Option<String>,
    pub y_label: Option<String>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 300.0,
            padding: 50.0,
            title: None,
            y_label: None,
        }
    }
}

impl ChartConfig {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_y_label(mut self, label: impl Into<String>) -> Self {
        self.y_label = Some(label.into());
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn chart_width(&self) -> f64 {
        self.width - 2.0 * self.padding
    }

    fn chart_height(&self) -> f64 {
        self.height - 2.0 * self.padding
    }
}

/// Render a chart into `path`.
pub fn save_svg<F>(path: impl AsRef<Path>, render: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    render(&mut writer)?;
    writer.flush()?;
    info!("Saved {}", path.display());
    Ok(())
}

/// Render a chart into a string.
pub fn render_svg<F>(render: F) -> Result<String>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut buf = Vec::new();
    render(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One line of a line chart.
struct LineSeries {
    label: String,
    /// (x, y); non-finite y values break the line.
    points: Vec<(f64, f64)>,
}

/// Padded (min, max) over the finite values, or None when there are none.
fn value_bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return None;
    }
    let range = hi - lo;
    if range > 0.0 {
        Some((lo - range * 0.05, hi + range * 0.05))
    } else {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.05 };
        Some((lo - pad, hi + pad))
    }
}

fn write_header<W: Write>(writer: &mut W, config: &ChartConfig) -> Result<()> {
    writeln!(
        writer,
        r##"<svg viewBox="0 0 {} {}" xmlns="http://www.w3.org/2000/svg" font-family="sans-serif">"##,
        config.width, config.height
    )?;
    writeln!(
        writer,
        r##"  <rect width="{}" height="{}" fill="white"/>"##,
        config.width, config.height
    )?;
    if let Some(title) = &config.title {
        writeln!(
            writer,
            r##"  <text x="{}" y="{}" font-size="14" font-weight="bold" fill="#333" text-anchor="middle">{}</text>"##,
            config.width / 2.0,
            config.padding / 2.0,
            escape(title)
        )?;
    }
    if let Some(label) = &config.y_label {
        let y = config.height / 2.0;
        writeln!(
            writer,
            r##"  <text x="12" y="{y}" font-size="11" fill="{}" text-anchor="middle" transform="rotate(-90 12 {y})">{}</text>"##,
            TEXT_COLOR,
            escape(label)
        )?;
    }
    Ok(())
}

fn write_empty<W: Write>(writer: &mut W, config: &ChartConfig) -> Result<()> {
    write_header(writer, config)?;
    writeln!(
        writer,
        r##"  <text x="{}" y="{}" font-size="12" fill="{}" text-anchor="middle">No data</text>"##,
        config.width / 2.0,
        config.height / 2.0,
        TEXT_COLOR
    )?;
    writeln!(writer, "</svg>")?;
    Ok(())
}

fn write_y_grid<W: Write>(
    writer: &mut W,
    config: &ChartConfig,
    (y_min, y_max): (f64, f64),
    format_tick: &dyn Fn(f64) -> String,
) -> Result<()> {
    let num_y_ticks = 5;
    for i in 0..=num_y_ticks {
        let frac = i as f64 / num_y_ticks as f64;
        let y_val = y_min + frac * (y_max - y_min);
        let y = config.padding + config.chart_height() - frac * config.chart_height();

        writeln!(
            writer,
            r##"  <line x1="{}" y1="{:.1}" x2="{}" y2="{:.1}" stroke="{}" stroke-dasharray="4,4"/>"##,
            config.padding,
            y,
            config.width - config.padding,
            y,
            GRID_COLOR
        )?;
        writeln!(
            writer,
            r##"  <text x="{}" y="{:.1}" font-size="10" fill="{}" text-anchor="end">{}</text>"##,
            config.padding - 5.0,
            y + 3.0,
            TEXT_COLOR,
            format_tick(y_val)
        )?;
    }
    Ok(())
}

fn write_legend<W: Write>(writer: &mut W, config: &ChartConfig, labels: &[String]) -> Result<()> {
    for (i, label) in labels.iter().enumerate() {
        let x = config.width - config.padding - 140.0;
        let y = config.padding + 5.0 + i as f64 * 14.0;
        writeln!(
            writer,
            r##"  <rect x="{:.1}" y="{:.1}" width="10" height="10" fill="{}"/>"##,
            x,
            y,
            PALETTE[i % PALETTE.len()]
        )?;
        writeln!(
            writer,
            r##"  <text x="{:.1}" y="{:.1}" font-size="10" fill="#333">{}</text>"##,
            x + 14.0,
            y + 9.0,
            escape(label)
        )?;
    }
    Ok(())
}

fn write_line_chart<W: Write>(
    writer: &mut W,
    config: &ChartConfig,
    series: &[LineSeries],
    x_labels: (&str, &str),
    format_tick: &dyn Fn(f64) -> String,
) -> Result<()> {
    let all = || series.iter().flat_map(|s| s.points.iter());
    let (Some((x_min, x_max)), Some(y_bounds)) = (
        all().map(|p| p.0).fold(None, |acc: Option<(f64, f64)>, x| {
            Some(acc.map_or((x, x), |(lo, hi)| (lo.min(x), hi.max(x))))
        }),
        value_bounds(all().map(|p| p.1)),
    ) else {
        return write_empty(writer, config);
    };
    let (y_min, y_max) = y_bounds;
    let x_range = (x_max - x_min).max(f64::EPSILON);

    write_header(writer, config)?;
    write_y_grid(writer, config, y_bounds, format_tick)?;

    writeln!(
        writer,
        r##"  <text x="{}" y="{}" font-size="10" fill="{}" text-anchor="start">{}</text>"##,
        config.padding,
        config.height - 10.0,
        TEXT_COLOR,
        escape(x_labels.0)
    )?;
    writeln!(
        writer,
        r##"  <text x="{}" y="{}" font-size="10" fill="{}" text-anchor="end">{}</text>"##,
        config.width - config.padding,
        config.height - 10.0,
        TEXT_COLOR,
        escape(x_labels.1)
    )?;

    for (i, s) in series.iter().enumerate() {
        let points: Vec<&(f64, f64)> = if s.points.len() > MAX_POINTS {
            let step = s.points.len() / MAX_POINTS;
            s.points.iter().step_by(step).collect()
        } else {
            s.points.iter().collect()
        };

        let mut path_d = String::new();
        let mut pen_down = false;
        for &&(xv, yv) in &points {
            if !yv.is_finite() {
                pen_down = false;
                continue;
            }
            let x = config.padding + (xv - x_min) / x_range * config.chart_width();
            let y = config.padding + config.chart_height()
                - (yv - y_min) / (y_max - y_min) * config.chart_height();
            let cmd = if pen_down { " L" } else { " M" };
            path_d.push_str(&format!("{} {:.1} {:.1}", cmd, x, y));
            pen_down = true;
        }

        writeln!(
            writer,
            r##"  <path d="{}" fill="none" stroke="{}" stroke-width="2"/>"##,
            path_d.trim_start(),
            PALETTE[i % PALETTE.len()]
        )?;
    }

    if series.len() > 1 {
        let labels: Vec<String> = series.iter().map(|s| s.label.clone()).collect();
        write_legend(writer, config, &labels)?;
    }

    writeln!(writer, "</svg>")?;
    Ok(())
}

fn date_x(date: NaiveDate, origin: NaiveDate) -> f64 {
    (date - origin).num_days() as f64
}

/// Equity curves, one line labelled `model-capital` per run.
pub fn write_equity_curves_svg<W: Write>(
    writer: &mut W,
    results: &[BacktestResult],
    config: &ChartConfig,
) -> Result<()> {
    let dates = results.iter().flat_map(|r| r.records.iter().map(|rec| rec.date));
    let (Some(first), Some(last)) = (dates.clone().min(), dates.max()) else {
        return write_empty(writer, config);
    };

    let series: Vec<LineSeries> = results
        .iter()
        .filter(|r| !r.is_empty())
        .map(|r| LineSeries {
            label: format!("{}-{}", r.model, r.starting_capital),
            points: r
                .records
                .iter()
                .map(|rec| (date_x(rec.date, first), rec.nav))
                .collect(),
        })
        .collect();

    let first = first.format("%Y-%m-%d").to_string();
    let last = last.format("%Y-%m-%d").to_string();
    write_line_chart(writer, config, &series, (&first, &last), &|v| {
        format!("{:.0}", v)
    })
}

/// Grouped bars of Sharpe ratio: one group per model, one bar per capital.
pub fn write_sharpe_bars_svg<W: Write>(
    writer: &mut W,
    summaries: &[PerformanceSummary],
    config: &ChartConfig,
) -> Result<()> {
    let mut models: Vec<&str> = Vec::new();
    let mut capitals: Vec<f64> = Vec::new();
    for s in summaries {
        if !models.contains(&s.model.as_str()) {
            models.push(&s.model);
        }
        if !capitals.contains(&s.capital) {
            capitals.push(s.capital);
        }
    }
    capitals.sort_by(|a, b| a.total_cmp(b));

    let Some((lo, hi)) = value_bounds(
        summaries
            .iter()
            .map(|s| s.sharpe_ratio)
            .chain(std::iter::once(0.0)),
    ) else {
        return write_empty(writer, config);
    };
    if models.is_empty() {
        return write_empty(writer, config);
    }

    write_header(writer, config)?;
    write_y_grid(writer, config, (lo, hi), &|v| format!("{:.2}", v))?;

    let to_y = |v: f64| config.padding + config.chart_height() - (v - lo) / (hi - lo) * config.chart_height();
    let zero_y = to_y(0.0);
    let group_width = config.chart_width() / models.len() as f64;
    let bar_width = group_width * 0.8 / capitals.len() as f64;

    writeln!(
        writer,
        r##"  <line x1="{}" y1="{:.1}" x2="{}" y2="{:.1}" stroke="{}"/>"##,
        config.padding,
        zero_y,
        config.width - config.padding,
        zero_y,
        TEXT_COLOR
    )?;

    for (g, model) in models.iter().enumerate() {
        let group_x = config.padding + g as f64 * group_width + group_width * 0.1;
        for (c, capital) in capitals.iter().enumerate() {
            let Some(s) = summaries
                .iter()
                .find(|s| s.model == *model && s.capital == *capital)
            else {
                continue;
            };
            if !s.sharpe_ratio.is_finite() {
                continue;
            }
            let y = to_y(s.sharpe_ratio);
            writeln!(
                writer,
                r##"  <rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"##,
                group_x + c as f64 * bar_width,
                y.min(zero_y),
                bar_width,
                (zero_y - y).abs(),
                PALETTE[c % PALETTE.len()]
            )?;
        }
        writeln!(
            writer,
            r##"  <text x="{:.1}" y="{}" font-size="10" fill="{}" text-anchor="middle">{}</text>"##,
            config.padding + (g as f64 + 0.5) * group_width,
            config.height - 10.0,
            TEXT_COLOR,
            escape(model)
        )?;
    }

    let labels: Vec<String> = capitals.iter().map(|c| format!("capital {}", c)).collect();
    write_legend(writer, config, &labels)?;

    writeln!(writer, "</svg>")?;
    Ok(())
}

/// Sharpe ratio against slippage in bps, one line per model.
pub fn write_sharpe_vs_slippage_svg<W: Write>(
    writer: &mut W,
    curves: &[(String, Vec<(i64, f64)>)],
    config: &ChartConfig,
) -> Result<()> {
    let series: Vec<LineSeries> = curves
        .iter()
        .map(|(model, points)| LineSeries {
            label: model.clone(),
            points: points.iter().map(|&(bps, s)| (bps as f64, s)).collect(),
        })
        .collect();

    let bps = curves.iter().flat_map(|(_, p)| p.iter().map(|(b, _)| *b));
    let (lo, hi) = (bps.clone().min().unwrap_or(0), bps.max().unwrap_or(0));
    let lo = format!("{} bps", lo);
    let hi = format!("{} bps", hi);
    write_line_chart(writer, config, &series, (&lo, &hi), &|v| format!("{:.2}", v))
}

/// Close price of `ticker` over the panel's calendar.
pub fn write_price_svg<W: Write>(
    writer: &mut W,
    panel: &Panel,
    ticker: &str,
    config: &ChartConfig,
) -> Result<()> {
    let closes = panel.closes(ticker)?;
    let (Some(&first), Some(&last)) = (panel.dates().first(), panel.dates().last()) else {
        return write_empty(writer, config);
    };

    let series = [LineSeries {
        label: ticker.to_string(),
        points: panel
            .dates()
            .iter()
            .zip(closes)
            .map(|(d, c)| (date_x(*d, first), c))
            .collect(),
    }];

    let first = first.format("%Y-%m-%d").to_string();
    let last = last.format("%Y-%m-%d").to_string();
    write_line_chart(writer, config, &series, (&first, &last), &|v| {
        format!("{:.2}", v)
    })
}
