//! Command-line interface for the allocation backtester.

use panelbt::analytics::{summarize, PerformanceSummary, ResultFormatter};
use panelbt::batch::{
    group_rows, run_batch, run_batch_with_progress, to_rows, DEFAULT_CAPITALS, DEFAULT_SLIPPAGE,
};
use panelbt::config::{OutputSettings, StudyConfig};
use panelbt::data::{load_dir, DataConfig};
use panelbt::error::{BacktestError, Result};
use panelbt::export::{load_results, save_results, write_csv, write_json};
use panelbt::features::{compute_signals, SignalConfig};
use panelbt::metadata::RunMetadata;
use panelbt::panel::{Panel, DEFAULT_RETURN_CLIP};
use panelbt::policy::{AllocationPolicy, PolicyKind, PolicySettings, DEFAULT_BENCHMARK, DEFAULT_TOP_N};
use panelbt::sensitivity::{
    run_sensitivity, sharpe_by_slippage, slippage_violations, SensitivityConfig,
    SensitivityRecord, DEFAULT_SLIPPAGES,
};
use panelbt::stats::{bootstrap_cum_diff, paired_tests, BootstrapInterval, TestResult, DEFAULT_N_BOOT};
use panelbt::viz::{
    nav_sparkline, save_svg, write_equity_curves_svg, write_price_svg, write_sharpe_bars_svg,
    write_sharpe_vs_slippage_svg, ChartConfig,
};
use panelbt::BacktestResult;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// panelbt - portfolio-allocation backtesting over daily price panels.
#[derive(Parser)]
#[command(name = "panelbt")]
#[command(version)]
#[command(about = "Backtest allocation policies over a multi-ticker daily price panel")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate an example study configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "panelbt.toml")]
        output: PathBuf,
    },

    /// Build the master panel from per-ticker bar files
    Ingest {
        /// Directory of per-ticker CSV or Parquet files
        #[arg(short, long)]
        bars_dir: PathBuf,

        /// Glob pattern inside the directory
        #[arg(short, long, default_value = "*.csv")]
        pattern: String,

        /// Output panel path (Parquet)
        #[arg(long, default_value = "data/processed/panel.parquet")]
        out: PathBuf,

        /// Daily return clip bound
        #[arg(long, default_value_t = DEFAULT_RETURN_CLIP)]
        clip: f64,

        /// Explicit date format, e.g. %Y-%m-%d
        #[arg(long)]
        date_format: Option<String>,
    },

    /// Compute momentum and volatility signals on a panel
    Signals {
        /// Input panel path
        #[arg(long, default_value = "data/processed/panel.parquet")]
        panel: PathBuf,

        /// Output panel path
        #[arg(long, default_value = "data/processed/panel_signals.parquet")]
        out: PathBuf,

        /// Momentum lookback in observations
        #[arg(long, default_value = "60")]
        momentum_window: usize,

        /// Volatility window in observations
        #[arg(long, default_value = "30")]
        vol_window: usize,
    },

    /// Summarize coverage and returns of a panel
    Inspect {
        /// Panel path
        #[arg(long, default_value = "data/processed/panel.parquet")]
        panel: PathBuf,

        /// Ticker for the close-price spot check
        #[arg(short, long, default_value = DEFAULT_BENCHMARK)]
        ticker: String,

        /// Write the spot-check chart to this SVG file
        #[arg(long)]
        plot: Option<PathBuf>,
    },

    /// Run every policy at every capital level
    Run {
        /// Panel with signals
        #[arg(long, default_value = "data/processed/panel_signals.parquet")]
        panel: PathBuf,

        /// Capital levels
        #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_CAPITALS.to_vec())]
        capitals: Vec<f64>,

        /// Slippage per unit of turnover (0.0005 = 5 bps)
        #[arg(short, long, default_value_t = DEFAULT_SLIPPAGE)]
        slippage: f64,

        /// Policies to run
        #[arg(short = 'P', long, value_enum, value_delimiter = ',', default_values_t = PolicyKind::all().to_vec())]
        policies: Vec<PolicyKind>,

        /// Benchmark ticker for the momentum tilt
        #[arg(long, default_value = DEFAULT_BENCHMARK)]
        benchmark: String,

        /// Number of tickers in the momentum tilt
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top_n: usize,

        /// First date (inclusive)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date (inclusive)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Output directory
        #[arg(long, default_value = "output")]
        out_dir: PathBuf,

        /// Run one job at a time with a progress bar
        #[arg(long)]
        progress: bool,
    },

    /// Summarize stored backtest results
    Analyze {
        /// Results file (Parquet or CSV)
        #[arg(short, long, default_value = "output/backtest_results.parquet")]
        results: PathBuf,

        /// Slippage the results were produced with
        #[arg(short, long, default_value_t = DEFAULT_SLIPPAGE)]
        slippage: f64,

        /// Directory for SVG charts
        #[arg(long)]
        plots: Option<PathBuf>,
    },

    /// Sweep slippage, policy and capital over named periods
    Sensitivity {
        /// Panel with signals
        #[arg(long, default_value = "data/processed/panel_signals.parquet")]
        panel: PathBuf,

        /// Slippage grid
        #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SLIPPAGES.to_vec())]
        slippages: Vec<f64>,

        /// Capital levels
        #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_CAPITALS.to_vec())]
        capitals: Vec<f64>,

        /// Output CSV path
        #[arg(long, default_value = "output/sensitivity_results.csv")]
        out: PathBuf,

        /// Write a Sharpe-vs-slippage chart to this SVG file
        #[arg(long)]
        plot: Option<PathBuf>,
    },

    /// Paired tests and bootstrap interval between two models
    Stats {
        /// Results file (Parquet or CSV)
        #[arg(short, long, default_value = "output/backtest_results.parquet")]
        results: PathBuf,

        #[arg(long, default_value = "momentum_tilt")]
        model_a: String,

        #[arg(long, default_value = "equal_weight")]
        model_b: String,

        /// Capital level to compare at
        #[arg(short, long, default_value = "500")]
        capital: f64,

        /// Bootstrap draws
        #[arg(long, default_value_t = DEFAULT_N_BOOT)]
        n_boot: usize,

        /// Bootstrap seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output CSV path
        #[arg(long, default_value = "output/stat_tests.csv")]
        out: PathBuf,
    },

    /// Run a whole study from a configuration file
    RunConfig {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show the built-in allocation policies
    Policies,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Init { output } => init_config(output),

        Commands::Ingest {
            bars_dir,
            pattern,
            out,
            clip,
            date_format,
        } => {
            let panel = ingest(bars_dir, pattern, *clip, date_format.clone())?;
            write_panel(&panel, out)?;
            print_panel_summary(&panel, cli.output);
            Ok(())
        }

        Commands::Signals {
            panel,
            out,
            momentum_window,
            vol_window,
        } => {
            let config = SignalConfig {
                momentum_window: *momentum_window,
                vol_window: *vol_window,
            };
            run_signals(panel, out, &config)
        }

        Commands::Inspect {
            panel,
            ticker,
            plot,
        } => inspect(panel, ticker, plot.as_deref(), cli.output),

        Commands::Run {
            panel,
            capitals,
            slippage,
            policies,
            benchmark,
            top_n,
            start,
            end,
            out_dir,
            progress,
        } => {
            let window = Panel::read_parquet(panel)?.filter_dates(*start, *end);
            let settings = PolicySettings {
                benchmark: benchmark.clone(),
                top_n: *top_n,
            };
            let results = run_policies(&window, policies, &settings, capitals, *slippage, *progress)?;
            let summaries = summarize(&results);
            let run_config = (capitals, slippage, policies, &settings, start, end);
            save_run(&window, &results, &summaries, &run_config, &[panel.as_path()], out_dir)?;
            print_summaries(&results, &summaries, cli.output);
            Ok(())
        }

        Commands::Analyze {
            results,
            slippage,
            plots,
        } => analyze(results, *slippage, plots.as_deref(), cli.output),

        Commands::Sensitivity {
            panel,
            slippages,
            capitals,
            out,
            plot,
        } => {
            let panel = Panel::read_parquet(panel)?;
            let config = SensitivityConfig::default()
                .with_slippages(slippages.clone())
                .with_capitals(capitals.clone());
            sensitivity(&panel, &config, out, plot.as_deref(), cli.output)
        }

        Commands::Stats {
            results,
            model_a,
            model_b,
            capital,
            n_boot,
            seed,
            out,
        } => {
            let rows = load_results(results)?;
            let results = group_rows(&rows, DEFAULT_SLIPPAGE);
            compare(
                &results,
                model_a,
                model_b,
                *capital,
                *n_boot,
                *seed,
                out,
                cli.output,
            )
        }

        Commands::RunConfig { config } => run_from_config(config, cli.output),

        Commands::Policies => {
            print_policies();
            Ok(())
        }
    }
}

fn init_config(output: &Path) -> Result<()> {
    let example = StudyConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to customize your study, then run:");
    println!("  panelbt run-config -c {}", output.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn ingest(bars_dir: &Path, pattern: &str, clip: f64, date_format: Option<String>) -> Result<Panel> {
    let config = DataConfig {
        date_format,
        ..Default::default()
    };
    let bars = load_dir(bars_dir, pattern, &config)?;
    Panel::from_bars(&bars, clip)
}

fn write_panel(panel: &Panel, out: &Path) -> Result<()> {
    ensure_parent(out)?;
    panel.write_parquet(out)?;
    println!(
        "Wrote panel: {} tickers x {} dates -> {}",
        panel.num_tickers(),
        panel.len(),
        out.display()
    );
    Ok(())
}

fn run_signals(input: &Path, out: &Path, config: &SignalConfig) -> Result<()> {
    let mut panel = Panel::read_parquet(input)?;
    let coverage = compute_signals(&mut panel, config)?;
    println!(
        "Signals: {} cells, {} without momentum, {} without volatility",
        coverage.cells, coverage.undefined_momentum, coverage.undefined_vol
    );
    write_panel(&panel, out)
}

fn print_panel_summary(panel: &Panel, output: OutputFormat) {
    let summary = panel.summary();
    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Failed to serialize panel summary: {}", e),
        },
        OutputFormat::Csv => {
            println!("ticker,observations,missing_closes");
            for t in &summary.tickers {
                println!("{},{},{}", t.ticker, t.observations, t.missing_closes);
            }
        }
        OutputFormat::Text => {
            println!();
            println!("{}", "Panel Summary".bold());
            println!("  Tickers: {}", summary.num_tickers);
            println!("  Dates:   {}", summary.num_dates);
            if let (Some(start), Some(end)) = (summary.start, summary.end) {
                println!("  Range:   {} .. {}", start, end);
            }
            let incomplete: Vec<_> = summary.incomplete().collect();
            if !incomplete.is_empty() {
                println!("\n  {}", "Missing closes".yellow());
                for t in incomplete {
                    println!("    {:<8} {:>6} of {}", t.ticker, t.missing_closes, summary.num_dates);
                }
            }
            let r = summary.returns;
            println!("\n  Daily returns ({} obs)", r.count);
            println!("    mean {:>9.5}  std {:>9.5}", r.mean, r.std);
            println!("    min  {:>9.5}  25% {:>9.5}  50% {:>9.5}", r.min, r.q25, r.median);
            println!("    75%  {:>9.5}  max {:>9.5}", r.q75, r.max);
        }
    }
}

fn inspect(path: &Path, ticker: &str, plot: Option<&Path>, output: OutputFormat) -> Result<()> {
    let panel = Panel::read_parquet(path)?;
    print_panel_summary(&panel, output);

    if let Some(plot) = plot {
        ensure_parent(plot)?;
        let config = ChartConfig::titled(format!("{} close", ticker)).with_y_label("Close");
        save_svg(plot, |w| write_price_svg(w, &panel, ticker, &config))?;
        println!("Saved: {}", plot.display());
    }
    Ok(())
}

fn run_policies(
    panel: &Panel,
    kinds: &[PolicyKind],
    settings: &PolicySettings,
    capitals: &[f64],
    slippage: f64,
    progress: bool,
) -> Result<Vec<BacktestResult>> {
    let policies: Vec<Box<dyn AllocationPolicy>> = kinds
        .iter()
        .map(|k| k.build(panel.tickers(), settings))
        .collect();
    let results = if progress {
        run_batch_with_progress(panel, &policies, capitals, slippage)
    } else {
        run_batch(panel, &policies, capitals, slippage)
    };
    if results.is_empty() {
        return Err(BacktestError::NoData);
    }
    Ok(results)
}

/// Persist results, summaries and run metadata.
///
/// Returns `false` without writing anything when no run has a single date.
fn save_run<C: serde::Serialize>(
    panel: &Panel,
    results: &[BacktestResult],
    summaries: &[PerformanceSummary],
    run_config: &C,
    inputs: &[&Path],
    out_dir: &Path,
) -> Result<bool> {
    if results.iter().all(|r| r.is_empty()) {
        warn!(
            "No trading dates in the backtest window; nothing saved to {}",
            out_dir.display()
        );
        return Ok(false);
    }

    fs::create_dir_all(out_dir)?;
    let paths = OutputSettings {
        dir: out_dir.to_path_buf(),
    };
    let rows = to_rows(results);
    save_results(&rows, paths.results_path())?;
    save_results(&rows, paths.results_path().with_extension("csv"))?;
    write_csv(summaries, paths.summary_path())?;

    let mut metadata = RunMetadata::new(run_config, panel, results.len());
    for input in inputs {
        metadata = metadata.with_input(input)?;
    }
    metadata.save(paths.metadata_path())?;
    info!("Saved {} runs to {}", results.len(), out_dir.display());
    Ok(true)
}

fn print_summaries(results: &[BacktestResult], summaries: &[PerformanceSummary], output: OutputFormat) {
    match output {
        OutputFormat::Text => {
            ResultFormatter::print_table(summaries);
            for r in results {
                println!(
                    "  {:<14} {:>6}  {}",
                    r.model,
                    r.starting_capital,
                    nav_sparkline(r, 40)
                );
            }
        }
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(summaries)),
        OutputFormat::Csv => {
            println!("{}", ResultFormatter::csv_header());
            for s in summaries {
                println!("{}", ResultFormatter::to_csv_line(s));
            }
        }
    }
}

fn write_result_plots(
    results: &[BacktestResult],
    summaries: &[PerformanceSummary],
    dir: &Path,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    let equity = dir.join("equity_curves.svg");
    let config = ChartConfig::titled("Equity curves").with_y_label("NAV");
    save_svg(&equity, |w| write_equity_curves_svg(w, results, &config))?;

    let sharpe = dir.join("sharpe_comparison.svg");
    let config = ChartConfig::titled("Sharpe ratio by model and capital").with_y_label("Sharpe");
    save_svg(&sharpe, |w| write_sharpe_bars_svg(w, summaries, &config))?;

    println!("Saved: {}", equity.display());
    println!("Saved: {}", sharpe.display());
    Ok(())
}

fn analyze(path: &Path, slippage: f64, plots: Option<&Path>, output: OutputFormat) -> Result<()> {
    let rows = load_results(path)?;
    let results = group_rows(&rows, slippage);
    let summaries = summarize(&results);

    if output == OutputFormat::Text {
        for r in &results {
            ResultFormatter::print_report(r);
        }
    }
    print_summaries(&results, &summaries, output);

    if let Some(dir) = plots {
        write_result_plots(&results, &summaries, dir)?;
    }
    Ok(())
}

fn sensitivity(
    panel: &Panel,
    config: &SensitivityConfig,
    out: &Path,
    plot: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let records = run_sensitivity(panel, config)?;
    ensure_parent(out)?;
    write_csv(&records, out)?;

    let violations = slippage_violations(&records);
    for v in &violations {
        warn!(
            "Cumulative return rose with slippage: {} {} capital {} ({} -> {} bps)",
            v.period, v.model, v.capital, v.from_bps, v.to_bps
        );
    }

    if let Some(plot) = plot {
        if let (Some(period), Some(&capital)) = (config.periods.first(), config.capitals.first()) {
            ensure_parent(plot)?;
            let curves = sharpe_by_slippage(&records, &period.name, capital);
            let chart = ChartConfig::titled(format!("Sharpe vs slippage ({}, capital {})", period.name, capital))
                .with_y_label("Sharpe");
            save_svg(plot, |w| write_sharpe_vs_slippage_svg(w, &curves, &chart))?;
            println!("Saved: {}", plot.display());
        }
    }

    print_sensitivity(&records, violations.is_empty(), output);
    Ok(())
}

fn print_sensitivity(records: &[SensitivityRecord], monotone: bool, output: OutputFormat) {
    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(records) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Failed to serialize sensitivity records: {}", e),
        },
        OutputFormat::Csv => {
            println!("period,slippage_bps,model,capital,cumulative_return,sharpe_ratio,max_drawdown,annual_vol");
            for r in records {
                println!(
                    "{},{},{},{},{:.6},{:.6},{:.6},{:.6}",
                    r.period,
                    r.slippage_bps,
                    r.model,
                    r.capital,
                    r.cumulative_return,
                    r.sharpe_ratio,
                    r.max_drawdown,
                    r.annual_vol
                );
            }
        }
        OutputFormat::Text => {
            println!();
            println!("{}", "Slippage Sensitivity".bold());
            println!(
                "  {:<10} {:>4}  {:<14} {:>8} {:>10} {:>8} {:>9}",
                "Period", "bps", "Model", "Capital", "Return %", "Sharpe", "Max DD %"
            );
            for r in records {
                println!(
                    "  {:<10} {:>4}  {:<14} {:>8.0} {:>10.2} {:>8.2} {:>9.2}",
                    r.period,
                    r.slippage_bps,
                    r.model,
                    r.capital,
                    r.cumulative_return * 100.0,
                    r.sharpe_ratio,
                    r.max_drawdown * 100.0
                );
            }
            if monotone {
                println!("\n  {}", "Cumulative return is non-increasing in slippage".green());
            } else {
                println!("\n  {}", "Cumulative return rose with slippage (see warnings)".red());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compare(
    results: &[BacktestResult],
    model_a: &str,
    model_b: &str,
    capital: f64,
    n_boot: usize,
    seed: u64,
    out: &Path,
    output: OutputFormat,
) -> Result<()> {
    let tests = paired_tests(results, model_a, model_b, capital)?;
    let interval = bootstrap_cum_diff(results, model_a, model_b, capital, n_boot, seed)?;

    ensure_parent(out)?;
    write_csv(std::slice::from_ref(&tests), out)?;
    print_stats(&tests, &interval, output);
    Ok(())
}

fn print_stats(tests: &TestResult, interval: &BootstrapInterval, output: OutputFormat) {
    match output {
        OutputFormat::Json => {
            let value = serde_json::json!({ "tests": tests, "bootstrap": interval });
            println!("{}", value);
        }
        OutputFormat::Csv => {
            println!("model_a,model_b,capital,n,t_stat,p_val,wilcoxon_stat,p_wilcoxon,ci_lower,ci_upper");
            println!(
                "{},{},{},{},{:.6},{:.6},{},{:.6},{:.6},{:.6}",
                tests.model_a,
                tests.model_b,
                tests.capital,
                tests.n,
                tests.t_stat,
                tests.p_val,
                tests.wilcoxon_stat,
                tests.p_wilcoxon,
                interval.lower,
                interval.upper
            );
        }
        OutputFormat::Text => {
            println!();
            println!(
                "{}",
                format!("{} vs {} at capital {}", tests.model_a, tests.model_b, tests.capital).bold()
            );
            println!("  Paired days:      {}", tests.n);
            println!("  t statistic:      {:.4} (p = {:.4})", tests.t_stat, tests.p_val);
            println!("  Wilcoxon W:       {} (p = {:.4})", tests.wilcoxon_stat, tests.p_wilcoxon);
            println!(
                "  Cum. return diff: {:.4}, 95% CI [{:.4}, {:.4}] ({} draws)",
                interval.observed, interval.lower, interval.upper, interval.n_boot
            );
        }
    }
}

fn run_from_config(config_path: &Path, output: OutputFormat) -> Result<()> {
    let config = StudyConfig::load(config_path)?;
    let out_dir = &config.output.dir;
    fs::create_dir_all(out_dir)?;

    let mut panel = ingest(
        &config.data.bars_dir,
        &config.data.pattern,
        config.signals.return_clip,
        config.data.date_format.clone(),
    )?;
    write_panel(&panel, &config.data.panel_path)?;

    let coverage = compute_signals(&mut panel, &config.signals.to_signal_config())?;
    info!(
        "Signals computed: {} of {} cells lack momentum",
        coverage.undefined_momentum, coverage.cells
    );
    write_panel(&panel, &config.data.signals_panel_path)?;

    let window = panel.filter_dates(config.backtest.start_date, config.backtest.end_date);
    let settings = config.backtest.policy_settings();
    let results = run_policies(
        &window,
        &config.backtest.policies,
        &settings,
        &config.backtest.capitals,
        config.backtest.slippage,
        config.backtest.show_progress,
    )?;
    let summaries = summarize(&results);
    let saved = save_run(
        &window,
        &results,
        &summaries,
        &config,
        &[config_path, config.data.signals_panel_path.as_path()],
        out_dir,
    )?;
    if saved {
        write_result_plots(&results, &summaries, &out_dir.join("plots"))?;
    }
    print_summaries(&results, &summaries, output);

    let mut sweep = config.sensitivity.clone();
    sweep.policy_settings = settings;
    sensitivity(
        &panel,
        &sweep,
        &config.output.sensitivity_path(),
        Some(&out_dir.join("plots").join("sharpe_vs_slippage.svg")),
        output,
    )?;

    if !saved {
        warn!("Statistical comparison skipped: empty backtest window");
    } else if let Err(e) = compare(
        &results,
        &config.stats.model_a,
        &config.stats.model_b,
        config.stats.capital,
        config.stats.n_boot,
        config.stats.seed,
        &config.output.stats_path(),
        output,
    ) {
        warn!("Statistical comparison skipped: {}", e);
    }

    write_json(&config, out_dir.join("study_config.json"))?;
    println!("\nStudy complete. Output directory: {}", out_dir.display());
    Ok(())
}

fn print_policies() {
    println!("\nAvailable Policies:\n");

    println!("  {}", PolicyKind::EqualWeight.label());
    println!("    Equal weight 1/N across every ticker, every day.");
    println!();

    println!("  {}", PolicyKind::MomentumTilt.label());
    println!("    80% on the benchmark, 20% split across the top-N tickers by momentum.");
    println!(
        "    Parameters: --benchmark (default: {}), --top-n (default: {})",
        DEFAULT_BENCHMARK, DEFAULT_TOP_N
    );
    println!();

    println!("External models (use via library API):");
    println!("  ModelAdapter");
    println!("    Wrap any scorer over the signal feature matrix as a policy.");
    println!();
}
