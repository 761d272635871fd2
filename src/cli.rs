//! CLI definition and dispatch.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::centroid_model_adapter::load_model;
use crate::adapters::csv_adapter::{load_samples, CsvAdapter};
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{run_backtest, BacktestResult};
use crate::domain::config_validation::{
    build_backtest_config, build_definitions, build_range_table, build_scoring_config,
    build_staleness_policy, validate_config,
};
use crate::domain::error::PxiError;
use crate::domain::regime::{RegimeAssignment, RegimeClassifier};
use crate::domain::sanity::{
    rolling_volatility, sanity_check_batch, stability_rating, DEFAULT_VOLATILITY_WINDOW,
};
use crate::domain::scoring::{CompositeScorer, CompositeSnapshot};
use crate::domain::staleness::{check_staleness, StaleFeed};
use crate::domain::validator::validate_samples;
use crate::ports::config_port::ConfigPort;
use crate::ports::history_port::MetricHistoryPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "pxi", about = "Systemic stress composite index")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check a sample batch against the hard validation rules
    Validate {
        #[arg(short, long)]
        samples: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run statistical sanity checks over stored metric history
    Sanity {
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Score a sample batch into a composite snapshot
    Score {
        #[arg(short, long)]
        samples: PathBuf,
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Evaluation time (RFC 3339); defaults to now
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Replay composite history through the configured rules
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data_dir: PathBuf,
        /// Write the daily ledger as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn execute(command: Command) -> Result<(), PxiError> {
    match command {
        Command::Validate { samples, config } => run_validate(&samples, config.as_deref()),
        Command::Sanity { data_dir, config } => run_sanity(&data_dir, config.as_deref()),
        Command::Score {
            samples,
            data_dir,
            config,
            as_of,
            json,
        } => run_score(&samples, &data_dir, config.as_deref(), as_of.as_deref(), json),
        Command::Backtest {
            config,
            data_dir,
            output,
            json,
        } => run_backtest_command(&config, &data_dir, output.as_deref(), json),
        Command::CheckConfig { config } => run_check_config(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, PxiError> {
    FileConfigAdapter::from_file(path).map_err(|e| PxiError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// An absent config file means every section takes its defaults.
fn load_optional_config(path: Option<&Path>) -> Result<FileConfigAdapter, PxiError> {
    match path {
        Some(p) => load_config(p),
        None => FileConfigAdapter::from_string("").map_err(|reason| PxiError::ConfigParse {
            file: "<default>".into(),
            reason,
        }),
    }
}

fn run_validate(samples_path: &Path, config_path: Option<&Path>) -> Result<(), PxiError> {
    let config = load_optional_config(config_path)?;
    let limits = build_range_table(&config)?;

    eprintln!("Validating samples: {}", samples_path.display());
    let samples = load_samples(samples_path)?;
    validate_samples(&samples, &limits)?;

    eprintln!("{} sample(s) valid", samples.len());
    Ok(())
}

fn run_sanity(data_dir: &Path, config_path: Option<&Path>) -> Result<(), PxiError> {
    let config = load_optional_config(config_path)?;
    let scoring = build_scoring_config(&config)?;

    let history = CsvAdapter::new(data_dir.to_path_buf()).fetch_all()?;
    let report = sanity_check_batch(&history, scoring.outlier_threshold, scoring.min_points);

    for (id, series) in &history {
        let vol = rolling_volatility(series, DEFAULT_VOLATILITY_WINDOW);
        let status = match report.failures.iter().find(|(f, _)| f == id) {
            Some((_, r)) => r.reason.clone().unwrap_or_else(|| "failed".into()),
            None => "ok".into(),
        };
        println!(
            "{:<14} points={:<5} volatility={:<10} stability={:<8} {}",
            id.key(),
            series.len(),
            vol.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}")),
            stability_rating(vol),
            status
        );
    }

    eprintln!(
        "\n{} checked: {} ok, {} outlier(s), {} flatline(s), {} invalid, {} insufficient",
        report.total,
        report.ok,
        report.outliers,
        report.flatlines,
        report.invalid,
        report.insufficient
    );
    Ok(())
}

#[derive(Serialize)]
struct ScoreReport<'a> {
    snapshot: &'a CompositeSnapshot,
    regime: Option<&'a RegimeAssignment>,
    stale: &'a [StaleFeed],
}

fn run_score(
    samples_path: &Path,
    data_dir: &Path,
    config_path: Option<&Path>,
    as_of: Option<&str>,
    json: bool,
) -> Result<(), PxiError> {
    // Stage 1: Load config
    let config = load_optional_config(config_path)?;
    let now = parse_as_of(as_of)?;

    // Stage 2: Load and validate samples
    let samples = load_samples(samples_path)?;
    validate_samples(&samples, &build_range_table(&config)?)?;

    // Stage 3: Staleness (advisory)
    let stale = check_staleness(&samples, now, &build_staleness_policy(&config)?);
    for feed in &stale {
        eprintln!(
            "warning: {} is stale ({}h old, limit {}h)",
            feed.metric,
            feed.age_seconds / 3600,
            feed.threshold_seconds / 3600
        );
    }

    // Stage 4: Score against stored history
    let history = CsvAdapter::new(data_dir.to_path_buf()).fetch_all()?;
    let scorer = CompositeScorer::new(build_definitions(&config)?, build_scoring_config(&config)?);
    let snapshot = scorer.score(&samples, &history, now)?;

    // Stage 5: Regime, when a model is configured
    let regime = match config.get_string("regime", "centroid_model") {
        Some(path) => {
            let classifier = RegimeClassifier::new(load_model(Path::new(path.trim()))?)?;
            Some(classifier.classify(&snapshot, scorer.config().state_thresholds)?)
        }
        None => None,
    };

    if json {
        let report = ScoreReport {
            snapshot: &snapshot,
            regime: regime.as_ref(),
            stale: &stale,
        };
        println!("{}", to_json(&report)?);
        return Ok(());
    }

    println!(
        "PXI {:.1} ({})  z={:+.3}  weight={:.2}",
        snapshot.pxi, snapshot.status_label, snapshot.z_score, snapshot.total_weight
    );
    for m in &snapshot.metrics {
        println!(
            "  {:<14} value={:<10} z={:+.3}  contribution={:+.3}  {}",
            m.id.key(),
            m.value,
            m.signed_z,
            m.contribution,
            m.state
        );
    }
    for x in &snapshot.excluded {
        println!("  {:<14} excluded: {}", x.id.key(), x.reason);
    }
    if let Some(r) = &regime {
        println!(
            "Regime: {} (distance {:.3}, model {})",
            r.regime, r.distance, r.model_version
        );
    }
    Ok(())
}

fn run_backtest_command(
    config_path: &Path,
    data_dir: &Path,
    output: Option<&Path>,
    json: bool,
) -> Result<(), PxiError> {
    // Stage 1: Load config
    let config = load_config(config_path)?;
    let backtest_config = build_backtest_config(&config)?;

    eprintln!(
        "Backtesting {} to {} with {} rule(s)",
        backtest_config.start_date,
        backtest_config.end_date,
        backtest_config.rules.len()
    );
    for rule in &backtest_config.rules {
        eprintln!("  {rule}");
    }

    // Stage 2: Simulate
    let adapter = CsvAdapter::new(data_dir.to_path_buf());
    let result = run_backtest(&adapter, &backtest_config)?;

    // Stage 3: Report
    if let Some(path) = output {
        CsvReportAdapter::new().write(&result, &path.to_string_lossy())?;
        eprintln!("Ledger written to {}", path.display());
    }

    if json {
        println!("{}", to_json(&result)?);
    } else {
        print_backtest_summary(&result);
    }
    Ok(())
}

fn print_backtest_summary(result: &BacktestResult) {
    let s = &result.summary;
    println!("Period:          {} to {}", result.start_date, result.end_date);
    println!("Days:            {}", s.days);
    println!("Trades:          {}", s.trades);
    println!("Win rate:        {:.2}%", s.win_rate * 100.0);
    println!("Total return:    {:.2}%", s.total_return * 100.0);
    println!("CAGR:            {:.2}%", s.cagr * 100.0);
    println!("Sharpe:          {:.3}", s.sharpe);
    println!("Max drawdown:    {:.2}%", s.max_drawdown * 100.0);
    println!(
        "Capital:         {:.2} -> {:.2}",
        result.initial_capital, result.final_capital
    );

    if !result.regime_breakdown.is_empty() {
        println!("\nBy regime:");
        for (regime, m) in &result.regime_breakdown {
            println!(
                "  {:<14} days={:<5} trades={:<5} return={:+.2}%  win rate={:.2}%",
                regime,
                m.days,
                m.trades,
                m.total_return * 100.0,
                m.win_rate * 100.0
            );
        }
    }
}

fn run_check_config(config_path: &Path) -> Result<(), PxiError> {
    eprintln!("Checking configuration: {}", config_path.display());
    let config = load_config(config_path)?;
    validate_config(&config)?;

    let definitions = build_definitions(&config)?;
    eprintln!("\nMetrics:");
    for d in &definitions {
        eprintln!(
            "  {:<14} weight={:<5} bounds=[{}, {}] polarity={:?}",
            d.id.key(),
            d.weight,
            d.lower_bound,
            d.upper_bound,
            d.polarity
        );
    }

    if config.sections().iter().any(|s| s == "backtest") {
        eprintln!("\nRules:");
        for rule in build_backtest_config(&config)?.rules {
            eprintln!("  {rule}");
        }
    }

    eprintln!("\nConfiguration is valid.");
    Ok(())
}

fn parse_as_of(as_of: Option<&str>) -> Result<DateTime<Utc>, PxiError> {
    match as_of {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| PxiError::Data {
                reason: format!("invalid --as-of '{s}': {e}"),
            }),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, PxiError> {
    serde_json::to_string_pretty(value).map_err(|e| PxiError::Data {
        reason: format!("failed to encode JSON: {e}"),
    })
}
