//! Embedded `nemo` command surface.
//!
//! Hosts embed the debugger through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_with_db`] for direct [`Command`] execution against a DB path.
//! - [`run_command`] for execution against an existing [`SqliteProvenanceStore`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use nemo_core::{extract_prototype, synthesize_corrections, AnalysisConfig, DiffMode};
use nemo_store_sqlite::{DifferentialSummary, SqliteProvenanceStore};
use serde::Serialize;

pub mod loader;
pub mod report;

use report::{
    build_report, prototype_export, report_path, run_reports, structural_report, write_json,
};

#[derive(Debug, Parser)]
#[command(name = "nemo")]
#[command(about = "Differential-provenance debugger for distributed protocols")]
pub struct Cli {
    #[arg(long, default_value = "./nemo.sqlite3")]
    db: PathBuf,

    /// Analysis configuration JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a fault-injector output directory, replacing earlier contents.
    Load(LoadArgs),
    /// Materialize differential post-provenance for failed runs.
    Diff(DiffArgs),
    /// Extract the success prototype.
    Prototype(PrototypeArgs),
    /// Synthesize correction suggestions.
    Correct(CorrectArgs),
    /// Load, difference, analyze, and write the JSON report.
    Debug(DebugArgs),
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Failed runs to difference; all failed runs when omitted.
    #[arg(long = "failed")]
    pub failed: Vec<u32>,
    /// Overrides the configured differential mode.
    #[arg(long)]
    pub mode: Option<DiffModeArg>,
}

#[derive(Debug, Args)]
pub struct PrototypeArgs {
    /// Iterations to intersect; all successful runs when omitted.
    #[arg(long = "iteration")]
    iterations: Vec<u32>,
    /// Writes `{labels, nodes, edges}` of the prototype subgraph here.
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CorrectArgs {
    /// Failed runs to diagnose; all failed runs when omitted.
    #[arg(long = "failed")]
    failed: Vec<u32>,
    /// Only emit the structural correction.
    #[arg(long)]
    structural_only: bool,
}

#[derive(Debug, Args)]
pub struct DebugArgs {
    #[arg(long)]
    output: PathBuf,
    #[arg(long, default_value = "./results")]
    results: PathBuf,
    /// Print suggestions as plain text instead of the JSON report.
    #[arg(long)]
    text: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DiffModeArg {
    GoodMinusFailed,
    FailedMinusGood,
}

impl From<DiffModeArg> for DiffMode {
    fn from(value: DiffModeArg) -> Self {
        match value {
            DiffModeArg::GoodMinusFailed => Self::GoodMinusFailed,
            DiffModeArg::FailedMinusGood => Self::FailedMinusGood,
        }
    }
}

#[derive(Debug, Serialize)]
struct DiffOutput {
    differentials: Vec<DifferentialSummary>,
}

#[derive(Debug, Serialize)]
struct CorrectOutput {
    structural: report::StructuralReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    runs: Option<Vec<report::RunReport>>,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    run_with_db(&cli.db, &config, cli.command)
}

pub fn run_with_db(db_path: &Path, config: &AnalysisConfig, command: Command) -> Result<()> {
    let mut store = SqliteProvenanceStore::open(db_path)?;
    store.migrate()?;
    run_command(command, config, &mut store)
}

pub fn run_command(
    command: Command,
    config: &AnalysisConfig,
    store: &mut SqliteProvenanceStore,
) -> Result<()> {
    match command {
        Command::Load(args) => {
            let summary = loader::load_into_store(&args.output, store)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Diff(args) => {
            let mode = args.mode.map_or(config.diff_mode, DiffMode::from);
            let failed = runs_or(args.failed, || store.failed_runs())?;
            let differentials = failed
                .into_iter()
                .map(|run| store.materialize_diff(config, run, mode))
                .collect::<Result<Vec<_>>>()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&DiffOutput { differentials })?
            );
            Ok(())
        }
        Command::Prototype(args) => {
            let iterations = runs_or(args.iterations, || store.successful_runs())?;
            let prototype = extract_prototype(&*store, config, &iterations)?;
            if let Some(path) = args.export {
                let export = prototype_export(store, config, &prototype)?;
                write_json(&path, &export)?;
                tracing::info!(path = %path.display(), "prototype exported");
            }
            println!("{}", serde_json::to_string_pretty(&prototype)?);
            Ok(())
        }
        Command::Correct(args) => {
            let structural = structural_report(store, config)?;
            let runs = if args.structural_only {
                None
            } else {
                let failed = runs_or(args.failed, || store.failed_runs())?;
                let messages = failed
                    .iter()
                    .map(|run| store.messages(*run))
                    .collect::<Result<Vec<_>>>()?;
                Some(run_reports(synthesize_corrections(
                    &*store, config, &failed, &messages,
                )?))
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&CorrectOutput { structural, runs })?
            );
            Ok(())
        }
        Command::Debug(args) => run_debug(&args, config, store),
    }
}

fn run_debug(
    args: &DebugArgs,
    config: &AnalysisConfig,
    store: &mut SqliteProvenanceStore,
) -> Result<()> {
    let target = report_path(&args.results, &args.output)?;

    let summary = loader::load_into_store(&args.output, store)?;
    if !summary.runs.contains(&config.baseline_run) {
        return Err(anyhow!(
            "baseline run {} is not part of {}",
            config.baseline_run,
            args.output.display()
        ));
    }
    for run in &summary.failed_runs {
        store.materialize_diff(config, *run, config.diff_mode)?;
    }

    let report = build_report(store, config, Some(summary.source))?;
    write_json(&target, &report)?;
    tracing::info!(
        session = %report.session_id,
        path = %target.display(),
        "debug report written"
    );

    if args.text {
        print_text_report(&report);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn print_text_report(report: &report::DebugReport) {
    println!("session={}", report.session_id);
    println!(
        "prototype achieved={}/{} labels={}",
        report.prototype.achieved,
        report.prototype.iterations,
        report.prototype.labels.len()
    );
    for label in &report.prototype.labels {
        println!("  {label}");
    }

    println!("structural:");
    match &report.structural.reason {
        Some(reason) => println!("  unavailable: {reason}"),
        None => {
            for line in &report.structural.text {
                println!("  {line}");
            }
        }
    }

    for run in &report.runs {
        println!("run {}:", run.run);
        for line in &run.text {
            println!("  {line}");
        }
    }
}

fn runs_or(explicit: Vec<u32>, all: impl FnOnce() -> Result<Vec<u32>>) -> Result<Vec<u32>> {
    if explicit.is_empty() {
        all()
    } else {
        Ok(explicit)
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::v1());
    };
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    AnalysisConfig::from_json(&body)
        .with_context(|| format!("invalid config {}", path.display()))
}
