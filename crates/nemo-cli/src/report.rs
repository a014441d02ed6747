use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nemo_core::{
    export_prototype, extract_prototype, synthesize_corrections, synthesize_structural_correction,
    AnalysisConfig, DebugError, Prototype, RunCorrections, StructuralCorrection, Subgraph,
    Suggestion,
};
use nemo_store_sqlite::SqliteProvenanceStore;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ulid::Ulid;

pub const REPORT_CONTRACT_VERSION: &str = "nemo_report.v1";
pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrototypeExport {
    pub labels: Vec<String>,
    #[serde(flatten)]
    pub subgraph: Subgraph,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuralReport {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<StructuralCorrection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub suggestions: Vec<Suggestion>,
    pub text: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub run: u32,
    pub suggestions: Vec<Suggestion>,
    pub text: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebugReport {
    pub contract_version: String,
    pub session_id: String,
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub config: AnalysisConfig,
    pub prototype: Prototype,
    pub prototype_export: PrototypeExport,
    pub structural: StructuralReport,
    pub runs: Vec<RunReport>,
}

/// Builds the prototype export for `prototype` over the baseline run.
pub fn prototype_export(
    store: &SqliteProvenanceStore,
    config: &AnalysisConfig,
    prototype: &Prototype,
) -> Result<PrototypeExport> {
    let subgraph = export_prototype(store, config.baseline_run, prototype)?;
    Ok(PrototypeExport {
        labels: prototype.labels.iter().cloned().collect(),
        subgraph,
    })
}

/// Structural correction, with a missing aggregation reported instead of
/// failing.
pub fn structural_report(
    store: &SqliteProvenanceStore,
    config: &AnalysisConfig,
) -> Result<StructuralReport> {
    match synthesize_structural_correction(store, config) {
        Ok(correction) => {
            let suggestions = correction.suggestions();
            Ok(StructuralReport {
                available: true,
                text: render(&suggestions),
                suggestions,
                correction: Some(correction),
                reason: None,
            })
        }
        Err(err @ DebugError::MissingAggregation { .. }) => {
            tracing::warn!(error = %err, "structural correction unavailable");
            Ok(StructuralReport {
                available: false,
                correction: None,
                reason: Some(err.to_string()),
                suggestions: Vec::new(),
                text: Vec::new(),
            })
        }
        Err(err) => Err(err.into()),
    }
}

pub fn run_reports(corrections: Vec<RunCorrections>) -> Vec<RunReport> {
    corrections
        .into_iter()
        .map(|entry| RunReport {
            run: entry.run,
            text: render(&entry.suggestions),
            suggestions: entry.suggestions,
        })
        .collect()
}

/// Runs the complete analysis against an already loaded and differenced
/// store.
pub fn build_report(
    store: &SqliteProvenanceStore,
    config: &AnalysisConfig,
    source: Option<String>,
) -> Result<DebugReport> {
    let successful = store.successful_runs()?;
    let failed = store.failed_runs()?;
    let messages = failed
        .iter()
        .map(|run| store.messages(*run))
        .collect::<Result<Vec<_>>>()?;

    let prototype = extract_prototype(store, config, &successful)?;
    let prototype_export = prototype_export(store, config, &prototype)?;
    let structural = structural_report(store, config)?;
    let runs = run_reports(synthesize_corrections(store, config, &failed, &messages)?);

    Ok(DebugReport {
        contract_version: REPORT_CONTRACT_VERSION.to_string(),
        session_id: Ulid::new().to_string(),
        generated_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| anyhow!("failed to format timestamp: {err}"))?,
        source,
        config: config.clone(),
        prototype,
        prototype_export,
        structural,
        runs,
    })
}

/// Report location for a fault-injector output directory:
/// `<results>/<output dir name>/report.json`.
pub fn report_path(results: &Path, output_dir: &Path) -> Result<PathBuf> {
    let name = output_dir
        .file_name()
        .ok_or_else(|| anyhow!("cannot derive a run name from {}", output_dir.display()))?;
    Ok(results.join(name).join(REPORT_FILE))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

fn render(suggestions: &[Suggestion]) -> Vec<String> {
    suggestions.iter().map(Suggestion::render_plain).collect()
}
