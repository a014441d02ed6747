//! Ingestion of a fault-injector output directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nemo_core::{Condition, Edge, Goal, Message, Node, ProvenanceGraph, Rule};
use nemo_store_sqlite::{GraphSummary, RunRecord, SqliteProvenanceStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RUNS_FILE: &str = "runs.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRun {
    iteration: u32,
    status: String,
    #[serde(default)]
    failure_spec: Option<Value>,
    #[serde(default)]
    model: Option<RawModel>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Default, Deserialize)]
struct RawModel {
    #[serde(default)]
    tables: BTreeMap<String, Vec<Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
struct RawProvenance {
    #[serde(default)]
    goals: Vec<RawGoal>,
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct RawGoal {
    id: String,
    label: String,
    table: String,
    time: Value,
    #[serde(default)]
    condition_holds: Option<bool>,
}

/// A run together with both of its provenance graphs.
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub record: RunRecord,
    pub pre: ProvenanceGraph,
    pub post: ProvenanceGraph,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadSummary {
    pub source: String,
    pub runs: Vec<u32>,
    pub failed_runs: Vec<u32>,
    pub graphs: Vec<GraphSummary>,
}

#[must_use]
pub fn provenance_path(dir: &Path, run: u32, condition: Condition) -> PathBuf {
    dir.join(format!("run_{run}_{condition}_provenance.json"))
}

/// Reads `runs.json` and the per-run provenance files below `dir`.
pub fn read_output_dir(dir: &Path) -> Result<Vec<LoadedRun>> {
    let runs_path = dir.join(RUNS_FILE);
    let raw_runs: Vec<RawRun> = read_json(&runs_path)?;

    let mut seen = BTreeSet::new();
    let mut loaded = Vec::with_capacity(raw_runs.len());
    for raw in raw_runs {
        if !seen.insert(raw.iteration) {
            return Err(anyhow!(
                "{} lists iteration {} more than once",
                runs_path.display(),
                raw.iteration
            ));
        }

        let model = raw.model.unwrap_or_default();
        let pre = read_graph(dir, raw.iteration, Condition::Pre, &model)?;
        let post = read_graph(dir, raw.iteration, Condition::Post, &model)?;

        loaded.push(LoadedRun {
            record: RunRecord {
                run: raw.iteration,
                status: raw.status,
                failure_spec: raw.failure_spec,
                messages: raw.messages,
            },
            pre,
            post,
        });
    }

    tracing::info!(dir = %dir.display(), runs = loaded.len(), "fault injector output read");
    Ok(loaded)
}

/// Reads `dir` and makes its runs and graphs the only content of `store`.
/// Nothing is cleared when `dir` cannot be read.
pub fn load_into_store(dir: &Path, store: &mut SqliteProvenanceStore) -> Result<LoadSummary> {
    let loaded = read_output_dir(dir)?;
    store.reset()?;

    let mut graphs = Vec::with_capacity(loaded.len() * 2);
    for run in &loaded {
        store.put_run(&run.record)?;
        graphs.push(store.put_graph(run.record.run, Condition::Pre, &run.pre)?);
        graphs.push(store.put_graph(run.record.run, Condition::Post, &run.post)?);
    }

    Ok(LoadSummary {
        source: dir.display().to_string(),
        runs: loaded.iter().map(|run| run.record.run).collect(),
        failed_runs: loaded
            .iter()
            .filter(|run| !run.record.is_success())
            .map(|run| run.record.run)
            .collect(),
        graphs,
    })
}

fn read_graph(
    dir: &Path,
    run: u32,
    condition: Condition,
    model: &RawModel,
) -> Result<ProvenanceGraph> {
    let path = provenance_path(dir, run, condition);
    let raw: RawProvenance = read_json(&path)?;

    let holding_times = model
        .tables
        .get(condition.as_str())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.last().map(scalar_text))
                .collect::<BTreeSet<_>>()
        })
        .unwrap_or_default();

    let mut nodes = Vec::with_capacity(raw.goals.len() + raw.rules.len());
    for goal in raw.goals {
        let time = scalar_text(&goal.time);
        let condition_holds = goal
            .condition_holds
            .unwrap_or_else(|| holding_times.contains(&time));
        nodes.push(Node::Goal(Goal {
            id: goal.id,
            label: goal.label,
            table: goal.table,
            time,
            condition_holds,
            sender: None,
            receiver: None,
        }));
    }
    nodes.extend(raw.rules.into_iter().map(Node::Rule));

    ProvenanceGraph::from_parts(nodes, raw.edges)
        .map_err(|err| anyhow!("invalid provenance in {}: {err}", path.display()))
}

/// Times and model cells arrive as either JSON strings or numbers.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("failed to parse {}", path.display()))
}
