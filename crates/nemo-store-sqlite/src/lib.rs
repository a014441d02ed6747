#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use nemo_core::{
    differential, evaluate, AnalysisConfig, Condition, DiffMode, Edge, Goal, GraphStore, Message,
    Node, Pattern, ProvenanceGraph, QueryError, Row, Rule, RuleType,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const PROVENANCE_MIGRATION_VERSION: i64 = 1;
const SUCCESS_STATUS: &str = "success";

const SCHEMA_PROVENANCE_V1: &str = r"
CREATE TABLE IF NOT EXISTS runs (
  run INTEGER PRIMARY KEY,
  status TEXT NOT NULL,
  failure_spec_json TEXT,
  recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
  run INTEGER NOT NULL REFERENCES runs(run) ON DELETE CASCADE,
  seq INTEGER NOT NULL,
  content TEXT NOT NULL,
  send_node TEXT NOT NULL,
  recv_node TEXT NOT NULL,
  send_time INTEGER NOT NULL,
  recv_time INTEGER NOT NULL,
  PRIMARY KEY (run, seq)
);

CREATE INDEX IF NOT EXISTS idx_messages_match
  ON messages(run, content, recv_node, recv_time);

CREATE TABLE IF NOT EXISTS nodes (
  run INTEGER NOT NULL,
  condition TEXT NOT NULL CHECK (condition IN ('pre', 'post')),
  node_id TEXT NOT NULL,
  kind TEXT NOT NULL CHECK (kind IN ('rule', 'goal')),
  label TEXT NOT NULL,
  table_name TEXT NOT NULL,
  rule_type TEXT CHECK (rule_type IS NULL OR rule_type IN ('sync', 'async')),
  time TEXT,
  condition_holds INTEGER,
  PRIMARY KEY (run, condition, node_id)
);

CREATE TABLE IF NOT EXISTS edges (
  run INTEGER NOT NULL,
  condition TEXT NOT NULL,
  from_id TEXT NOT NULL,
  to_id TEXT NOT NULL,
  PRIMARY KEY (run, condition, from_id, to_id),
  FOREIGN KEY (run, condition, from_id) REFERENCES nodes(run, condition, node_id) ON DELETE CASCADE,
  FOREIGN KEY (run, condition, to_id) REFERENCES nodes(run, condition, node_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS differentials (
  run INTEGER PRIMARY KEY,
  mode TEXT NOT NULL,
  baseline_run INTEGER NOT NULL,
  failed_run INTEGER NOT NULL,
  node_count INTEGER NOT NULL,
  edge_count INTEGER NOT NULL,
  materialized_at TEXT NOT NULL
);
";

pub struct SqliteProvenanceStore {
    conn: Connection,
}

/// One fault-injector execution as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub run: u32,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_spec: Option<Value>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl RunRecord {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphSummary {
    pub run: u32,
    pub condition: Condition,
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DifferentialSummary {
    pub run: u32,
    pub mode: DiffMode,
    pub baseline_run: u32,
    pub failed_run: u32,
    pub nodes: usize,
    pub edges: usize,
}

impl SqliteProvenanceStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_PROVENANCE_V1)
            .context("failed to apply provenance schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![PROVENANCE_MIGRATION_VERSION, now_rfc3339()?],
            )
            .context("failed to register provenance schema migration")?;

        Ok(())
    }

    /// Drops every stored run, message, graph and differential so a new
    /// fault-injector output starts from an empty store.
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for table in ["edges", "nodes", "differentials", "messages", "runs"] {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .with_context(|| format!("failed to clear {table}"))?;
        }
        tx.commit().context("failed to commit store reset")?;
        tracing::debug!("provenance store reset");
        Ok(())
    }

    /// Inserts or replaces a run together with its message log.
    pub fn put_run(&mut self, record: &RunRecord) -> Result<()> {
        let failure_spec = record
            .failure_spec
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize failure spec")?;
        let now = now_rfc3339()?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs(run, status, failure_spec_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run) DO UPDATE SET
               status = excluded.status,
               failure_spec_json = excluded.failure_spec_json,
               recorded_at = excluded.recorded_at",
            params![i64::from(record.run), record.status, failure_spec, now],
        )
        .with_context(|| format!("failed to upsert run {}", record.run))?;

        tx.execute(
            "DELETE FROM messages WHERE run = ?1",
            params![i64::from(record.run)],
        )
        .with_context(|| format!("failed to clear messages of run {}", record.run))?;

        for (seq, message) in record.messages.iter().enumerate() {
            tx.execute(
                "INSERT INTO messages(run, seq, content, send_node, recv_node, send_time, recv_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    i64::from(record.run),
                    i64::try_from(seq).context("message sequence overflow")?,
                    message.content,
                    message.send_node,
                    message.recv_node,
                    i64::from(message.send_time),
                    i64::from(message.recv_time),
                ],
            )
            .with_context(|| format!("failed to insert message {seq} of run {}", record.run))?;
        }

        tx.commit()
            .with_context(|| format!("failed to commit run {}", record.run))?;
        tracing::debug!(
            run = record.run,
            messages = record.messages.len(),
            "run stored"
        );
        Ok(())
    }

    /// Replaces the provenance graph stored for `(run, condition)`.
    pub fn put_graph(
        &mut self,
        run: u32,
        condition: Condition,
        graph: &ProvenanceGraph,
    ) -> Result<GraphSummary> {
        let tx = self.conn.transaction()?;
        let summary = replace_graph(&tx, run, condition, graph)?;
        tx.commit()
            .with_context(|| format!("failed to commit {condition} graph of run {run}"))?;
        tracing::debug!(run, condition = %condition, nodes = summary.nodes, "graph stored");
        Ok(summary)
    }

    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run, status, failure_spec_json FROM runs ORDER BY run ASC",
        )?;
        let rows = stmt.query_map([], parse_run_row)?;
        let mut runs = collect_rows(rows)?;
        for record in &mut runs {
            record.messages = self.messages(record.run)?;
        }
        Ok(runs)
    }

    pub fn run(&self, run: u32) -> Result<Option<RunRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT run, status, failure_spec_json FROM runs WHERE run = ?1",
                params![i64::from(run)],
                parse_run_row,
            )
            .optional()
            .with_context(|| format!("failed to read run {run}"))?;

        match record {
            Some(mut record) => {
                record.messages = self.messages(run)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn failed_runs(&self) -> Result<Vec<u32>> {
        self.run_ids_where("status <> ?1")
    }

    pub fn successful_runs(&self) -> Result<Vec<u32>> {
        self.run_ids_where("status = ?1")
    }

    /// Message log of `run` in recorded order.
    pub fn messages(&self, run: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT content, send_node, recv_node, send_time, recv_time
             FROM messages
             WHERE run = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![i64::from(run)], parse_message_row)?;
        collect_rows(rows)
    }

    /// Loads the stored graph of `(run, condition)`; absent graphs are empty.
    pub fn load_graph(&self, run: u32, condition: Condition) -> Result<ProvenanceGraph> {
        let (nodes, edges) = self.graph_parts(run, condition)?;
        ProvenanceGraph::from_parts(nodes, edges).map_err(|err| {
            anyhow!("stored {condition} graph of run {run} is invalid: {err}")
        })
    }

    /// Computes and stores the differential post-provenance of `failed_run`
    /// against the configured baseline. Re-running replaces the earlier
    /// result.
    pub fn materialize_diff(
        &mut self,
        config: &AnalysisConfig,
        failed_run: u32,
        mode: DiffMode,
    ) -> Result<DifferentialSummary> {
        let diff_run = config
            .diff_run_id(mode, failed_run)
            .map_err(|err| anyhow!(err.to_string()))?;

        let baseline = self.load_graph(config.baseline_run, Condition::Post)?;
        let failed = self.load_graph(failed_run, Condition::Post)?;
        let graph = differential(mode, &baseline, &failed).map_err(|err| {
            anyhow!("differential of run {failed_run} ({}) is invalid: {err}", mode.as_str())
        })?;

        let tx = self.conn.transaction()?;
        let stored = replace_graph(&tx, diff_run, Condition::Post, &graph)?;
        tx.execute(
            "INSERT INTO differentials(run, mode, baseline_run, failed_run, node_count, edge_count, materialized_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(run) DO UPDATE SET
               mode = excluded.mode,
               baseline_run = excluded.baseline_run,
               failed_run = excluded.failed_run,
               node_count = excluded.node_count,
               edge_count = excluded.edge_count,
               materialized_at = excluded.materialized_at",
            params![
                i64::from(diff_run),
                mode.as_str(),
                i64::from(config.baseline_run),
                i64::from(failed_run),
                i64::try_from(stored.nodes).context("node count overflow")?,
                i64::try_from(stored.edges).context("edge count overflow")?,
                now_rfc3339()?,
            ],
        )
        .with_context(|| format!("failed to record differential {diff_run}"))?;
        tx.commit()
            .with_context(|| format!("failed to commit differential {diff_run}"))?;

        tracing::info!(
            failed_run,
            diff_run,
            mode = mode.as_str(),
            nodes = stored.nodes,
            edges = stored.edges,
            "differential provenance materialized"
        );

        Ok(DifferentialSummary {
            run: diff_run,
            mode,
            baseline_run: config.baseline_run,
            failed_run,
            nodes: stored.nodes,
            edges: stored.edges,
        })
    }

    pub fn differentials(&self) -> Result<Vec<DifferentialSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT run, mode, baseline_run, failed_run, node_count, edge_count
             FROM differentials
             ORDER BY run ASC",
        )?;
        let rows = stmt.query_map([], parse_differential_row)?;
        collect_rows(rows)
    }

    fn run_ids_where(&self, predicate: &str) -> Result<Vec<u32>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT run FROM runs WHERE {predicate} ORDER BY run ASC"
        ))?;
        let rows = stmt.query_map(params![SUCCESS_STATUS], |row| {
            let raw: i64 = row.get(0)?;
            to_u32(0, raw, "run")
        })?;
        collect_rows(rows)
    }

    fn graph_parts(&self, run: u32, condition: Condition) -> Result<(Vec<Node>, Vec<Edge>)> {
        let mut stmt = self.conn.prepare(
            "SELECT node_id, kind, label, table_name, rule_type, time, condition_holds
             FROM nodes
             WHERE run = ?1 AND condition = ?2
             ORDER BY node_id ASC",
        )?;
        let rows = stmt.query_map(
            params![i64::from(run), condition.as_str()],
            parse_node_row,
        )?;
        let nodes = collect_rows(rows)
            .with_context(|| format!("failed to read {condition} nodes of run {run}"))?;

        let mut stmt = self.conn.prepare(
            "SELECT from_id, to_id
             FROM edges
             WHERE run = ?1 AND condition = ?2
             ORDER BY from_id ASC, to_id ASC",
        )?;
        let rows = stmt.query_map(params![i64::from(run), condition.as_str()], |row| {
            Ok(Edge {
                from: row.get(0)?,
                to: row.get(1)?,
            })
        })?;
        let edges = collect_rows(rows)
            .with_context(|| format!("failed to read {condition} edges of run {run}"))?;

        Ok((nodes, edges))
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl GraphStore for SqliteProvenanceStore {
    fn query(&self, pattern: &Pattern) -> std::result::Result<Vec<Row>, QueryError> {
        evaluate(pattern, |run, condition| {
            let (nodes, edges) = self.graph_parts(run, condition).map_err(query_error)?;
            Ok(ProvenanceGraph::from_parts(nodes, edges)?)
        })
    }
}

/// Rows that fail to decode are malformed data; everything else is a store
/// failure.
fn query_error(err: anyhow::Error) -> QueryError {
    let undecodable = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(
                rusqlite::Error::FromSqlConversionFailure(..)
                    | rusqlite::Error::InvalidColumnType(..)
                    | rusqlite::Error::IntegralValueOutOfRange(..)
            )
        )
    });
    if undecodable {
        QueryError::Malformed(format!("{err:#}"))
    } else {
        QueryError::Store(format!("{err:#}"))
    }
}

fn replace_graph(
    tx: &Transaction<'_>,
    run: u32,
    condition: Condition,
    graph: &ProvenanceGraph,
) -> Result<GraphSummary> {
    let run_key = i64::from(run);
    tx.execute(
        "DELETE FROM edges WHERE run = ?1 AND condition = ?2",
        params![run_key, condition.as_str()],
    )
    .with_context(|| format!("failed to clear {condition} edges of run {run}"))?;
    tx.execute(
        "DELETE FROM nodes WHERE run = ?1 AND condition = ?2",
        params![run_key, condition.as_str()],
    )
    .with_context(|| format!("failed to clear {condition} nodes of run {run}"))?;

    let mut insert_node = tx.prepare(
        "INSERT INTO nodes(run, condition, node_id, kind, label, table_name, rule_type, time, condition_holds)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let mut nodes = 0_usize;
    for node in graph.nodes() {
        let (rule_type, time, holds) = match node {
            Node::Rule(rule) => (Some(rule.rule_type.as_str()), None, None),
            Node::Goal(goal) => (
                None,
                Some(goal.time.as_str()),
                Some(bool_to_sql(goal.condition_holds)),
            ),
        };
        insert_node
            .execute(params![
                run_key,
                condition.as_str(),
                node.id(),
                node.kind(),
                node.label(),
                node.table(),
                rule_type,
                time,
                holds,
            ])
            .with_context(|| format!("failed to insert node {} of run {run}", node.id()))?;
        nodes += 1;
    }

    let mut insert_edge = tx.prepare(
        "INSERT INTO edges(run, condition, from_id, to_id) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut edges = 0_usize;
    for edge in graph.edges() {
        insert_edge
            .execute(params![run_key, condition.as_str(), edge.from, edge.to])
            .with_context(|| {
                format!("failed to insert edge {} -> {} of run {run}", edge.from, edge.to)
            })?;
        edges += 1;
    }

    Ok(GraphSummary {
        run,
        condition,
        nodes,
        edges,
    })
}

fn parse_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let run_i64: i64 = row.get(0)?;
    let failure_spec_raw: Option<String> = row.get(2)?;

    let failure_spec = failure_spec_raw
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| invalid_data(2, rusqlite::types::Type::Text, format!("invalid failure_spec_json: {err}")))?;

    Ok(RunRecord {
        run: to_u32(0, run_i64, "run")?,
        status: row.get(1)?,
        failure_spec,
        messages: Vec::new(),
    })
}

fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let send_time: i64 = row.get(3)?;
    let recv_time: i64 = row.get(4)?;
    Ok(Message {
        content: row.get(0)?,
        send_node: row.get(1)?,
        recv_node: row.get(2)?,
        send_time: to_u32(3, send_time, "send_time")?,
        recv_time: to_u32(4, recv_time, "recv_time")?,
    })
}

fn parse_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let kind: String = row.get(1)?;
    match kind.as_str() {
        "rule" => {
            let rule_type_raw: Option<String> = row.get(4)?;
            let rule_type = rule_type_raw
                .as_deref()
                .and_then(RuleType::parse)
                .ok_or_else(|| {
                    invalid_data(
                        4,
                        rusqlite::types::Type::Text,
                        format!("invalid rule_type: {rule_type_raw:?}"),
                    )
                })?;
            Ok(Node::Rule(Rule {
                id: row.get(0)?,
                label: row.get(2)?,
                table: row.get(3)?,
                rule_type,
            }))
        }
        "goal" => {
            let time: Option<String> = row.get(5)?;
            let holds: Option<i64> = row.get(6)?;
            Ok(Node::Goal(Goal {
                id: row.get(0)?,
                label: row.get(2)?,
                table: row.get(3)?,
                time: time.ok_or_else(|| {
                    invalid_data(5, rusqlite::types::Type::Null, "goal without time".to_string())
                })?,
                condition_holds: holds.map(|value| value != 0).ok_or_else(|| {
                    invalid_data(
                        6,
                        rusqlite::types::Type::Null,
                        "goal without condition_holds".to_string(),
                    )
                })?,
                sender: None,
                receiver: None,
            }))
        }
        other => Err(invalid_data(
            1,
            rusqlite::types::Type::Text,
            format!("invalid node kind: {other}"),
        )),
    }
}

fn parse_differential_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DifferentialSummary> {
    let mode_raw: String = row.get(1)?;
    let mode = DiffMode::parse(&mode_raw).ok_or_else(|| {
        invalid_data(
            1,
            rusqlite::types::Type::Text,
            format!("invalid mode: {mode_raw}"),
        )
    })?;
    let nodes: i64 = row.get(4)?;
    let edges: i64 = row.get(5)?;

    Ok(DifferentialSummary {
        run: to_u32(0, row.get(0)?, "run")?,
        mode,
        baseline_run: to_u32(2, row.get(2)?, "baseline_run")?,
        failed_run: to_u32(3, row.get(3)?, "failed_run")?,
        nodes: to_usize(4, nodes, "node_count")?,
        edges: to_usize(5, edges, "edge_count")?,
    })
}

fn to_u32(column: usize, raw: i64, name: &str) -> rusqlite::Result<u32> {
    u32::try_from(raw).map_err(|_| {
        invalid_data(
            column,
            rusqlite::types::Type::Integer,
            format!("invalid {name}: {raw}"),
        )
    })
}

fn to_usize(column: usize, raw: i64, name: &str) -> rusqlite::Result<usize> {
    usize::try_from(raw).map_err(|_| {
        invalid_data(
            column,
            rusqlite::types::Type::Integer,
            format!("invalid {name}: {raw}"),
        )
    })
}

fn invalid_data(column: usize, kind: rusqlite::types::Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| anyhow!("failed to format timestamp: {err}"))
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
