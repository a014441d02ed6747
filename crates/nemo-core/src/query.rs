//! Pattern-query contract between the analysis and a graph store.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DebugError, ErrorContext};
use crate::graph::{ChainMatch, GraphError, ProvenanceGraph, Subgraph, TriggerMatch};
use crate::model::Condition;

/// Parameterized graph patterns the analysis issues. Every node matched by a
/// pattern belongs to the `(run, condition)` graph the pattern names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Labels of all `post` goals of `run`, provided the `pre` graph of
    /// `witness_run` contains a goal for which the condition holds.
    AchievedGoalLabels { run: u32, witness_run: u32 },
    /// `root -[*0..]-> r1:async -[*0..]-> r2:async` with `history = collect(r1)`,
    /// joined with every goal `g -> r2`.
    AsyncChains { run: u32, condition: Condition },
    /// `a:Rule -> g:Goal{holds} -> r:Rule` where `r` also derives a goal that
    /// does not hold.
    TriggerTriples { run: u32, condition: Condition },
    /// All `post` paths between goals whose label is in `labels`.
    PrototypeSubgraph { run: u32, labels: BTreeSet<String> },
}

impl Pattern {
    #[must_use]
    pub fn run(&self) -> u32 {
        match self {
            Self::AchievedGoalLabels { run, .. }
            | Self::AsyncChains { run, .. }
            | Self::TriggerTriples { run, .. }
            | Self::PrototypeSubgraph { run, .. } => *run,
        }
    }

    #[must_use]
    pub fn condition(&self) -> Condition {
        match self {
            Self::AchievedGoalLabels { .. } | Self::PrototypeSubgraph { .. } => Condition::Post,
            Self::AsyncChains { condition, .. } | Self::TriggerTriples { condition, .. } => {
                *condition
            }
        }
    }
}

/// Result rows. Row order carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Labels(Vec<String>),
    Chain(ChainMatch),
    Trigger(TriggerMatch),
    Subgraph(Subgraph),
}

impl Row {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Labels(_) => "labels",
            Self::Chain(_) => "chain",
            Self::Trigger(_) => "trigger",
            Self::Subgraph(_) => "subgraph",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum QueryError {
    #[error("store failure: {0}")]
    Store(String),
    /// A stored row lacks a required property or holds an invalid value.
    #[error("malformed stored row: {0}")]
    Malformed(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub trait GraphStore {
    /// Runs a pattern query and returns its rows.
    ///
    /// # Errors
    /// Returns [`QueryError::Store`] when the store cannot answer,
    /// [`QueryError::Malformed`] when a stored row cannot be decoded and
    /// [`QueryError::Graph`] when the stored provenance is not a valid graph.
    fn query(&self, pattern: &Pattern) -> Result<Vec<Row>, QueryError>;
}

/// Evaluates a pattern against graphs obtained from `load`. A run without
/// stored provenance behaves as an empty graph.
///
/// # Errors
/// Propagates loader failures and graph evaluation errors.
pub fn evaluate<F>(pattern: &Pattern, mut load: F) -> Result<Vec<Row>, QueryError>
where
    F: FnMut(u32, Condition) -> Result<ProvenanceGraph, QueryError>,
{
    match pattern {
        Pattern::AchievedGoalLabels { run, witness_run } => {
            let witness = load(*witness_run, Condition::Pre)?;
            if !witness.has_holding_goal() {
                return Ok(vec![Row::Labels(Vec::new())]);
            }
            let graph = load(*run, Condition::Post)?;
            let labels = graph.goals().map(|goal| goal.label.clone()).collect();
            Ok(vec![Row::Labels(labels)])
        }
        Pattern::AsyncChains { run, condition } => {
            let graph = load(*run, *condition)?;
            Ok(graph.async_chains()?.into_iter().map(Row::Chain).collect())
        }
        Pattern::TriggerTriples { run, condition } => {
            let graph = load(*run, *condition)?;
            Ok(graph
                .trigger_triples()
                .into_iter()
                .map(Row::Trigger)
                .collect())
        }
        Pattern::PrototypeSubgraph { run, labels } => {
            let graph = load(*run, Condition::Post)?;
            Ok(vec![Row::Subgraph(graph.subgraph_between(labels))])
        }
    }
}

/// Graph store backed by graphs held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    graphs: BTreeMap<(u32, Condition), ProvenanceGraph>,
}

impl MemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, run: u32, condition: Condition, graph: ProvenanceGraph) {
        self.graphs.insert((run, condition), graph);
    }

    #[must_use]
    pub fn graph(&self, run: u32, condition: Condition) -> Option<&ProvenanceGraph> {
        self.graphs.get(&(run, condition))
    }
}

impl GraphStore for MemoryGraphStore {
    fn query(&self, pattern: &Pattern) -> Result<Vec<Row>, QueryError> {
        evaluate(pattern, |run, condition| {
            Ok(self.graph(run, condition).cloned().unwrap_or_default())
        })
    }
}

/// Runs `pattern` and attaches `ctx` to any failure.
pub(crate) fn query_rows<S>(
    store: &S,
    pattern: &Pattern,
    ctx: ErrorContext,
) -> Result<Vec<Row>, DebugError>
where
    S: GraphStore + ?Sized,
{
    tracing::debug!(
        stage = %ctx.stage,
        run = ctx.run,
        condition = %ctx.condition,
        "issuing pattern query"
    );
    store.query(pattern).map_err(|err| match err {
        QueryError::Store(message) => ctx.store(message),
        QueryError::Malformed(message) => ctx.malformed(message),
        QueryError::Graph(graph) => ctx.malformed(graph.to_string()),
    })
}
