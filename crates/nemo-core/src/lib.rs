//! Differential-provenance reasoning for debugging distributed protocols.
//!
//! Provenance graphs of a successful run and of fault-injected runs are
//! queried through [`GraphStore`]; the analysis extracts a success prototype,
//! finds async and trigger events, and synthesizes correction suggestions.

mod async_events;
mod config;
mod corrections;
mod diff;
mod error;
mod graph;
mod model;
mod prototype;
mod query;
mod suggestion;
mod trigger_events;

#[cfg(test)]
mod fixtures;

pub use async_events::{find_async_events, resolve_sender, AsyncEvents};
pub use config::{AnalysisConfig, DiffMode};
pub use corrections::{
    diagnose_run, max_time, synthesize_corrections, synthesize_structural_correction,
    RunCorrections, StructuralCorrection, NO_CORRECTIONS, STRUCTURAL_PREAMBLE,
};
pub use diff::differential;
pub use error::{DebugError, ErrorContext, Stage};
pub use graph::{ChainMatch, GraphError, ProvenanceGraph, Subgraph, TriggerMatch};
pub use model::{
    goal_receiver, strip_prov_suffix, Condition, CorrectionsPair, Dependency, Edge, Goal, Message,
    Node, Rule, RuleType,
};
pub use prototype::{export_prototype, extract_prototype, Prototype};
pub use query::{evaluate, GraphStore, MemoryGraphStore, Pattern, QueryError, Row};
pub use suggestion::{Segment, Suggestion};
pub use trigger_events::{find_trigger_events, TriggerEvents};
