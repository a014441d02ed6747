use std::collections::BTreeSet;

use crate::config::DiffMode;
use crate::graph::{GraphError, ProvenanceGraph};
use crate::model::{strip_prov_suffix, Goal, Node};

/// Logical identity of a goal: `(table, time, stripped label)`.
fn goal_key(goal: &Goal) -> (&str, &str, &str) {
    (
        goal.table.as_str(),
        goal.time.trim(),
        strip_prov_suffix(&goal.label),
    )
}

/// Postcondition provenance of one side minus the other's.
///
/// Goals survive when their logical identity is absent from the subtrahend.
/// Rules survive when a goal they derived survives. Edges survive when both
/// endpoints do.
///
/// # Errors
/// Returns [`GraphError`] only if the resulting node set cannot be rebuilt,
/// which would mean `baseline` or `failed` was itself invalid.
pub fn differential(
    mode: DiffMode,
    baseline: &ProvenanceGraph,
    failed: &ProvenanceGraph,
) -> Result<ProvenanceGraph, GraphError> {
    let (minuend, subtrahend) = match mode {
        DiffMode::GoodMinusFailed => (baseline, failed),
        DiffMode::FailedMinusGood => (failed, baseline),
    };

    let removed: BTreeSet<(&str, &str, &str)> = subtrahend.goals().map(goal_key).collect();

    let kept_goals: BTreeSet<&str> = minuend
        .goals()
        .filter(|goal| !removed.contains(&goal_key(goal)))
        .map(|goal| goal.id.as_str())
        .collect();

    let kept_rules: BTreeSet<&str> = minuend
        .rules()
        .filter(|rule| {
            minuend
                .predecessors(&rule.id)
                .any(|derived| kept_goals.contains(derived.id()))
        })
        .map(|rule| rule.id.as_str())
        .collect();

    let keep = |id: &str| kept_goals.contains(id) || kept_rules.contains(id);

    let nodes: Vec<Node> = minuend
        .nodes()
        .filter(|node| keep(node.id()))
        .cloned()
        .collect();
    let edges = minuend
        .edges()
        .filter(|edge| keep(&edge.from) && keep(&edge.to))
        .collect();

    tracing::debug!(
        mode = mode.as_str(),
        minuend = minuend.len(),
        kept = nodes.len(),
        "differential provenance computed"
    );

    ProvenanceGraph::from_parts(nodes, edges)
}
