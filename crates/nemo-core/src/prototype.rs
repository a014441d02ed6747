use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::error::{DebugError, ErrorContext, Stage};
use crate::graph::Subgraph;
use crate::model::Condition;
use crate::query::{query_rows, GraphStore, Pattern, Row};

/// Goal labels common to every iteration that achieved its condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prototype {
    pub labels: BTreeSet<String>,
    pub iterations: usize,
    pub achieved: usize,
}

/// Intersects the achieved `post` goal labels of `iterations`.
///
/// An iteration without any achieved label is counted in `iterations` but
/// does not participate in the intersection.
///
/// # Errors
/// Returns [`DebugError`] when a query fails or returns a row that is not a
/// label list.
pub fn extract_prototype<S>(
    store: &S,
    config: &AnalysisConfig,
    iterations: &[u32],
) -> Result<Prototype, DebugError>
where
    S: GraphStore + ?Sized,
{
    tracing::info!(iterations = iterations.len(), "extracting success prototype");

    let mut achieved = 0_usize;
    let mut occurrences: BTreeMap<String, usize> = BTreeMap::new();

    for run in iterations.iter().copied() {
        let ctx = ErrorContext::new(Stage::Prototype, run, Condition::Post);
        let rows = query_rows(
            store,
            &Pattern::AchievedGoalLabels {
                run,
                witness_run: config.baseline_run,
            },
            ctx,
        )?;

        let mut labels = BTreeSet::new();
        for row in rows {
            match row {
                Row::Labels(found) => labels.extend(found),
                other => {
                    return Err(ctx.malformed(format!(
                        "expected a label row, got a {} row",
                        other.kind()
                    )))
                }
            }
        }

        if labels.is_empty() {
            tracing::debug!(run, "iteration did not achieve its condition");
            continue;
        }

        achieved += 1;
        for label in labels {
            *occurrences.entry(label).or_insert(0) += 1;
        }
    }

    let labels = occurrences
        .into_iter()
        .filter(|(_, count)| *count == achieved)
        .map(|(label, _)| label)
        .collect::<BTreeSet<_>>();

    tracing::info!(
        labels = labels.len(),
        achieved,
        "success prototype extracted"
    );

    Ok(Prototype {
        labels,
        iterations: iterations.len(),
        achieved,
    })
}

/// Extracts the `post` subgraph of `run` spanned by the prototype labels.
///
/// # Errors
/// Returns [`DebugError`] when the query fails or does not return exactly
/// one subgraph row.
pub fn export_prototype<S>(store: &S, run: u32, prototype: &Prototype) -> Result<Subgraph, DebugError>
where
    S: GraphStore + ?Sized,
{
    let ctx = ErrorContext::new(Stage::PrototypeExport, run, Condition::Post);
    let rows = query_rows(
        store,
        &Pattern::PrototypeSubgraph {
            run,
            labels: prototype.labels.clone(),
        },
        ctx,
    )?;

    let mut rows = rows.into_iter();
    match (rows.next(), rows.next()) {
        (Some(Row::Subgraph(subgraph)), None) => Ok(subgraph),
        (Some(other), None) => Err(ctx.malformed(format!(
            "expected a subgraph row, got a {} row",
            other.kind()
        ))),
        _ => Err(ctx.malformed("expected exactly one subgraph row")),
    }
}
