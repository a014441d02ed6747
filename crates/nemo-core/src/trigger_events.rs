use serde::{Deserialize, Serialize};

use crate::error::{DebugError, ErrorContext, Stage};
use crate::model::{goal_receiver, strip_prov_suffix, Condition, CorrectionsPair, Node, Rule};
use crate::query::{query_rows, GraphStore, Pattern, Row};

/// Condition-firing aggregation rules and the rules that tipped a holding
/// goal over into a non-holding one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerEvents {
    pub aggregations: Vec<Rule>,
    pub triggers: Vec<CorrectionsPair>,
}

/// # Errors
/// Returns [`DebugError`] when the query fails or a row holds an unexpected
/// node variant.
pub fn find_trigger_events<S>(
    store: &S,
    run: u32,
    condition: Condition,
) -> Result<TriggerEvents, DebugError>
where
    S: GraphStore + ?Sized,
{
    let ctx = ErrorContext::new(Stage::TriggerEvents, run, condition);
    let rows = query_rows(store, &Pattern::TriggerTriples { run, condition }, ctx)?;

    let mut events = TriggerEvents::default();
    let mut keyed = Vec::new();
    for row in rows {
        let triple = match row {
            Row::Trigger(triple) => triple,
            other => {
                return Err(ctx.malformed(format!(
                    "expected a trigger row, got a {} row",
                    other.kind()
                )))
            }
        };

        let mut aggregation = expect_rule(ctx, triple.aggregation, "aggregation")?;
        let mut rule = expect_rule(ctx, triple.rule, "rule")?;
        let Node::Goal(mut goal) = triple.goal else {
            return Err(ctx.malformed("trigger goal position holds a rule"));
        };

        let time = goal.logical_time().map_err(|err| {
            ctx.malformed(format!("goal {} has invalid time {:?}: {err}", goal.id, goal.time))
        })?;
        aggregation.table = strip_prov_suffix(&aggregation.label).to_string();
        rule.table = strip_prov_suffix(&rule.label).to_string();
        goal.receiver = Some(goal_receiver(&goal.label, &goal.table));

        events.aggregations.push(aggregation);
        keyed.push((time, CorrectionsPair { rule, goal }));
    }

    events.aggregations.sort_by(|lhs, rhs| {
        lhs.table
            .cmp(&rhs.table)
            .then_with(|| lhs.id.cmp(&rhs.id))
    });
    keyed.sort_by(|(lhs_time, lhs), (rhs_time, rhs)| {
        lhs.rule
            .table
            .cmp(&rhs.rule.table)
            .then_with(|| lhs_time.cmp(rhs_time))
            .then_with(|| lhs.goal.label.cmp(&rhs.goal.label))
    });
    events.triggers = keyed.into_iter().map(|(_, pair)| pair).collect();

    tracing::info!(
        run,
        condition = %condition,
        aggregations = events.aggregations.len(),
        triggers = events.triggers.len(),
        "trigger events collected"
    );

    Ok(events)
}

fn expect_rule(ctx: ErrorContext, node: Node, position: &str) -> Result<Rule, DebugError> {
    match node {
        Node::Rule(rule) => Ok(rule),
        Node::Goal(goal) => Err(ctx.malformed(format!(
            "trigger {position} position holds goal {}",
            goal.id
        ))),
    }
}
