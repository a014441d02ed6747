use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::error::{DebugError, ErrorContext, Stage};
use crate::model::{goal_receiver, strip_prov_suffix, Condition, CorrectionsPair, Message, Node};
use crate::query::{query_rows, GraphStore, Pattern, Row};

/// Non-branching message-passing events of one failed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AsyncEvents {
    /// Required by the failed run's precondition provenance.
    pub pre: Vec<CorrectionsPair>,
    /// Present in the differential postcondition provenance.
    pub diff: Vec<CorrectionsPair>,
}

/// Finds async events in the precondition provenance of `failed_run` and in
/// its differential postcondition provenance.
///
/// # Errors
/// Returns [`DebugError`] when a query fails or a row is malformed.
pub fn find_async_events<S>(
    store: &S,
    config: &AnalysisConfig,
    failed_run: u32,
    messages: &[Message],
) -> Result<AsyncEvents, DebugError>
where
    S: GraphStore + ?Sized,
{
    let pre = chain_pairs(
        store,
        ErrorContext::new(Stage::PreAsyncEvents, failed_run, Condition::Pre),
        Some(messages),
    )?;

    let diff_run = config.diff_run_id(config.diff_mode, failed_run)?;
    let diff_messages = if config.resolve_diff_senders {
        Some(messages)
    } else {
        None
    };
    let diff = chain_pairs(
        store,
        ErrorContext::new(Stage::DiffAsyncEvents, diff_run, Condition::Post),
        diff_messages,
    )?;

    tracing::info!(
        failed_run,
        diff_run,
        pre = pre.len(),
        diff = diff.len(),
        "async events collected"
    );

    Ok(AsyncEvents { pre, diff })
}

fn chain_pairs<S>(
    store: &S,
    ctx: ErrorContext,
    messages: Option<&[Message]>,
) -> Result<Vec<CorrectionsPair>, DebugError>
where
    S: GraphStore + ?Sized,
{
    let rows = query_rows(
        store,
        &Pattern::AsyncChains {
            run: ctx.run,
            condition: ctx.condition,
        },
        ctx,
    )?;

    let mut keyed = Vec::new();
    for row in rows {
        let chain = match row {
            Row::Chain(chain) => chain,
            other => {
                return Err(ctx.malformed(format!(
                    "expected a chain row, got a {} row",
                    other.kind()
                )))
            }
        };

        // Subsumed: reachable through more than one async predecessor path.
        if chain.history.len() != 1 {
            continue;
        }

        let mut rule = match chain.rule {
            Node::Rule(rule) => rule,
            Node::Goal(goal) => {
                return Err(ctx.malformed(format!(
                    "chain rule position holds goal {}",
                    goal.id
                )))
            }
        };
        let mut goal = match chain.goal {
            Node::Goal(goal) => goal,
            Node::Rule(rule) => {
                return Err(ctx.malformed(format!(
                    "chain goal position holds rule {}",
                    rule.id
                )))
            }
        };

        rule.label = strip_prov_suffix(&rule.label).to_string();
        let time = goal.logical_time().map_err(|err| {
            ctx.malformed(format!("goal {} has invalid time {:?}: {err}", goal.id, goal.time))
        })?;
        let receiver = goal_receiver(&goal.label, &goal.table);

        if let Some(log) = messages {
            goal.sender = resolve_sender(log, &rule.label, &receiver, time);
        }
        goal.receiver = Some(receiver);

        keyed.push((time, CorrectionsPair { rule, goal }));
    }

    keyed.sort_by(|(lhs_time, lhs), (rhs_time, rhs)| {
        lhs_time
            .cmp(rhs_time)
            .then_with(|| lhs.rule.label.cmp(&rhs.rule.label))
            .then_with(|| lhs.goal.label.cmp(&rhs.goal.label))
            .then_with(|| lhs.goal.id.cmp(&rhs.goal.id))
    });

    Ok(keyed.into_iter().map(|(_, pair)| pair).collect())
}

/// Originator of the message carrying `content` that reached `receiver` at
/// `time`. When several messages match, the last one in log order wins.
#[must_use]
pub fn resolve_sender(
    messages: &[Message],
    content: &str,
    receiver: &str,
    time: u32,
) -> Option<String> {
    let matching: Vec<&Message> = messages
        .iter()
        .filter(|message| {
            message.content == content
                && message.recv_node == receiver
                && message.recv_time == time
        })
        .collect();

    let last = matching.last()?;
    if matching.iter().any(|other| other.send_node != last.send_node) {
        tracing::warn!(
            content,
            receiver,
            time,
            "several senders match one async goal; using the last logged"
        );
    }
    Some(last.send_node.clone())
}
