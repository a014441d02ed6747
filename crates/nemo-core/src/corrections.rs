//! Correction synthesis.
//!
//! Two entry points: a structural correction relating the baseline run's
//! pre- and postcondition triggers, and per-failed-run diagnoses that relate
//! the async events a precondition required to the async events missing from
//! the differential postcondition provenance.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::async_events::{find_async_events, AsyncEvents};
use crate::config::AnalysisConfig;
use crate::error::{DebugError, ErrorContext, Stage};
use crate::model::{Condition, CorrectionsPair, Dependency, Message};
use crate::query::GraphStore;
use crate::suggestion::Suggestion;
use crate::trigger_events::find_trigger_events;

pub const STRUCTURAL_PREAMBLE: &str =
    "A fault occurred. Let's try making the protocol correct first. Change:";
pub const NO_CORRECTIONS: &str = "No correction suggestions to make!";

/// Tightening of the aggregation rule that declares the precondition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuralCorrection {
    pub aggregation: String,
    pub pre_triggers: Vec<String>,
    pub post_triggers: Vec<String>,
}

impl StructuralCorrection {
    #[must_use]
    pub fn suggestions(&self) -> Vec<Suggestion> {
        let current = self.pre_triggers.iter().map(|table| format!("{table}(...)"));
        let tightened = self
            .pre_triggers
            .iter()
            .chain(&self.post_triggers)
            .map(|table| format!("{table}(...)"));

        vec![
            Suggestion::new().plain(STRUCTURAL_PREAMBLE),
            Suggestion::new()
                .code(format!(
                    "{}(...) := {};",
                    self.aggregation,
                    current.collect::<Vec<_>>().join(", ")
                ))
                .plain(" \u{2192} ")
                .code(format!(
                    "{}(...) := {};",
                    self.aggregation,
                    tightened.collect::<Vec<_>>().join(", ")
                )),
        ]
    }
}

/// Suggestions for one failed run, in presentation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCorrections {
    pub run: u32,
    pub suggestions: Vec<Suggestion>,
}

/// Relates the baseline run's precondition triggers to its postcondition
/// triggers.
///
/// # Errors
/// Returns [`DebugError::MissingAggregation`] when the baseline precondition
/// provenance holds no aggregation rule, and any query error otherwise.
pub fn synthesize_structural_correction<S>(
    store: &S,
    config: &AnalysisConfig,
) -> Result<StructuralCorrection, DebugError>
where
    S: GraphStore + ?Sized,
{
    let run = config.baseline_run;
    let pre = find_trigger_events(store, run, Condition::Pre)?;

    let tables: BTreeSet<&str> = pre
        .aggregations
        .iter()
        .map(|aggregation| aggregation.table.as_str())
        .collect();
    let Some(aggregation) = tables.first().map(|table| (*table).to_string()) else {
        return Err(DebugError::MissingAggregation {
            run,
            condition: Condition::Pre,
        });
    };
    if tables.len() > 1 {
        tracing::warn!(
            run,
            tables = tables.len(),
            chosen = %aggregation,
            "several aggregation tables fire the precondition; using the first"
        );
    }

    let mut considered = BTreeSet::new();
    let pre_triggers = unique_tables(&pre.triggers, &mut considered);

    let post = find_trigger_events(store, run, Condition::Post)?;
    let post_triggers = unique_tables(&post.triggers, &mut considered);

    tracing::info!(
        run,
        aggregation = %aggregation,
        pre = pre_triggers.len(),
        post = post_triggers.len(),
        "structural correction synthesized"
    );

    Ok(StructuralCorrection {
        aggregation,
        pre_triggers,
        post_triggers,
    })
}

fn unique_tables(triggers: &[CorrectionsPair], considered: &mut BTreeSet<String>) -> Vec<String> {
    triggers
        .iter()
        .filter(|pair| considered.insert(pair.rule.table.clone()))
        .map(|pair| pair.rule.table.clone())
        .collect()
}

/// Diagnoses every failed run. `messages[i]` is the message log of
/// `failed_runs[i]`.
///
/// # Errors
/// Returns [`DebugError::Configuration`] when the two slices differ in length
/// and propagates the first fatal error of any run.
pub fn synthesize_corrections<S>(
    store: &S,
    config: &AnalysisConfig,
    failed_runs: &[u32],
    messages: &[Vec<Message>],
) -> Result<Vec<RunCorrections>, DebugError>
where
    S: GraphStore + ?Sized,
{
    if failed_runs.len() != messages.len() {
        return Err(DebugError::Configuration(format!(
            "{} failed runs but {} message logs",
            failed_runs.len(),
            messages.len()
        )));
    }

    tracing::info!(runs = failed_runs.len(), "synthesizing corrections");

    failed_runs
        .iter()
        .zip(messages)
        .map(|(&run, log)| {
            let events = find_async_events(store, config, run, log)?;
            let suggestions = diagnose_run(run, &events)?;
            Ok(RunCorrections { run, suggestions })
        })
        .collect()
}

/// Turns the async events of one failed run into suggestions.
///
/// # Errors
/// Returns [`DebugError::MalformedRow`] when a differential goal carries a
/// time that is not an unsigned number.
pub fn diagnose_run(run: u32, events: &AsyncEvents) -> Result<Vec<Suggestion>, DebugError> {
    let ctx = ErrorContext::new(Stage::Corrections, run, Condition::Post);
    let mut suggestions = Vec::new();

    match (events.pre.is_empty(), events.diff.is_empty()) {
        (true, true) => {
            suggestions.push(precondition().plain("No message passing events required."));
            suggestions.push(postcondition().plain("No message passing events left."));
            suggestions.push(investigate());
        }
        (true, false) => {
            suggestions.push(precondition().plain("No message passing events required."));
            suggestions.push(still_missing(&events.diff));
            suggestions.push(
                Suggestion::new()
                    .emphasis("Suggestion: Introduce more fault-tolerance through replication and retries."),
            );
        }
        (false, true) => {
            suggestions.push(required(&events.pre));
            suggestions.push(postcondition().plain("No message passing events left."));
            suggestions.push(investigate());
        }
        (false, false) => {
            suggestions.push(required(&events.pre));
            suggestions.push(still_missing(&events.diff));
            for pre in &events.pre {
                let mut deps: BTreeMap<String, Dependency> = BTreeMap::new();
                for diff in &events.diff {
                    let time = diff.goal.logical_time().map_err(|err| {
                        ctx.malformed(format!(
                            "goal {} has invalid time {:?}: {err}",
                            diff.goal.id, diff.goal.time
                        ))
                    })?;

                    let dependency = if sender_matches(pre, diff) {
                        Dependency {
                            rule: diff.rule.label.clone(),
                            time,
                        }
                    } else {
                        let ack_rule = internal_ack_rule(pre, diff);
                        suggestions.push(acknowledgement(pre, diff, &ack_rule));
                        Dependency {
                            rule: ack_rule,
                            time: time.saturating_add(1),
                        }
                    };
                    deps.insert(diff.rule.label.clone(), dependency);
                }

                let deps: Vec<Dependency> = deps.into_values().collect();
                suggestions.push(augment(pre, &deps));
                suggestions.push(timing(pre, max_time(&deps)));
            }
        }
    }

    if suggestions.is_empty() {
        suggestions.push(Suggestion::new().plain(NO_CORRECTIONS));
    }

    tracing::debug!(run, suggestions = suggestions.len(), "run diagnosed");
    Ok(suggestions)
}

/// Largest dependency time, zero when there are none.
#[must_use]
pub fn max_time<'a>(deps: impl IntoIterator<Item = &'a Dependency>) -> u32 {
    deps.into_iter().map(|dep| dep.time).max().unwrap_or(0)
}

/// An unresolved sender never matches.
fn sender_matches(pre: &CorrectionsPair, diff: &CorrectionsPair) -> bool {
    match (&pre.goal.sender, &diff.goal.receiver) {
        (Some(sender), Some(receiver)) => sender == receiver,
        _ => false,
    }
}

fn internal_ack_rule(pre: &CorrectionsPair, diff: &CorrectionsPair) -> String {
    match &pre.goal.sender {
        Some(sender) => format!("int_ack_{}_{sender}", diff.goal.table),
        None => format!("int_ack_{}", diff.goal.table),
    }
}

fn precondition() -> Suggestion {
    Suggestion::new().code("[Precondition]").plain(" ")
}

fn postcondition() -> Suggestion {
    Suggestion::new().code("[Postcondition]").plain(" ")
}

fn investigate() -> Suggestion {
    Suggestion::new()
        .plain("Yet we saw a fault occurring. ")
        .emphasis("Discuss: What are the use cases?")
}

fn required(pre: &[CorrectionsPair]) -> Suggestion {
    precondition()
        .plain("Latest message passing events required: ")
        .list(pre, event)
}

fn still_missing(diff: &[CorrectionsPair]) -> Suggestion {
    postcondition()
        .plain("Latest message passing events still missing: ")
        .list(diff, event)
}

fn event(acc: Suggestion, pair: &CorrectionsPair) -> Suggestion {
    acc.code(pair.rule.label.as_str())
        .plain(" @ ")
        .code(pair.goal.time.as_str())
}

fn acknowledgement(pre: &CorrectionsPair, diff: &CorrectionsPair, ack_rule: &str) -> Suggestion {
    let suggestion = Suggestion::new().emphasis("Suggestion:").plain(" ");
    let suggestion = match &pre.goal.sender {
        Some(sender) => suggestion.code(sender.as_str()),
        None => suggestion.plain("The unresolved sender"),
    };
    let sender_arg = pre.goal.sender.as_deref().unwrap_or("sender");

    suggestion
        .plain(" needs to know that ")
        .code(diff.goal.receiver.as_deref().unwrap_or_default())
        .plain(" received ")
        .code(diff.goal.label.as_str())
        .plain(". Add internal acknowledgement: ")
        .code(format!(
            "{ack_rule}({sender_arg}, node, ...)@async :- {}(node, ...)",
            diff.rule.label
        ))
        .plain(" @ ")
        .code(diff.goal.time.as_str())
        .plain(";")
}

fn augment(pre: &CorrectionsPair, deps: &[Dependency]) -> Suggestion {
    Suggestion::new()
        .emphasis("Suggestion:")
        .plain(" Augment the conditions under which ")
        .code(pre.rule.label.as_str())
        .plain(" fires: ")
        .code(format!(
            "{}({}, ...)@async :- ",
            pre.rule.label,
            pre.goal.receiver.as_deref().unwrap_or_default()
        ))
        .list(deps, |acc, dep| {
            acc.code(dep.rule.as_str())
                .plain(" @ ")
                .code(dep.time.to_string())
        })
        .plain(", ")
        .code("EXISTING_DEPENDENCIES")
        .plain(";")
}

fn timing(pre: &CorrectionsPair, max_time: u32) -> Suggestion {
    Suggestion::new()
        .emphasis("Timing:")
        .plain(" Earliest time for safely firing ")
        .code(pre.rule.label.as_str())
        .plain(": ")
        .code(max_time.to_string())
}
