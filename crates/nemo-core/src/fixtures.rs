#![allow(clippy::missing_panics_doc)]

use crate::graph::ProvenanceGraph;
use crate::model::{
    goal_receiver, strip_prov_suffix, CorrectionsPair, Edge, Goal, Node, Rule, RuleType,
};

pub fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("expected Ok(..), got error: {err}"),
    }
}

pub fn rule(id: &str, label: &str, rule_type: RuleType) -> Node {
    Node::Rule(Rule {
        id: id.to_string(),
        label: label.to_string(),
        table: strip_prov_suffix(label).to_string(),
        rule_type,
    })
}

/// Goal whose table is the label up to the first parenthesis.
pub fn goal(id: &str, label: &str, time: &str, holds: bool) -> Node {
    let table = label.split('(').next().unwrap_or(label);
    Node::Goal(Goal {
        id: id.to_string(),
        label: label.to_string(),
        table: table.to_string(),
        time: time.to_string(),
        condition_holds: holds,
        sender: None,
        receiver: None,
    })
}

pub fn edge(from: &str, to: &str) -> Edge {
    Edge {
        from: from.to_string(),
        to: to.to_string(),
    }
}

pub fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> ProvenanceGraph {
    must_ok(ProvenanceGraph::from_parts(nodes, edges))
}

/// Async pair as produced by the async-event finder.
pub fn async_pair(
    rule_label: &str,
    goal_label: &str,
    time: &str,
    sender: Option<&str>,
) -> CorrectionsPair {
    let Node::Rule(async_rule) = rule(&format!("r-{rule_label}"), rule_label, RuleType::Async)
    else {
        panic!("fixture rule is not a rule");
    };
    let Node::Goal(mut produced) = goal(&format!("g-{goal_label}"), goal_label, time, true) else {
        panic!("fixture goal is not a goal");
    };
    produced.receiver = Some(goal_receiver(&produced.label, &produced.table));
    produced.sender = sender.map(str::to_string);
    CorrectionsPair {
        rule: async_rule,
        goal: produced,
    }
}
