//! In-memory provenance graph for a single `(run, condition)` pair.
//!
//! Holds adjacency lists in both directions and evaluates the traversal
//! shapes the analysis needs: variable-length paths from root nodes, direct
//! neighbor triples, and the subgraph spanned by a label set. Every
//! collection is ordered so that traversal results are reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::model::{Edge, Goal, Node, Rule};

/// Chain histories are only ever inspected for "exactly one entry", so path
/// multiplicities saturate here.
const HISTORY_LIMIT: usize = 2;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GraphError {
    #[error("duplicate node id {0}")]
    DuplicateNode(String),
    #[error("edge {from} -> {to} references an unknown node")]
    DanglingEdge { from: String, to: String },
    #[error("provenance graph contains a cycle through {0}")]
    Cycle(String),
}

#[derive(Debug, Clone, Default)]
pub struct ProvenanceGraph {
    nodes: BTreeMap<String, Node>,
    successors: BTreeMap<String, BTreeSet<String>>,
    predecessors: BTreeMap<String, BTreeSet<String>>,
}

/// Match of `root -[*0..]-> r1 -[*0..]-> r2`, joined with a goal `g -> r2`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainMatch {
    pub rule: Node,
    pub goal: Node,
    pub history: Vec<Node>,
}

/// Match of `a -> g -> r` where `g` holds and `r` also derives a goal that
/// does not hold.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMatch {
    pub aggregation: Node,
    pub goal: Node,
    pub rule: Node,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl ProvenanceGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from loose node and edge lists.
    ///
    /// # Errors
    /// Returns [`GraphError`] for duplicate node ids, edges that reference
    /// unknown nodes, or cyclic derivations.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.insert_node(node)?;
        }
        for edge in edges {
            graph.insert_edge(edge)?;
        }
        graph.topological_order()?;
        Ok(graph)
    }

    /// # Errors
    /// Returns [`GraphError::DuplicateNode`] when the id is already present.
    pub fn insert_node(&mut self, node: Node) -> Result<(), GraphError> {
        let id = node.id().to_string();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.successors.insert(id.clone(), BTreeSet::new());
        self.predecessors.insert(id.clone(), BTreeSet::new());
        self.nodes.insert(id, node);
        Ok(())
    }

    /// # Errors
    /// Returns [`GraphError::DanglingEdge`] when either endpoint is unknown.
    pub fn insert_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
            return Err(GraphError::DanglingEdge {
                from: edge.from,
                to: edge.to,
            });
        }
        if let Some(out) = self.successors.get_mut(&edge.from) {
            out.insert(edge.to.clone());
        }
        if let Some(incoming) = self.predecessors.get_mut(&edge.to) {
            incoming.insert(edge.from);
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn goals(&self) -> impl Iterator<Item = &Goal> {
        self.nodes.values().filter_map(Node::as_goal)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.nodes.values().filter_map(Node::as_rule)
    }

    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.successors.iter().flat_map(|(from, targets)| {
            targets.iter().map(move |to| Edge {
                from: from.clone(),
                to: to.clone(),
            })
        })
    }

    pub fn successors(&self, id: &str) -> impl Iterator<Item = &Node> {
        self.successors
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|next| self.nodes.get(next))
    }

    pub fn predecessors(&self, id: &str) -> impl Iterator<Item = &Node> {
        self.predecessors
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|prev| self.nodes.get(prev))
    }

    /// Nodes without an incoming edge.
    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.predecessors
            .iter()
            .filter(|(_, incoming)| incoming.is_empty())
            .filter_map(|(id, _)| self.nodes.get(id))
    }

    #[must_use]
    pub fn has_holding_goal(&self) -> bool {
        self.goals().any(|goal| goal.condition_holds)
    }

    /// Node ids in topological order (Kahn), roots seeded in id order.
    ///
    /// # Errors
    /// Returns [`GraphError::Cycle`] when the derivations are not acyclic.
    pub fn topological_order(&self) -> Result<Vec<&str>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .predecessors
            .iter()
            .map(|(id, incoming)| (id.as_str(), incoming.len()))
            .collect();
        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            for next in self.successors.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(next.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = in_degree
                .iter()
                .find(|(_, degree)| **degree > 0)
                .map(|(id, _)| (*id).to_string())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(order)
    }

    /// Evaluates `root -[*0..]-> r1:async -[*0..]-> r2:async`, collecting
    /// `r1` once per match, joined with every goal `g -> r2`.
    ///
    /// # Errors
    /// Returns [`GraphError::Cycle`] for cyclic graphs.
    pub fn async_chains(&self) -> Result<Vec<ChainMatch>, GraphError> {
        let order = self.topological_order()?;
        let root_paths = self.root_path_counts(&order);
        let mut matches = Vec::new();

        for target in order.iter().copied() {
            let Some(rule_node) = self.nodes.get(target) else {
                continue;
            };
            let Node::Rule(rule) = rule_node else {
                continue;
            };
            if !rule.is_async() {
                continue;
            }

            let to_target = self.path_counts_to(target, &order);
            let mut history = Vec::new();
            'collect: for candidate in order.iter().copied() {
                let Some(Node::Rule(r1)) = self.nodes.get(candidate) else {
                    continue;
                };
                if !r1.is_async() {
                    continue;
                }
                let through = to_target.get(candidate).copied().unwrap_or(0);
                let from_roots = root_paths.get(candidate).copied().unwrap_or(0);
                let multiplicity = through.saturating_mul(from_roots).min(HISTORY_LIMIT);
                for _ in 0..multiplicity {
                    if history.len() >= HISTORY_LIMIT {
                        break 'collect;
                    }
                    history.push(Node::Rule(r1.clone()));
                }
            }

            for goal in self.predecessors(target) {
                if matches!(goal, Node::Goal(_)) {
                    matches.push(ChainMatch {
                        rule: rule_node.clone(),
                        goal: goal.clone(),
                        history: history.clone(),
                    });
                }
            }
        }

        Ok(matches)
    }

    /// Evaluates `a:Rule -> g:Goal{holds} -> r:Rule` where `r -> g':Goal{!holds}`.
    #[must_use]
    pub fn trigger_triples(&self) -> Vec<TriggerMatch> {
        let mut matches = Vec::new();
        for aggregation in self.nodes.values().filter(|node| node.as_rule().is_some()) {
            for goal in self.successors(aggregation.id()) {
                let Node::Goal(holding) = goal else {
                    continue;
                };
                if !holding.condition_holds {
                    continue;
                }
                for rule in self.successors(goal.id()) {
                    if rule.as_rule().is_none() {
                        continue;
                    }
                    let tips_over = self
                        .successors(rule.id())
                        .filter_map(Node::as_goal)
                        .any(|sibling| !sibling.condition_holds);
                    if tips_over {
                        matches.push(TriggerMatch {
                            aggregation: aggregation.clone(),
                            goal: goal.clone(),
                            rule: rule.clone(),
                        });
                    }
                }
            }
        }
        matches
    }

    /// Union of all paths `r -[*0..]-> l` where `r` and `l` are goals whose
    /// label is in `labels`.
    #[must_use]
    pub fn subgraph_between(&self, labels: &BTreeSet<String>) -> Subgraph {
        let seeds: Vec<&str> = self
            .goals()
            .filter(|goal| labels.contains(&goal.label))
            .map(|goal| goal.id.as_str())
            .collect();

        let below = self.reachable(&seeds, &self.successors);
        let above = self.reachable(&seeds, &self.predecessors);
        let keep: BTreeSet<&str> = below.intersection(&above).copied().collect();

        let nodes = keep
            .iter()
            .filter_map(|id| self.nodes.get(*id).cloned())
            .collect();
        let edges = self
            .edges()
            .filter(|edge| keep.contains(edge.from.as_str()) && keep.contains(edge.to.as_str()))
            .collect();

        Subgraph { nodes, edges }
    }

    fn reachable<'a>(
        &'a self,
        seeds: &[&'a str],
        adjacency: &'a BTreeMap<String, BTreeSet<String>>,
    ) -> BTreeSet<&'a str> {
        let mut seen: BTreeSet<&str> = seeds.iter().copied().collect();
        let mut stack: Vec<&str> = seeds.to_vec();
        while let Some(id) = stack.pop() {
            for next in adjacency.get(id).into_iter().flatten() {
                if seen.insert(next.as_str()) {
                    stack.push(next.as_str());
                }
            }
        }
        seen
    }

    fn root_path_counts<'a>(&'a self, order: &[&'a str]) -> BTreeMap<&'a str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for id in order.iter().copied() {
            let incoming = self.predecessors.get(id).map_or(0, BTreeSet::len);
            let count = if incoming == 0 {
                1
            } else {
                self.predecessors
                    .get(id)
                    .into_iter()
                    .flatten()
                    .map(|prev| counts.get(prev.as_str()).copied().unwrap_or(0))
                    .fold(0_usize, usize::saturating_add)
                    .min(HISTORY_LIMIT)
            };
            counts.insert(id, count);
        }
        counts
    }

    fn path_counts_to<'a>(&'a self, target: &str, order: &[&'a str]) -> BTreeMap<&'a str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for id in order.iter().rev().copied() {
            let count = if id == target {
                1
            } else {
                self.successors
                    .get(id)
                    .into_iter()
                    .flatten()
                    .map(|next| counts.get(next.as_str()).copied().unwrap_or(0))
                    .fold(0_usize, usize::saturating_add)
                    .min(HISTORY_LIMIT)
            };
            if count > 0 {
                counts.insert(id, count);
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RuleType;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn rule(id: &str, label: &str, rule_type: RuleType) -> Node {
        Node::Rule(Rule {
            id: id.to_string(),
            label: label.to_string(),
            table: label.to_string(),
            rule_type,
        })
    }

    fn goal(id: &str, label: &str, holds: bool) -> Node {
        Node::Goal(Goal {
            id: id.to_string(),
            label: label.to_string(),
            table: "t".to_string(),
            time: "1".to_string(),
            condition_holds: holds,
            sender: None,
            receiver: None,
        })
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn rejects_dangling_edges_and_cycles() {
        let dangling = ProvenanceGraph::from_parts(vec![goal("g1", "a", true)], vec![edge("g1", "x")]);
        assert!(matches!(dangling, Err(GraphError::DanglingEdge { .. })));

        let cyclic = ProvenanceGraph::from_parts(
            vec![goal("g1", "a", true), rule("r1", "a_prov1", RuleType::Sync)],
            vec![edge("g1", "r1"), edge("r1", "g1")],
        );
        assert!(matches!(cyclic, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn single_async_rule_on_unique_path_has_single_history() {
        let graph = must_ok(ProvenanceGraph::from_parts(
            vec![
                goal("g1", "post(a)", true),
                rule("r1", "ack_prov1", RuleType::Async),
                goal("g2", "log(a)", true),
            ],
            vec![edge("g1", "r1"), edge("r1", "g2")],
        ));

        let chains = must_ok(graph.async_chains());
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].rule.id(), "r1");
        assert_eq!(chains[0].goal.id(), "g1");
        assert_eq!(chains[0].history.len(), 1);
    }

    #[test]
    fn nested_async_rules_are_subsumed() {
        let graph = must_ok(ProvenanceGraph::from_parts(
            vec![
                goal("g1", "post(a)", true),
                rule("r1", "ack_prov1", RuleType::Async),
                goal("g2", "log(a)", true),
                rule("r2", "log_prov2", RuleType::Async),
                goal("g3", "bcast(a)", true),
            ],
            vec![
                edge("g1", "r1"),
                edge("r1", "g2"),
                edge("g2", "r2"),
                edge("r2", "g3"),
            ],
        ));

        let chains = must_ok(graph.async_chains());
        let inner = chains.iter().find(|item| item.rule.id() == "r2");
        match inner {
            Some(found) => assert_eq!(found.history.len(), 2),
            None => panic!("missing chain row for r2"),
        }
    }

    #[test]
    fn diamond_reachability_counts_each_path() {
        let graph = must_ok(ProvenanceGraph::from_parts(
            vec![
                goal("top", "post(a)", true),
                rule("left", "l_prov1", RuleType::Sync),
                rule("right", "r_prov1", RuleType::Sync),
                goal("mid", "m(a)", true),
                rule("leaf", "ack_prov1", RuleType::Async),
            ],
            vec![
                edge("top", "left"),
                edge("top", "right"),
                edge("left", "mid"),
                edge("right", "mid"),
                edge("mid", "leaf"),
            ],
        ));

        let chains = must_ok(graph.async_chains());
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].history.len(), 2);
    }

    #[test]
    fn trigger_requires_false_sibling() {
        let graph = must_ok(ProvenanceGraph::from_parts(
            vec![
                rule("agg", "pre_prov0", RuleType::Sync),
                goal("g_true", "log(a, 2)", true),
                rule("r", "log_prov3", RuleType::Sync),
                goal("g_false", "log(a, 1)", false),
                rule("other", "bcast_prov4", RuleType::Sync),
                goal("g_true2", "bcast(a, 1)", true),
            ],
            vec![
                edge("agg", "g_true"),
                edge("g_true", "r"),
                edge("r", "g_false"),
                edge("agg", "g_true2"),
                edge("g_true2", "other"),
            ],
        ));

        let triggers = graph.trigger_triples();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].aggregation.id(), "agg");
        assert_eq!(triggers[0].goal.id(), "g_true");
        assert_eq!(triggers[0].rule.id(), "r");
    }

    #[test]
    fn subgraph_spans_paths_between_labeled_goals() {
        let graph = must_ok(ProvenanceGraph::from_parts(
            vec![
                goal("g1", "post(a)", true),
                rule("r1", "post_prov1", RuleType::Sync),
                goal("g2", "log(a)", true),
                rule("r2", "log_prov2", RuleType::Sync),
                goal("g3", "clock(a)", true),
            ],
            vec![
                edge("g1", "r1"),
                edge("r1", "g2"),
                edge("g2", "r2"),
                edge("r2", "g3"),
            ],
        ));

        let labels: BTreeSet<String> = ["post(a)".to_string(), "log(a)".to_string()]
            .into_iter()
            .collect();
        let subgraph = graph.subgraph_between(&labels);
        let ids: Vec<&str> = subgraph.nodes.iter().map(Node::id).collect();
        assert_eq!(ids, vec!["g1", "g2", "r1"]);
        assert_eq!(subgraph.edges, vec![edge("g1", "r1"), edge("r1", "g2")]);
    }
}
