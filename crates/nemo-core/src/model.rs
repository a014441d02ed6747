use std::fmt::{Display, Formatter};
use std::num::ParseIntError;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Pre,
    Post,
}

impl Condition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pre" => Some(Self::Pre),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Sync,
    Async,
}

impl RuleType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sync" => Some(Self::Sync),
            "async" => Some(Self::Async),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Rule {
    pub id: String,
    pub label: String,
    pub table: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
}

impl Rule {
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.rule_type == RuleType::Async
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Goal {
    pub id: String,
    pub label: String,
    pub table: String,
    pub time: String,
    pub condition_holds: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
}

impl Goal {
    /// Parses the synthetic logical time carried as text.
    ///
    /// # Errors
    /// Returns the integer parse error when `time` is not an unsigned number.
    pub fn logical_time(&self) -> Result<u32, ParseIntError> {
        self.time.trim().parse()
    }
}

/// Provenance node. Every consumer matches exhaustively and rejects the
/// variant it does not expect.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Rule(Rule),
    Goal(Goal),
}

impl Node {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Rule(rule) => &rule.id,
            Self::Goal(goal) => &goal.id,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Rule(rule) => &rule.label,
            Self::Goal(goal) => &goal.label,
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Rule(rule) => &rule.table,
            Self::Goal(goal) => &goal.table,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rule(_) => "rule",
            Self::Goal(_) => "goal",
        }
    }

    #[must_use]
    pub fn as_rule(&self) -> Option<&Rule> {
        match self {
            Self::Rule(rule) => Some(rule),
            Self::Goal(_) => None,
        }
    }

    #[must_use]
    pub fn as_goal(&self) -> Option<&Goal> {
        match self {
            Self::Goal(goal) => Some(goal),
            Self::Rule(_) => None,
        }
    }
}

/// Derivation edge in the fault injector's orientation: a goal points at the
/// rule instance that derived it, a rule points at the goals of its body.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// An asynchronous rule together with the goal it produced.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CorrectionsPair {
    pub rule: Rule,
    pub goal: Goal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct Dependency {
    pub rule: String,
    pub time: u32,
}

/// One entry of an execution's raw message log.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Message {
    #[serde(rename = "table")]
    pub content: String,
    #[serde(rename = "from")]
    pub send_node: String,
    #[serde(rename = "to")]
    pub recv_node: String,
    #[serde(rename = "sendTime", default)]
    pub send_time: u32,
    #[serde(rename = "receiveTime")]
    pub recv_time: u32,
}

/// Drops a trailing `_provN` instance tag. Labels without such a tag are
/// returned unchanged, which keeps the operation idempotent.
#[must_use]
pub fn strip_prov_suffix(label: &str) -> &str {
    match label.rsplit_once('_') {
        Some((head, tail)) if is_prov_tag(tail) => head,
        _ => label,
    }
}

fn is_prov_tag(tail: &str) -> bool {
    tail.strip_prefix("prov")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Extracts the receiving node of a goal: the label without its table prefix
/// and enclosing parentheses, first `", "` separated component.
#[must_use]
pub fn goal_receiver(label: &str, table: &str) -> String {
    let args = label.strip_prefix(table).unwrap_or(label);
    let args = args.trim_start_matches('(').trim_end_matches(')');
    args.split(", ").next().unwrap_or_default().to_string()
}
