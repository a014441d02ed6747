use std::fmt::{Display, Formatter};

use crate::model::Condition;

/// Analysis step an error was raised in.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Stage {
    Prototype,
    PrototypeExport,
    PreAsyncEvents,
    DiffAsyncEvents,
    TriggerEvents,
    StructuralCorrection,
    Corrections,
    DiffMaterialization,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prototype => "prototype",
            Self::PrototypeExport => "prototype_export",
            Self::PreAsyncEvents => "pre_async_events",
            Self::DiffAsyncEvents => "diff_async_events",
            Self::TriggerEvents => "trigger_events",
            Self::StructuralCorrection => "structural_correction",
            Self::Corrections => "corrections",
            Self::DiffMaterialization => "diff_materialization",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DebugError {
    #[error("store error during {stage} (run {run}, condition {condition}): {message}")]
    Store {
        stage: Stage,
        run: u32,
        condition: Condition,
        message: String,
    },
    #[error("malformed provenance row during {stage} (run {run}, condition {condition}): {message}")]
    MalformedRow {
        stage: Stage,
        run: u32,
        condition: Condition,
        message: String,
    },
    #[error("no aggregation rule found for run {run}, condition {condition}")]
    MissingAggregation { run: u32, condition: Condition },
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Run/condition/stage triple attached to every error raised while
/// processing a query result.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorContext {
    pub stage: Stage,
    pub run: u32,
    pub condition: Condition,
}

impl ErrorContext {
    #[must_use]
    pub fn new(stage: Stage, run: u32, condition: Condition) -> Self {
        Self {
            stage,
            run,
            condition,
        }
    }

    pub fn store(self, message: impl Into<String>) -> DebugError {
        DebugError::Store {
            stage: self.stage,
            run: self.run,
            condition: self.condition,
            message: message.into(),
        }
    }

    pub fn malformed(self, message: impl Into<String>) -> DebugError {
        DebugError::MalformedRow {
            stage: self.stage,
            run: self.run,
            condition: self.condition,
            message: message.into(),
        }
    }
}
