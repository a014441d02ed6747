use serde::{Deserialize, Serialize};

use crate::error::DebugError;

/// Which side is subtracted when materializing differential provenance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Baseline post-provenance minus the failed run's.
    GoodMinusFailed,
    /// Failed post-provenance minus the baseline's.
    FailedMinusGood,
}

impl DiffMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoodMinusFailed => "good_minus_failed",
            Self::FailedMinusGood => "failed_minus_good",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "good_minus_failed" => Some(Self::GoodMinusFailed),
            "failed_minus_good" => Some(Self::FailedMinusGood),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Successful run used as witness and comparison baseline.
    pub baseline_run: u32,
    /// Differential graph consulted by the async-event finder.
    pub diff_mode: DiffMode,
    pub good_minus_failed_offset: u32,
    pub failed_minus_good_offset: u32,
    /// Cross-reference the message log for differential async goals too.
    pub resolve_diff_senders: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::v1()
    }
}

impl AnalysisConfig {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            baseline_run: 0,
            diff_mode: DiffMode::GoodMinusFailed,
            good_minus_failed_offset: 2000,
            failed_minus_good_offset: 1000,
            resolve_diff_senders: false,
        }
    }

    #[must_use]
    pub fn offset(&self, mode: DiffMode) -> u32 {
        match mode {
            DiffMode::GoodMinusFailed => self.good_minus_failed_offset,
            DiffMode::FailedMinusGood => self.failed_minus_good_offset,
        }
    }

    /// Run id the differential graph of `failed_run` is stored under.
    ///
    /// # Errors
    /// Returns [`DebugError::Configuration`] when the id would overflow or
    /// collide with the other mode's id range.
    pub fn diff_run_id(&self, mode: DiffMode, failed_run: u32) -> Result<u32, DebugError> {
        let smallest = self
            .good_minus_failed_offset
            .min(self.failed_minus_good_offset);
        let largest = self
            .good_minus_failed_offset
            .max(self.failed_minus_good_offset);
        if failed_run >= largest - smallest || failed_run >= smallest {
            return Err(DebugError::Configuration(format!(
                "run {failed_run} does not fit below the differential offsets {smallest}/{largest}"
            )));
        }
        self.offset(mode).checked_add(failed_run).ok_or_else(|| {
            DebugError::Configuration(format!(
                "differential run id for run {failed_run} overflows"
            ))
        })
    }

    /// Validates the offsets against each other and the baseline run.
    ///
    /// # Errors
    /// Returns [`DebugError::Configuration`] when offsets are zero, equal, or
    /// would place the baseline inside a differential id range.
    pub fn validate(&self) -> Result<(), DebugError> {
        if self.good_minus_failed_offset == 0 || self.failed_minus_good_offset == 0 {
            return Err(DebugError::Configuration(
                "differential offsets MUST be > 0".to_string(),
            ));
        }

        if self.good_minus_failed_offset == self.failed_minus_good_offset {
            return Err(DebugError::Configuration(
                "differential offsets MUST differ between modes".to_string(),
            ));
        }

        let smallest = self
            .good_minus_failed_offset
            .min(self.failed_minus_good_offset);
        if self.baseline_run >= smallest {
            return Err(DebugError::Configuration(format!(
                "baseline_run MUST be < {smallest}"
            )));
        }

        Ok(())
    }

    /// Parses a configuration from JSON and validates it.
    ///
    /// # Errors
    /// Returns [`DebugError::Configuration`] for invalid JSON or values.
    pub fn from_json(value: &str) -> Result<Self, DebugError> {
        let config: Self = serde_json::from_str(value)
            .map_err(|err| DebugError::Configuration(format!("invalid config JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }
}
