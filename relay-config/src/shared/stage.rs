use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Reaction to a failing extractor or applier call.
///
/// The policy is evaluated independently for extraction and application, so a
/// stage can tolerate flaky extraction while still halting on apply failures.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Escalate the failure and stop the worker task.
    Stop,
    /// Log the failure and keep processing.
    Warn,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Stop
    }
}

const fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Stop
}

/// Configuration for a single replication stage.
///
/// Contains the settings consumed by the stage execution engine: worker
/// parallelism, block-commit batching, startup positioning, and skip
/// directives. Plugin wiring is supplied in code, not here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StageConfig {
    /// Number of parallel worker tasks for this stage.
    #[serde(default = "default_task_count")]
    pub task_count: usize,
    /// Row threshold above which batched transactions are committed as one block.
    ///
    /// A value of 1 disables block commit: every transaction commits at its
    /// final fragment.
    #[serde(default = "default_block_commit_rows")]
    pub block_commit_rows: u64,
    /// Emit an in-sequence notification as soon as each worker starts.
    #[serde(default)]
    pub auto_sync: bool,
    /// Reposition the extractor to the applier's durable last event at startup.
    #[serde(default)]
    pub sync_position_with_extractor: bool,
    /// Native event id to seek to when the applier has no stored position.
    #[serde(default)]
    pub initial_event_id: Option<String>,
    /// Number of whole transactions to silently skip after startup.
    #[serde(default)]
    pub apply_skip_count: u64,
    /// Explicit sequence numbers to silently skip.
    #[serde(default)]
    pub skip_seqnos: BTreeSet<u64>,
    /// Policy applied when extraction fails.
    #[serde(default = "default_failure_policy")]
    pub extractor_failure_policy: FailurePolicy,
    /// Policy applied when application fails.
    #[serde(default = "default_failure_policy")]
    pub applier_failure_policy: FailurePolicy,
    /// Emit a progress log line every this many processed events (0 disables).
    #[serde(default)]
    pub log_interval: u64,
}

impl StageConfig {
    /// Default worker parallelism.
    pub const DEFAULT_TASK_COUNT: usize = 1;

    /// Default block-commit row threshold (block commit disabled).
    pub const DEFAULT_BLOCK_COMMIT_ROWS: u64 = 1;

    /// Validates stage configuration settings.
    ///
    /// Ensures worker count and commit thresholds are non-zero.
    pub fn validate(&self, stage_name: &str) -> Result<(), ValidationError> {
        if self.task_count == 0 {
            return Err(ValidationError::TaskCountZero(stage_name.to_string()));
        }

        if self.block_commit_rows == 0 {
            return Err(ValidationError::BlockCommitRowsZero(stage_name.to_string()));
        }

        Ok(())
    }

    /// Returns true when block commit batching is in effect.
    pub fn uses_block_commit(&self) -> bool {
        self.block_commit_rows > 1
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            task_count: default_task_count(),
            block_commit_rows: default_block_commit_rows(),
            auto_sync: false,
            sync_position_with_extractor: false,
            initial_event_id: None,
            apply_skip_count: 0,
            skip_seqnos: BTreeSet::new(),
            extractor_failure_policy: default_failure_policy(),
            applier_failure_policy: default_failure_policy(),
            log_interval: 0,
        }
    }
}

fn default_task_count() -> usize {
    StageConfig::DEFAULT_TASK_COUNT
}

fn default_block_commit_rows() -> u64 {
    StageConfig::DEFAULT_BLOCK_COMMIT_ROWS
}
