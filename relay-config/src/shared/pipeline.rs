use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for a relay replication pipeline.
///
/// A pipeline is identified by its id and name; stages carry their own
/// [`crate::shared::StageConfig`] sections and are assembled in code.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// The unique identifier for this pipeline.
    ///
    /// The id isolates pipelines from one another in logs and progress
    /// reporting when several run inside one process.
    pub id: u64,
    /// Human-readable pipeline name, used as a logging prefix.
    pub name: String,
}

impl PipelineConfig {
    /// Validates pipeline configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::PipelineNameEmpty);
        }

        Ok(())
    }
}
