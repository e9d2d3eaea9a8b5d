//! Shared configuration types for relay pipelines.

mod base;
mod pipeline;
mod stage;

pub use base::ValidationError;
pub use pipeline::PipelineConfig;
pub use stage::{FailurePolicy, StageConfig};
