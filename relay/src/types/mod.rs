//! Core data types shared across the stage execution engine.

mod event;

pub use event::{ControlEvent, DataEvent, Event, metadata};

/// Identifier for a pipeline instance.
pub type PipelineId = u64;

/// Identifier for a worker task inside a stage, assigned densely from zero.
pub type TaskId = usize;
