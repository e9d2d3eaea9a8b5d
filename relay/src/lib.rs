//! Stage execution engine for change-data-capture replication pipelines.
//!
//! A pipeline is an ordered list of stages; each stage runs a pool of parallel
//! worker tasks that extract events from a source, pass them through a filter
//! chain, and apply them to a target with durable position tracking. The
//! engine guarantees that transactions commit atomically, that cross-task
//! watches resolve only once every worker has passed the watched point, and
//! that cancellation never leaves a half-applied batch behind.

pub mod concurrency;
pub mod error;
mod macros;
pub mod notifications;
pub mod pipeline;
pub mod plugins;
pub mod progress;
pub mod stage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod watch;
