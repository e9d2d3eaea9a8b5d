//! Progress bookkeeping and cross-task synchronization for a stage.
//!
//! [`tracker::StageProgressTracker`] is the single synchronization point for a
//! stage: every worker reports processed events through it, watches register
//! and resolve inside its critical section, and skip/cancel state lives behind
//! the same lock. [`task::TaskProgress`] and [`shard::ShardProgress`] are pure
//! observability accumulators owned by the tracker.

pub mod shard;
pub mod task;
pub mod tracker;

pub use shard::ShardProgressSnapshot;
pub use task::{TaskPhase, TaskProgressSnapshot};
pub use tracker::StageProgressTracker;
