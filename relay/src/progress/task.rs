use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::{DataEvent, TaskId};

/// Phase a worker task is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Between phases (scheduling, bookkeeping, waiting).
    Other,
    /// Blocked in or running the extractor.
    Extract,
    /// Running the filter chain.
    Filter,
    /// Applying or committing.
    Apply,
}

/// Statistics for an individual worker task, identified by task id.
///
/// Owned by the stage progress tracker and mutated only under its lock.
#[derive(Debug)]
pub struct TaskProgress {
    stage_name: String,
    task_id: TaskId,
    last_event: Option<DataEvent>,
    cancelled: bool,
    event_count: u64,
    apply_latency: Duration,
    started_at: Option<Instant>,
    total_extract: Duration,
    total_filter: Duration,
    total_apply: Duration,
    phase: TaskPhase,
    interval_started_at: Option<Instant>,
}

impl TaskProgress {
    pub(crate) fn new(stage_name: &str, task_id: TaskId) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            task_id,
            last_event: None,
            cancelled: false,
            event_count: 0,
            apply_latency: Duration::ZERO,
            started_at: None,
            total_extract: Duration::ZERO,
            total_filter: Duration::ZERO,
            total_apply: Duration::ZERO,
            phase: TaskPhase::Other,
            interval_started_at: None,
        }
    }

    /// Marks the start of task processing.
    pub(crate) fn begin(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Starts a timing interval for the given phase.
    pub(crate) fn begin_interval(&mut self, phase: TaskPhase) {
        self.phase = phase;
        self.interval_started_at = Some(Instant::now());
    }

    /// Ends the current timing interval, accumulating elapsed time into the
    /// bucket of the phase that opened it.
    pub(crate) fn end_interval(&mut self) {
        let Some(started_at) = self.interval_started_at.take() else {
            return;
        };
        let elapsed = started_at.elapsed();
        match self.phase {
            TaskPhase::Extract => self.total_extract += elapsed,
            TaskPhase::Filter => self.total_filter += elapsed,
            TaskPhase::Apply => self.total_apply += elapsed,
            TaskPhase::Other => {}
        }
        self.phase = TaskPhase::Other;
    }

    pub(crate) fn last_event(&self) -> Option<&DataEvent> {
        self.last_event.as_ref()
    }

    pub(crate) fn set_last_event(&mut self, event: DataEvent) {
        self.last_event = Some(event);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub(crate) fn increment_event_count(&mut self) {
        self.event_count += 1;
    }

    pub(crate) fn event_count(&self) -> u64 {
        self.event_count
    }

    pub(crate) fn set_apply_latency(&mut self, latency: Duration) {
        self.apply_latency = latency;
    }

    /// Wall-clock time spent outside the measured phases since the task began.
    fn total_other(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        started_at
            .elapsed()
            .saturating_sub(self.total_extract + self.total_filter + self.total_apply)
    }

    /// Produces a point-in-time snapshot for reporting.
    pub(crate) fn snapshot(&self) -> TaskProgressSnapshot {
        TaskProgressSnapshot {
            stage_name: self.stage_name.clone(),
            task_id: self.task_id,
            last_event: self.last_event.clone(),
            cancelled: self.cancelled,
            event_count: self.event_count,
            apply_latency: self.apply_latency,
            total_extract: self.total_extract,
            total_filter: self.total_filter,
            total_apply: self.total_apply,
            total_other: self.total_other(),
            phase: self.phase,
        }
    }
}

/// Point-in-time view of one worker task's progress.
///
/// Snapshots are cloned under the tracker lock, so the fields of one snapshot
/// are mutually consistent.
#[derive(Debug, Clone, Serialize)]
pub struct TaskProgressSnapshot {
    pub stage_name: String,
    pub task_id: TaskId,
    pub last_event: Option<DataEvent>,
    pub cancelled: bool,
    pub event_count: u64,
    pub apply_latency: Duration,
    pub total_extract: Duration,
    pub total_filter: Duration,
    pub total_apply: Duration,
    pub total_other: Duration,
    pub phase: TaskPhase,
}

impl TaskProgressSnapshot {
    /// Sequence number of the last processed event, if any.
    pub fn last_seqno(&self) -> Option<u64> {
        self.last_event.as_ref().map(|event| event.seqno)
    }
}
