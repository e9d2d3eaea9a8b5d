use std::sync::Arc;

use crate::progress::StageProgressTracker;
use crate::stage::group::TaskGroupState;
use crate::types::{ControlEvent, DataEvent, Event, TaskId};

/// The schedule's verdict on how a worker should handle the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Filter and apply the event.
    Proceed,
    /// Update position bookkeeping only, no commit, and fetch the next event.
    ContinueNext,
    /// Update position and force a commit, then fetch the next event.
    ContinueNextCommit,
    /// Update position and exit the worker loop.
    Quit,
}

/// Per-worker policy deciding what to do with each extracted event.
///
/// The transition function is stateless: every event is evaluated fresh
/// against the tracker's skip and cancellation state.
#[derive(Debug)]
pub struct Schedule {
    tracker: Arc<StageProgressTracker>,
    group: Arc<TaskGroupState>,
    task_id: TaskId,
}

impl Schedule {
    pub(crate) fn new(
        tracker: Arc<StageProgressTracker>,
        group: Arc<TaskGroupState>,
        task_id: TaskId,
    ) -> Self {
        Self {
            tracker,
            group,
            task_id,
        }
    }

    /// Decides the disposition for the next extracted event.
    pub fn advise(&self, event: &Event) -> Disposition {
        match event {
            Event::Data(data_event) => {
                if data_event.is_filtered_range() {
                    // A span already dropped upstream only moves the position.
                    Disposition::ContinueNext
                } else if self.tracker.skip(data_event) {
                    Disposition::ContinueNextCommit
                } else {
                    Disposition::Proceed
                }
            }
            Event::Control(ControlEvent::Stop) => Disposition::Quit,
            Event::Control(ControlEvent::Sync(position)) => {
                self.tracker
                    .set_last_processed_event(self.task_id, position.clone());
                Disposition::ContinueNext
            }
        }
    }

    /// Returns true if this worker has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.tracker.is_cancelled(self.task_id)
    }

    /// Records the last event this worker fully processed.
    pub fn set_last_processed_event(&self, event: DataEvent) {
        self.tracker.set_last_processed_event(self.task_id, event);
    }

    /// Flags this worker for cancellation.
    pub fn cancel(&self) {
        self.tracker.cancel(self.task_id);
    }

    /// Deregisters this worker from its task group.
    ///
    /// Once every worker has ended, stage-level shutdown can complete.
    pub fn task_end(&self) {
        self.group.report_task_end();
    }
}
