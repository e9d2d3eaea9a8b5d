use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinSet;
use tracing::{Instrument, debug, info_span};

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;
use crate::types::TaskId;

/// Shared bookkeeping for the workers of one stage.
///
/// Workers deregister themselves through their schedule when they end; the
/// stage is shut down once the active count reaches zero.
#[derive(Debug, Default)]
pub struct TaskGroupState {
    active: AtomicUsize,
}

impl TaskGroupState {
    pub(crate) fn report_task_start(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn report_task_end(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Owns the spawned worker tasks of one stage.
///
/// Workers are addressed only by their dense integer task id; no component
/// outside the worker itself holds a reference into its private plugin chain.
#[derive(Debug)]
pub(crate) struct StageTaskGroup {
    state: Arc<TaskGroupState>,
    join_set: JoinSet<()>,
}

impl StageTaskGroup {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TaskGroupState::default()),
            join_set: JoinSet::new(),
        }
    }

    pub fn state(&self) -> Arc<TaskGroupState> {
        self.state.clone()
    }

    /// Spawns one worker future under the stage's tracing span.
    pub fn spawn<F>(&mut self, stage_name: &str, task_id: TaskId, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.report_task_start();

        let span = info_span!("stage_task", stage = %stage_name, task_id);
        self.join_set.spawn(worker.instrument(span));

        debug!(stage = %stage_name, task_id, "spawned stage task");
    }

    /// Returns true once every worker has ended.
    pub fn is_shutdown(&self) -> bool {
        self.state.active_count() == 0
    }

    /// Waits for all workers to finish, collecting panics as errors.
    pub async fn wait_all(&mut self) -> RelayResult<()> {
        let mut errors = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            if let Err(join_err) = result {
                if join_err.is_cancelled() {
                    debug!("stage task was cancelled");
                } else {
                    errors.push(relay_error!(
                        ErrorKind::TaskPanic,
                        "Stage task panicked",
                        source: join_err
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}
