//! Stage composition: a pool of parallel worker tasks plus the progress
//! tracker that synchronizes them.

mod group;
pub mod schedule;
mod task;

pub use schedule::{Disposition, Schedule};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_config::shared::StageConfig;
use tracing::info;

use crate::concurrency::signal::{SignalTx, create_signal};
use crate::error::{ErrorKind, RelayResult};
use crate::notifications::NotificationTx;
use crate::plugins::StagePlugins;
use crate::progress::{ShardProgressSnapshot, StageProgressTracker, TaskProgressSnapshot};
use crate::stage::group::StageTaskGroup;
use crate::stage::task::StageTask;
use crate::watch::EventWatch;
use crate::{bail, relay_error};

/// A single replication processing stage: extract, filter, and apply,
/// executed by one or more parallel worker tasks.
///
/// The stage owns exactly one [`StageProgressTracker`] and one task group.
/// Worker tasks share plugin *specifications*; each task instantiates its own
/// extractor, filter chain, and applier, so no plugin instance crosses worker
/// boundaries.
#[derive(Debug)]
pub struct Stage {
    name: String,
    config: StageConfig,
    plugins: StagePlugins,
    tracker: Arc<StageProgressTracker>,
    group: StageTaskGroup,
    wake: SignalTx,
    notifications: NotificationTx,
    started: bool,
}

impl Stage {
    /// Creates a stage from its configuration and plugin wiring.
    ///
    /// Fails when the configuration is invalid (for example a task count of
    /// zero).
    pub fn new(
        name: &str,
        config: StageConfig,
        plugins: StagePlugins,
        notifications: NotificationTx,
    ) -> RelayResult<Self> {
        if let Err(err) = config.validate(name) {
            return Err(relay_error!(
                ErrorKind::ConfigError,
                "Invalid stage configuration",
                err.to_string()
            ));
        }

        let tracker = Arc::new(StageProgressTracker::new(name, config.task_count));
        let (wake, _) = create_signal();

        Ok(Self {
            name: name.to_string(),
            config,
            plugins,
            tracker,
            group: StageTaskGroup::new(),
            wake,
            notifications,
            started: false,
        })
    }

    /// Name of this stage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parallel worker tasks.
    pub fn task_count(&self) -> usize {
        self.config.task_count
    }

    /// Starts the worker tasks that implement this stage.
    pub fn start(&mut self) -> RelayResult<()> {
        if self.started {
            bail!(
                ErrorKind::InvalidState,
                "Stage is already started",
                format!("stage={}", self.name)
            );
        }

        info!(
            stage = %self.name,
            task_count = self.config.task_count,
            "starting stage"
        );

        // Seed skip directives before any worker can observe events.
        self.tracker.set_skip_count(self.config.apply_skip_count);
        self.tracker.set_skip_seqnos(self.config.skip_seqnos.clone());
        self.tracker.set_log_interval(self.config.log_interval);

        for task_id in 0..self.config.task_count {
            let schedule = Schedule::new(self.tracker.clone(), self.group.state(), task_id);
            let extractor = (self.plugins.extractor)(task_id);
            let filters = self
                .plugins
                .filters
                .iter()
                .map(|factory| factory(task_id))
                .collect();
            let applier = (self.plugins.applier)(task_id);

            let task = StageTask::new(
                self.name.clone(),
                task_id,
                self.config.clone(),
                self.tracker.clone(),
                schedule,
                extractor,
                filters,
                applier,
                self.notifications.clone(),
                self.wake.subscribe(),
            );
            self.group.spawn(&self.name, task_id, task.run());
        }

        self.started = true;
        Ok(())
    }

    /// Shuts down the worker tasks.
    ///
    /// With `immediate` set, workers blocked inside the extractor are woken
    /// and roll back their uncommitted work; otherwise each worker stops at
    /// its next loop boundary.
    pub fn shutdown(&self, immediate: bool) {
        self.controller().shutdown(immediate);
    }

    /// Returns true once every worker task has ended.
    pub fn is_shutdown(&self) -> bool {
        self.group.is_shutdown()
    }

    /// Waits for all worker tasks to finish.
    pub async fn wait(&mut self) -> RelayResult<()> {
        self.group.wait_all().await
    }

    /// Shuts down, waits for the workers, and drains the tracker.
    ///
    /// All pending watches are cancelled so no caller keeps waiting on a
    /// stage that will never make further progress.
    pub async fn release(&mut self) -> RelayResult<()> {
        self.shutdown(true);
        let result = self.group.wait_all().await;
        self.tracker.release();
        result
    }

    /// Sets a watch for a particular sequence number to be processed.
    ///
    /// When `cancel_on_match` is set, workers are terminated once the watch
    /// is satisfied.
    pub fn watch_for_processed_seqno(&self, seqno: u64, cancel_on_match: bool) -> EventWatch {
        let watch = self.tracker.watch_for_processed_seqno(seqno, cancel_on_match);
        self.nudge_tasks();
        watch
    }

    /// Sets a watch for a particular native event id to be processed.
    pub fn watch_for_processed_event_id(
        &self,
        event_id: &str,
        cancel_on_match: bool,
    ) -> EventWatch {
        let watch = self
            .tracker
            .watch_for_processed_event_id(event_id, cancel_on_match);
        self.nudge_tasks();
        watch
    }

    /// Sets a watch for the next heartbeat with the given name.
    pub fn watch_for_processed_heartbeat(
        &self,
        name: &str,
        cancel_on_match: bool,
    ) -> EventWatch {
        let watch = self
            .tracker
            .watch_for_processed_heartbeat(name, cancel_on_match);
        self.nudge_tasks();
        watch
    }

    /// Sets a watch for a source commit timestamp to be processed.
    pub fn watch_for_processed_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        cancel_on_match: bool,
    ) -> EventWatch {
        let watch = self
            .tracker
            .watch_for_processed_timestamp(timestamp, cancel_on_match);
        self.nudge_tasks();
        watch
    }

    /// Returns point-in-time progress snapshots for every worker task.
    pub fn task_progress(&self) -> Vec<TaskProgressSnapshot> {
        self.tracker.task_progress()
    }

    /// Returns point-in-time progress snapshots for every shard.
    pub fn shard_progress(&self) -> Vec<ShardProgressSnapshot> {
        self.tracker.shard_progress()
    }

    /// The slowest worker's last-processed seqno, if every worker has
    /// processed at least one event.
    pub fn min_last_seqno(&self) -> Option<u64> {
        self.tracker.min_last_seqno()
    }

    /// Wakes workers blocked in extraction when a satisfied cancel-watch
    /// requires them to observe their cancellation flags.
    fn nudge_tasks(&self) {
        if self.tracker.interrupt_requested() {
            let _ = self.wake.send(());
        }
    }

    /// Builds a detached handle that can shut this stage down from another
    /// task.
    pub(crate) fn controller(&self) -> StageController {
        StageController {
            name: self.name.clone(),
            tracker: self.tracker.clone(),
            wake: self.wake.clone(),
        }
    }
}

/// Detached shutdown handle for one stage.
///
/// Used by the pipeline's shutdown monitor, which cannot borrow the stages it
/// supervises.
#[derive(Debug, Clone)]
pub(crate) struct StageController {
    name: String,
    tracker: Arc<StageProgressTracker>,
    wake: SignalTx,
}

impl StageController {
    pub(crate) fn shutdown(&self, immediate: bool) {
        info!(stage = %self.name, immediate, "shutting down stage");
        self.tracker.cancel_all();
        if immediate {
            self.tracker.request_interrupt();
            let _ = self.wake.send(());
        }
    }
}
