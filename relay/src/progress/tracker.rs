use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::progress::shard::{ShardProgress, ShardProgressSnapshot};
use crate::progress::task::{TaskPhase, TaskProgress, TaskProgressSnapshot};
use crate::types::{DataEvent, TaskId};
use crate::watch::{
    EventIdReached, EventWatch, HeartbeatSeen, SeqnoReached, SourceTimestampReached, WatchManager,
    WatchPredicate,
};

/// Which watch family a registration belongs to.
#[derive(Debug, Clone, Copy)]
enum WatchKind {
    Seqno,
    EventId,
    Heartbeat,
    SourceTimestamp,
}

/// State guarded by the tracker's single lock.
#[derive(Debug)]
struct TrackerInner {
    tasks: Vec<TaskProgress>,
    shards: BTreeMap<String, ShardProgress>,
    seqno_watches: WatchManager,
    event_id_watches: WatchManager,
    heartbeat_watches: WatchManager,
    timestamp_watches: WatchManager,
    /// Set when a satisfied cancel-watch requires waking blocked workers.
    interrupt_requested: bool,
    /// Global event counter across all tasks.
    event_count: u64,
    /// Emit a progress log line every this many events (0 disables).
    log_interval: u64,
    apply_latency: Duration,
    /// Outstanding "skip next N whole transactions" counter.
    skip_count: u64,
    /// Explicit seqnos to skip; dropped once empty.
    skip_seqnos: Option<BTreeSet<u64>>,
    released: bool,
}

impl TrackerInner {
    fn min_last_event(&self) -> Option<DataEvent> {
        let mut min_event: Option<&DataEvent> = None;
        for task in &self.tasks {
            let event = task.last_event()?;
            match min_event {
                Some(current) if current.seqno <= event.seqno => {}
                _ => min_event = Some(event),
            }
        }
        min_event.cloned()
    }

    fn min_last_seqno(&self) -> Option<u64> {
        self.tasks
            .iter()
            .map(|task| task.last_event().map(|event| event.seqno))
            .min()
            .flatten()
    }

    fn cancel_all(&mut self) {
        for task in &mut self.tasks {
            task.set_cancelled(true);
        }
    }
}

/// Tracks replication progress for one stage and implements event watches.
///
/// This is the single synchronization point shared by a stage's parallel
/// worker tasks. Every operation runs inside one coarse critical section;
/// each call happens at most once per logical event per task, so contention
/// stays low. Watch futures are resolved inside the same critical section
/// that records progress, which closes the race between registering a watch
/// and the watched point being crossed on another worker.
#[derive(Debug)]
pub struct StageProgressTracker {
    stage_name: String,
    task_count: usize,
    inner: Mutex<TrackerInner>,
}

impl StageProgressTracker {
    /// Creates a tracker for `task_count` parallel workers.
    pub fn new(stage_name: &str, task_count: usize) -> Self {
        let tasks = (0..task_count)
            .map(|task_id| TaskProgress::new(stage_name, task_id))
            .collect();

        debug!(stage_name, task_count, "initiating stage progress tracker");

        Self {
            stage_name: stage_name.to_string(),
            task_count,
            inner: Mutex::new(TrackerInner {
                tasks,
                shards: BTreeMap::new(),
                seqno_watches: WatchManager::new(),
                event_id_watches: WatchManager::new(),
                heartbeat_watches: WatchManager::new(),
                timestamp_watches: WatchManager::new(),
                interrupt_requested: false,
                event_count: 0,
                log_interval: 0,
                apply_latency: Duration::ZERO,
                skip_count: 0,
                skip_seqnos: None,
                released: false,
            }),
        }
    }

    /// Name of the owning stage.
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Number of parallel workers this tracker synchronizes.
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Sets the number of whole transactions to skip before applying.
    pub fn set_skip_count(&self, skip_count: u64) {
        self.lock().skip_count = skip_count;
    }

    /// Sets the explicit seqnos to skip.
    pub fn set_skip_seqnos(&self, seqnos: BTreeSet<u64>) {
        let mut inner = self.lock();
        inner.skip_seqnos = if seqnos.is_empty() { None } else { Some(seqnos) };
    }

    /// Emits a progress log line every `log_interval` processed events.
    pub fn set_log_interval(&self, log_interval: u64) {
        self.lock().log_interval = log_interval;
    }

    /// Marks the start of a worker's processing.
    pub fn task_begin(&self, task_id: TaskId) {
        self.lock().tasks[task_id].begin();
    }

    /// Opens a timing interval for `task_id` in the given phase.
    pub fn begin_interval(&self, task_id: TaskId, phase: TaskPhase) {
        self.lock().tasks[task_id].begin_interval(phase);
    }

    /// Closes the open timing interval for `task_id`.
    pub fn end_interval(&self, task_id: TaskId) {
        self.lock().tasks[task_id].end_interval();
    }

    /// Returns the last event the given task has processed.
    pub fn last_processed_event(&self, task_id: TaskId) -> Option<DataEvent> {
        self.lock().tasks[task_id].last_event().cloned()
    }

    /// Returns the number of events the given task has processed.
    pub fn task_event_count(&self, task_id: TaskId) -> u64 {
        self.lock().tasks[task_id].event_count()
    }

    /// Returns the lowest last-processed seqno across all tasks, or `None`
    /// while any task has processed nothing.
    pub fn min_last_seqno(&self) -> Option<u64> {
        self.lock().min_last_seqno()
    }

    /// Returns the slowest worker's last-processed event, or `None` while any
    /// task has processed nothing.
    pub fn min_last_event(&self) -> Option<DataEvent> {
        self.lock().min_last_event()
    }

    /// Records the last processed event for a task, which triggers checks for
    /// watches.
    ///
    /// Must be invoked at most once per processed event per task; concurrent
    /// calls from different tasks interleave under the tracker's lock.
    pub fn set_last_processed_event(&self, task_id: TaskId, event: DataEvent) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        debug!(
            stage = %self.stage_name,
            task_id,
            seqno = event.seqno,
            "recording last processed event"
        );

        // Global statistics. Latency may be sub-zero due to clock skew between
        // hosts; clamp at zero.
        inner.event_count += 1;
        inner.apply_latency = (Utc::now() - event.extracted_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let apply_latency = inner.apply_latency;

        // Per-task statistics.
        inner.tasks[task_id].increment_event_count();
        inner.tasks[task_id].set_apply_latency(apply_latency);

        // Per-shard statistics, creating the shard entry on first sight.
        inner
            .shards
            .entry(event.shard_id.clone())
            .or_insert_with(|| ShardProgress::new(&event.shard_id, &self.stage_name))
            .record(event.seqno, &event.event_id, apply_latency);

        // Advance the task's position only forward.
        let advanced = match inner.tasks[task_id].last_event() {
            Some(last) => last.seqno < event.seqno,
            None => true,
        };
        if advanced {
            inner.tasks[task_id].set_last_event(event.clone());
        }

        // Offer the event to every watch family. Matches on cancel-flagged
        // watches mark the matching task for termination.
        let TrackerInner {
            tasks,
            seqno_watches,
            event_id_watches,
            heartbeat_watches,
            timestamp_watches,
            ..
        } = &mut *inner;
        let mut flag_cancelled = |matched_task: TaskId| {
            tasks[matched_task].set_cancelled(true);
        };
        seqno_watches.process(&event, task_id, &mut flag_cancelled);
        event_id_watches.process(&event, task_id, &mut flag_cancelled);
        heartbeat_watches.process(&event, task_id, &mut flag_cancelled);
        timestamp_watches.process(&event, task_id, &mut flag_cancelled);

        if inner.log_interval > 0 && inner.event_count % inner.log_interval == 0 {
            info!(
                stage = %self.stage_name,
                event_count = inner.event_count,
                "stage processing counter"
            );
        }
    }

    /// Sets a watch for a particular sequence number to be processed.
    ///
    /// When `cancel_on_match` is set, every task is flagged for termination as
    /// it satisfies the watch.
    pub fn watch_for_processed_seqno(&self, seqno: u64, cancel_on_match: bool) -> EventWatch {
        self.watch_for(
            WatchKind::Seqno,
            Box::new(SeqnoReached(seqno)),
            cancel_on_match,
        )
    }

    /// Sets a watch for a particular native event id to be processed.
    pub fn watch_for_processed_event_id(
        &self,
        event_id: &str,
        cancel_on_match: bool,
    ) -> EventWatch {
        self.watch_for(
            WatchKind::EventId,
            Box::new(EventIdReached(event_id.to_string())),
            cancel_on_match,
        )
    }

    /// Sets a watch for a heartbeat event to be processed.
    ///
    /// Heartbeat watches always wait for the next occurrence and never resolve
    /// against past progress: if the last processed event happened to be a
    /// heartbeat, resolving against it would be ambiguous.
    pub fn watch_for_processed_heartbeat(&self, name: &str, cancel_on_match: bool) -> EventWatch {
        let mut inner = self.lock();
        if inner.released {
            return dead_watch();
        }
        inner
            .heartbeat_watches
            .watch(
                Box::new(HeartbeatSeen(name.to_string())),
                self.task_count,
                cancel_on_match,
            )
    }

    /// Sets a watch for a source commit timestamp to be processed.
    pub fn watch_for_processed_timestamp(
        &self,
        timestamp: chrono::DateTime<Utc>,
        cancel_on_match: bool,
    ) -> EventWatch {
        self.watch_for(
            WatchKind::SourceTimestamp,
            Box::new(SourceTimestampReached(timestamp)),
            cancel_on_match,
        )
    }

    /// Registers a watch, resolving it immediately when the slowest worker is
    /// already past the watched point.
    fn watch_for(
        &self,
        kind: WatchKind,
        predicate: Box<dyn WatchPredicate>,
        cancel_on_match: bool,
    ) -> EventWatch {
        let mut guard = self.lock();
        if guard.released {
            return dead_watch();
        }

        // The trailing event processed across all tasks decides whether the
        // watched point is already behind us.
        let min_last_event = guard.min_last_event();
        if let Some(event) = min_last_event {
            if predicate.is_satisfied_by(&event) {
                if cancel_on_match {
                    guard.cancel_all();
                    guard.interrupt_requested = true;
                }
                return EventWatch::resolved(event);
            }
        }

        // Not reached yet: enqueue a rendezvous watch, then offer each task's
        // current position so workers already past the point count toward it.
        let task_count = self.task_count;
        let positions: Vec<(TaskId, DataEvent)> = guard
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(task_id, task)| {
                task.last_event().cloned().map(|event| (task_id, event))
            })
            .collect();

        let TrackerInner {
            tasks,
            seqno_watches,
            event_id_watches,
            heartbeat_watches,
            timestamp_watches,
            ..
        } = &mut *guard;
        let manager = match kind {
            WatchKind::Seqno => seqno_watches,
            WatchKind::EventId => event_id_watches,
            WatchKind::Heartbeat => heartbeat_watches,
            WatchKind::SourceTimestamp => timestamp_watches,
        };
        let watch = manager.watch(predicate, task_count, cancel_on_match);

        let mut flag_cancelled = |matched_task: TaskId| {
            tasks[matched_task].set_cancelled(true);
        };
        for (task_id, event) in positions {
            manager.process(&event, task_id, &mut flag_cancelled);
        }

        watch
    }

    /// Returns true if the current event should be skipped.
    ///
    /// The skip counter decrements only at transaction boundaries so whole
    /// transactions are skipped; explicit skip seqnos are removed once their
    /// last fragment has been observed and pruned below the cross-task
    /// minimum.
    pub fn skip(&self, event: &DataEvent) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.skip_count > 0 {
            info!(
                stage = %self.stage_name,
                seqno = event.seqno,
                fragno = event.fragno,
                "skipping event"
            );
            if event.last_frag {
                inner.skip_count -= 1;
            }
            return true;
        }

        let min_seqno = inner.min_last_seqno();
        if let Some(seqnos) = inner.skip_seqnos.as_mut() {
            // Purge skip numbers processing has already reached.
            if let Some(min_seqno) = min_seqno {
                while let Some(first) = seqnos.first().copied() {
                    if first < min_seqno {
                        seqnos.remove(&first);
                    } else {
                        break;
                    }
                }
            }

            if seqnos.is_empty() {
                // The list is now empty, free it.
                inner.skip_seqnos = None;
                debug!(stage = %self.stage_name, "no more events to be skipped");
                return false;
            }

            if seqnos.contains(&event.seqno) {
                debug!(
                    stage = %self.stage_name,
                    seqno = event.seqno,
                    "skipping event from skip list"
                );
                // Remove the seqno after its last fragment.
                if event.last_frag {
                    seqnos.remove(&event.seqno);
                }
                return true;
            }
        }

        false
    }

    /// Flags a single task for cooperative cancellation.
    pub fn cancel(&self, task_id: TaskId) {
        self.lock().tasks[task_id].set_cancelled(true);
    }

    /// Flags every task for cooperative cancellation.
    pub fn cancel_all(&self) {
        self.lock().cancel_all();
    }

    /// Returns true if the given task has been cancelled.
    pub fn is_cancelled(&self, task_id: TaskId) -> bool {
        self.lock().tasks[task_id].is_cancelled()
    }

    /// Returns true if blocked workers must be woken to observe cancellation.
    pub fn interrupt_requested(&self) -> bool {
        self.lock().interrupt_requested
    }

    /// Requests that blocked workers be woken to observe cancellation.
    pub fn request_interrupt(&self) {
        self.lock().interrupt_requested = true;
    }

    /// Returns point-in-time snapshots of every task's progress, ordered by
    /// task id.
    pub fn task_progress(&self) -> Vec<TaskProgressSnapshot> {
        self.lock().tasks.iter().map(TaskProgress::snapshot).collect()
    }

    /// Returns point-in-time snapshots of every shard's progress, ordered by
    /// shard id.
    pub fn shard_progress(&self) -> Vec<ShardProgressSnapshot> {
        self.lock()
            .shards
            .values()
            .map(ShardProgress::snapshot)
            .collect()
    }

    /// Releases tracker resources.
    ///
    /// All pending watches are cancelled so no caller blocks forever on a
    /// stage that will never make further progress; later registrations
    /// resolve as already cancelled.
    pub fn release(&self) {
        let mut inner = self.lock();
        inner.released = true;
        inner.seqno_watches.cancel_all();
        inner.event_id_watches.cancel_all();
        inner.heartbeat_watches.cancel_all();
        inner.timestamp_watches.cancel_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        // The lock is never held across await points, so poisoning only
        // happens if a tracker operation itself panicked.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Builds a watch that reports cancellation without ever resolving.
fn dead_watch() -> EventWatch {
    WatchManager::new().watch(Box::new(SeqnoReached(0)), 1, false)
}
