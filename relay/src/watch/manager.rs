use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;
use crate::types::{DataEvent, TaskId};
use crate::watch::predicate::WatchPredicate;

/// Caller-side handle on a registered watch.
///
/// Resolves to the event that completed the rendezvous once every worker task
/// has reported an event satisfying the watched predicate. If the owning stage
/// is released first, waiting fails with [`ErrorKind::WatchCancelled`].
#[derive(Debug)]
pub struct EventWatch {
    rx: oneshot::Receiver<DataEvent>,
}

impl EventWatch {
    /// Waits until the watch resolves and returns the completing event.
    pub async fn wait(self) -> RelayResult<DataEvent> {
        self.rx.await.map_err(|err| {
            relay_error!(
                ErrorKind::WatchCancelled,
                "Watch was cancelled before it resolved",
                source: err
            )
        })
    }

    /// Returns the completing event if the watch has already resolved.
    ///
    /// Does not consume the handle, so callers can poll and later still wait.
    pub fn try_resolved(&mut self) -> Option<DataEvent> {
        self.rx.try_recv().ok()
    }

    /// Builds an already-resolved watch.
    pub(crate) fn resolved(event: DataEvent) -> EventWatch {
        let (tx, rx) = oneshot::channel();
        // The receiver is alive, so the send cannot fail.
        let _ = tx.send(event);
        EventWatch { rx }
    }
}

/// One registered watch awaiting its rendezvous.
#[derive(Debug)]
struct PendingWatch {
    predicate: Box<dyn WatchPredicate>,
    /// Which task ids have satisfied the predicate so far.
    matched: Vec<bool>,
    /// Flag each matching task for cancellation as it reports.
    cancel_on_match: bool,
    tx: oneshot::Sender<DataEvent>,
}

impl PendingWatch {
    fn is_complete(&self) -> bool {
        self.matched.iter().all(|m| *m)
    }
}

/// Registry of pending watches for one predicate family.
///
/// The tracker owns four managers (seqno, event id, heartbeat, source
/// timestamp) and drives them all under its own lock; the manager itself is
/// not synchronized.
#[derive(Debug, Default)]
pub(crate) struct WatchManager {
    pending: Vec<PendingWatch>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watch requiring the predicate to be satisfied once by each
    /// of `task_count` tasks.
    pub fn watch(
        &mut self,
        predicate: Box<dyn WatchPredicate>,
        task_count: usize,
        cancel_on_match: bool,
    ) -> EventWatch {
        let (tx, rx) = oneshot::channel();
        debug!(?predicate, task_count, cancel_on_match, "registering watch");
        self.pending.push(PendingWatch {
            predicate,
            matched: vec![false; task_count],
            cancel_on_match,
            tx,
        });
        EventWatch { rx }
    }

    /// Offers a processed event to every pending watch on behalf of `task_id`.
    ///
    /// Invokes `on_cancel_match` with the task id for each match on a
    /// cancel-flagged watch; resolves and removes watches whose rendezvous
    /// completes. Watches whose callers went away are dropped along the way.
    pub fn process(
        &mut self,
        event: &DataEvent,
        task_id: TaskId,
        on_cancel_match: &mut dyn FnMut(TaskId),
    ) {
        // Walk backwards so completed entries can be removed in place.
        for index in (0..self.pending.len()).rev() {
            if self.pending[index].tx.is_closed() {
                self.pending.swap_remove(index);
                continue;
            }

            let watch = &mut self.pending[index];
            if !watch.predicate.is_satisfied_by(event) {
                continue;
            }

            watch.matched[task_id] = true;
            if watch.cancel_on_match {
                on_cancel_match(task_id);
            }

            if watch.is_complete() {
                let watch = self.pending.swap_remove(index);
                debug!(predicate = ?watch.predicate, "watch resolved");
                // A dropped receiver is fine: the caller stopped waiting.
                let _ = watch.tx.send(event.clone());
            }
        }
    }

    /// Cancels all pending watches.
    ///
    /// Dropping the senders resolves every outstanding [`EventWatch::wait`]
    /// with [`ErrorKind::WatchCancelled`].
    pub fn cancel_all(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "cancelling pending watches");
        }
        self.pending.clear();
    }

    /// Number of watches still awaiting their rendezvous.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
