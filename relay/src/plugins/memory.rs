//! In-memory queue store and the plugins that read and write it.
//!
//! [`QueueStore`] is the connective tissue between stages inside one process:
//! an upstream stage's applier feeds a queue that a downstream stage's
//! extractor drains. It is also the workhorse of the integration tests, which
//! drive whole stages by seeding queues with events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{ErrorKind, RelayResult};
use crate::plugins::{Applier, Extractor, Store};
use crate::relay_error;
use crate::types::{DataEvent, Event, TaskId};

#[derive(Debug)]
struct QueueInner {
    queue: Mutex<VecDeque<Event>>,
    /// Counts buffered events; takers block on it.
    items: Semaphore,
    /// Counts free capacity; putters block on it.
    space: Semaphore,
}

/// Bounded in-memory event queue shared between a producer and consumers.
///
/// Handles are cheap to clone; all clones address the same queue. Closing the
/// queue fails blocked and future operations with [`ErrorKind::StoreClosed`].
#[derive(Debug, Clone)]
pub struct QueueStore {
    inner: Arc<QueueInner>,
}

impl QueueStore {
    /// Creates a queue holding at most `capacity` buffered events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                items: Semaphore::new(0),
                space: Semaphore::new(capacity),
            }),
        }
    }

    /// Appends an event, waiting for free capacity.
    pub async fn put(&self, event: Event) -> RelayResult<()> {
        let permit = self.inner.space.acquire().await.map_err(|err| {
            relay_error!(ErrorKind::StoreClosed, "Queue store is closed", source: err)
        })?;
        permit.forget();

        self.inner.queue.lock().unwrap().push_back(event);
        self.inner.items.add_permits(1);
        Ok(())
    }

    /// Removes the oldest event, waiting until one is available.
    pub async fn take(&self) -> RelayResult<Event> {
        let permit = self.inner.items.acquire().await.map_err(|err| {
            relay_error!(ErrorKind::StoreClosed, "Queue store is closed", source: err)
        })?;
        permit.forget();

        let event = self
            .inner
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("item permit implies a buffered event");
        self.inner.space.add_permits(1);
        Ok(event)
    }

    /// Returns true when no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().unwrap().is_empty()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Closes the queue, waking all blocked producers and consumers with an
    /// error.
    pub fn close(&self) {
        self.inner.items.close();
        self.inner.space.close();
    }
}

#[async_trait]
impl Store for QueueStore {
    async fn release(&self) -> RelayResult<()> {
        self.close();
        Ok(())
    }
}

/// Extractor that drains a [`QueueStore`].
///
/// Several workers may share one queue; each event is delivered to exactly
/// one of them.
#[derive(Debug)]
pub struct QueueExtractor {
    queue: QueueStore,
}

impl QueueExtractor {
    pub fn new(queue: QueueStore) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Extractor for QueueExtractor {
    async fn extract(&mut self) -> RelayResult<Option<Event>> {
        self.queue.take().await.map(Some)
    }

    async fn has_more_events(&self) -> bool {
        !self.queue.is_empty()
    }
}

/// Applier that feeds committed events into a downstream [`QueueStore`].
///
/// Events buffer locally until a commit makes them visible downstream, so a
/// rollback never leaks half a transaction into the next stage.
#[derive(Debug)]
pub struct QueueApplier {
    task_id: TaskId,
    out: QueueStore,
    uncommitted: Vec<DataEvent>,
    pending_position: Option<DataEvent>,
    last_committed: Option<DataEvent>,
}

impl QueueApplier {
    pub fn new(out: QueueStore) -> Self {
        Self {
            task_id: 0,
            out,
            uncommitted: Vec::new(),
            pending_position: None,
            last_committed: None,
        }
    }

    /// Id of the worker that owns this applier instance.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    async fn flush(&mut self) -> RelayResult<()> {
        for event in self.uncommitted.drain(..) {
            self.out.put(Event::Data(event)).await?;
        }
        if let Some(position) = self.pending_position.take() {
            self.last_committed = Some(position);
        }
        Ok(())
    }
}

#[async_trait]
impl Applier for QueueApplier {
    fn set_task_id(&mut self, task_id: TaskId) {
        self.task_id = task_id;
    }

    async fn apply(
        &mut self,
        event: &DataEvent,
        do_commit: bool,
        do_rollback: bool,
        position_only: bool,
    ) -> RelayResult<()> {
        if do_rollback {
            // Discard the transaction being rolled back without touching
            // earlier buffered transactions.
            self.uncommitted.retain(|buffered| buffered.seqno != event.seqno);
            return Ok(());
        }

        if !position_only {
            self.uncommitted.push(event.clone());
        }
        self.pending_position = Some(event.clone());

        if do_commit {
            self.flush().await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> RelayResult<()> {
        self.flush().await
    }

    async fn rollback(&mut self) -> RelayResult<()> {
        self.uncommitted.clear();
        self.pending_position = None;
        Ok(())
    }

    async fn last_event(&mut self) -> RelayResult<Option<DataEvent>> {
        Ok(self.last_committed.clone())
    }
}
