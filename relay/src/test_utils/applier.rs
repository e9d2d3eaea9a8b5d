//! A shared collecting applier with full visibility into apply calls,
//! commits, and rollbacks.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ErrorKind, RelayResult};
use crate::plugins::{Applier, ApplierFactory};
use crate::relay_error;
use crate::types::{DataEvent, TaskId};

/// One recorded call to [`Applier::apply`].
#[derive(Debug, Clone)]
pub struct ApplyRecord {
    pub task_id: TaskId,
    pub seqno: u64,
    pub fragno: u32,
    pub last_frag: bool,
    pub do_commit: bool,
    pub do_rollback: bool,
    pub position_only: bool,
    pub filtered_from: Option<u64>,
}

#[derive(Debug, Default)]
struct ApplySinkInner {
    records: Vec<ApplyRecord>,
    /// Each committed batch as the seqnos it made durable, in commit order.
    commit_batches: Vec<Vec<u64>>,
    rollback_count: u64,
    last_committed: Option<DataEvent>,
    fail_on_seqnos: BTreeSet<u64>,
}

/// Shared sink collecting everything the appliers of a stage do.
///
/// All workers of a stage write into one sink, so tests can assert on the
/// interleaved apply stream and on what actually became durable.
#[derive(Debug, Clone, Default)]
pub struct ApplySink {
    inner: Arc<Mutex<ApplySinkInner>>,
}

impl ApplySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the applier factory for a stage; every worker's instance writes
    /// into this sink.
    pub fn factory(&self) -> ApplierFactory {
        let sink = self.clone();
        Arc::new(move |_task_id| Box::new(CollectingApplier::new(sink.clone())))
    }

    /// Makes non-position applies of the given seqno fail.
    pub fn fail_on_seqno(&self, seqno: u64) {
        self.inner.lock().unwrap().fail_on_seqnos.insert(seqno);
    }

    /// Every apply call observed so far, in arrival order.
    pub fn records(&self) -> Vec<ApplyRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    /// Seqnos made durable, flattened across commit batches.
    pub fn committed_seqnos(&self) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap()
            .commit_batches
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    /// The committed batches, each as the seqnos it contained.
    pub fn commit_batches(&self) -> Vec<Vec<u64>> {
        self.inner.lock().unwrap().commit_batches.clone()
    }

    pub fn rollback_count(&self) -> u64 {
        self.inner.lock().unwrap().rollback_count
    }

    /// The durable position recorded by the most recent commit.
    pub fn last_committed(&self) -> Option<DataEvent> {
        self.inner.lock().unwrap().last_committed.clone()
    }

    fn should_fail(&self, seqno: u64) -> bool {
        self.inner.lock().unwrap().fail_on_seqnos.contains(&seqno)
    }

    fn record(&self, record: ApplyRecord) {
        self.inner.lock().unwrap().records.push(record);
    }

    fn record_commit(&self, batch: Vec<u64>, position: Option<DataEvent>) {
        let mut inner = self.inner.lock().unwrap();
        if !batch.is_empty() {
            inner.commit_batches.push(batch);
        }
        if let Some(position) = position {
            inner.last_committed = Some(position);
        }
    }

    fn record_rollback(&self) {
        self.inner.lock().unwrap().rollback_count += 1;
    }
}

/// Applier that buffers applied events until commit and reports everything to
/// its [`ApplySink`].
#[derive(Debug)]
pub struct CollectingApplier {
    task_id: TaskId,
    sink: ApplySink,
    uncommitted: Vec<DataEvent>,
    pending_position: Option<DataEvent>,
}

impl CollectingApplier {
    pub fn new(sink: ApplySink) -> Self {
        Self {
            task_id: 0,
            sink,
            uncommitted: Vec::new(),
            pending_position: None,
        }
    }

    fn flush(&mut self) {
        let batch: Vec<u64> = self.uncommitted.drain(..).map(|event| event.seqno).collect();
        self.sink.record_commit(batch, self.pending_position.take());
    }
}

#[async_trait]
impl Applier for CollectingApplier {
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
        if !position_only && !do_rollback && self.sink.should_fail(event.seqno) {
            return Err(relay_error!(
                ErrorKind::ApplyFailed,
                "Injected apply failure",
                format!("seqno={}", event.seqno)
            ));
        }

        self.sink.record(ApplyRecord {
            task_id: self.task_id,
            seqno: event.seqno,
            fragno: event.fragno,
            last_frag: event.last_frag,
            do_commit,
            do_rollback,
            position_only,
            filtered_from: event.filtered_from_seqno(),
        });

        if do_rollback {
            self.uncommitted.retain(|buffered| buffered.seqno != event.seqno);
            return Ok(());
        }

        if !position_only {
            self.uncommitted.push(event.clone());
        }
        self.pending_position = Some(event.clone());

        if do_commit {
            self.flush();
        }
        Ok(())
    }

    async fn commit(&mut self) -> RelayResult<()> {
        self.flush();
        Ok(())
    }

    async fn rollback(&mut self) -> RelayResult<()> {
        self.uncommitted.clear();
        self.pending_position = None;
        self.sink.record_rollback();
        Ok(())
    }

    async fn last_event(&mut self) -> RelayResult<Option<DataEvent>> {
        Ok(self.sink.last_committed())
    }
}
