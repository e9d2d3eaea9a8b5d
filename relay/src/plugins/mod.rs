//! Plugin contracts consumed by the stage execution engine.
//!
//! Each worker task owns its private extractor, filter chain, and applier
//! instances; nothing is shared across workers except the progress tracker.
//! Instances are produced by typed factory closures registered at stage
//! construction, so plugin wiring is checked at compile time instead of being
//! resolved by name at run time.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayResult;
use crate::types::{DataEvent, Event, TaskId};

/// Source of replication events for one worker task.
#[async_trait]
pub trait Extractor: Send {
    /// Extracts the next event.
    ///
    /// May block waiting for data. `Ok(None)` means "nothing yet, try again";
    /// the extractor is responsible for any waiting, callers retry without
    /// delay assumptions.
    async fn extract(&mut self) -> RelayResult<Option<Event>>;

    /// Returns true when more events are already buffered.
    ///
    /// Block commit uses this to flush a partial batch instead of holding it
    /// open while the stream is idle.
    async fn has_more_events(&self) -> bool;

    /// Repositions the extractor to resume just after the given native event id.
    ///
    /// Called at worker startup when the stage synchronizes its position with
    /// the applier's durable last event.
    async fn seek(&mut self, event_id: &str) -> RelayResult<()> {
        let _ = event_id;
        Ok(())
    }

    /// Releases extractor resources at stage shutdown.
    async fn release(&mut self) -> RelayResult<()> {
        Ok(())
    }
}

/// Transformation applied to each event inside a worker task.
///
/// Filters run single-threaded within their owning worker and must be safe to
/// call repeatedly.
#[async_trait]
pub trait Filter: Send {
    /// Transforms an event; returning `None` drops it.
    async fn filter(&mut self, event: DataEvent) -> RelayResult<Option<DataEvent>>;

    /// Releases filter resources at stage shutdown.
    async fn release(&mut self) -> RelayResult<()> {
        Ok(())
    }
}

/// Target that applies replicated events with durable position tracking.
#[async_trait]
pub trait Applier: Send {
    /// Tells the applier which worker task it belongs to.
    fn set_task_id(&mut self, task_id: TaskId) {
        let _ = task_id;
    }

    /// Applies one event.
    ///
    /// `do_commit` makes the accumulated work durable after this event;
    /// `do_rollback` discards the current transaction instead of applying it;
    /// `position_only` records the event's position without business-logic
    /// side effects (used for skips, sync markers, and filtered spans).
    async fn apply(
        &mut self,
        event: &DataEvent,
        do_commit: bool,
        do_rollback: bool,
        position_only: bool,
    ) -> RelayResult<()>;

    /// Commits all work applied since the last commit.
    async fn commit(&mut self) -> RelayResult<()>;

    /// Discards all uncommitted work.
    async fn rollback(&mut self) -> RelayResult<()>;

    /// Returns the durably stored last committed event, the resume point after
    /// a restart.
    async fn last_event(&mut self) -> RelayResult<Option<DataEvent>>;

    /// Releases applier resources at stage shutdown.
    async fn release(&mut self) -> RelayResult<()> {
        Ok(())
    }
}

/// Named storage shared across stages of a pipeline.
#[async_trait]
pub trait Store: Send + Sync {
    /// Prepares the store for use before stages start.
    async fn prepare(&self) -> RelayResult<()> {
        Ok(())
    }

    /// Releases store resources after all stages have stopped.
    async fn release(&self) -> RelayResult<()> {
        Ok(())
    }
}

/// Factory producing one worker's private extractor instance.
pub type ExtractorFactory = Arc<dyn Fn(TaskId) -> Box<dyn Extractor> + Send + Sync>;

/// Factory producing one worker's private filter instance.
pub type FilterFactory = Arc<dyn Fn(TaskId) -> Box<dyn Filter> + Send + Sync>;

/// Factory producing one worker's private applier instance.
pub type ApplierFactory = Arc<dyn Fn(TaskId) -> Box<dyn Applier> + Send + Sync>;

/// Plugin wiring for a stage: the specifications every worker instantiates
/// its own chain from.
#[derive(Clone)]
pub struct StagePlugins {
    pub extractor: ExtractorFactory,
    pub filters: Vec<FilterFactory>,
    pub applier: ApplierFactory,
}

impl StagePlugins {
    /// Builds stage wiring from plain constructor closures.
    pub fn new<E, A, FE, FA>(extractor: FE, applier: FA) -> Self
    where
        E: Extractor + 'static,
        A: Applier + 'static,
        FE: Fn(TaskId) -> E + Send + Sync + 'static,
        FA: Fn(TaskId) -> A + Send + Sync + 'static,
    {
        Self {
            extractor: Arc::new(move |task_id| Box::new(extractor(task_id))),
            filters: Vec::new(),
            applier: Arc::new(move |task_id| Box::new(applier(task_id))),
        }
    }

    /// Appends a filter to the chain; filters run in registration order.
    pub fn with_filter<F, FF>(mut self, filter: FF) -> Self
    where
        F: Filter + 'static,
        FF: Fn(TaskId) -> F + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(move |task_id| Box::new(filter(task_id))));
        self
    }
}

impl std::fmt::Debug for StagePlugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagePlugins")
            .field("filters", &self.filters.len())
            .finish()
    }
}
