//! Extractor doubles for failure and positioning tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ErrorKind, RelayResult};
use crate::plugins::Extractor;
use crate::plugins::memory::QueueStore;
use crate::relay_error;
use crate::types::Event;

/// Extractor that fails a configured number of times before delegating to a
/// queue.
#[derive(Debug)]
pub struct FlakyExtractor {
    queue: QueueStore,
    failures_remaining: u64,
}

impl FlakyExtractor {
    pub fn new(queue: QueueStore, failures: u64) -> Self {
        Self {
            queue,
            failures_remaining: failures,
        }
    }
}

#[async_trait]
impl Extractor for FlakyExtractor {
    async fn extract(&mut self) -> RelayResult<Option<Event>> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(relay_error!(
                ErrorKind::ExtractionFailed,
                "Injected extraction failure"
            ));
        }
        self.queue.take().await.map(Some)
    }

    async fn has_more_events(&self) -> bool {
        !self.queue.is_empty()
    }
}

/// Extractor that records seek calls and then delegates to a queue.
#[derive(Debug)]
pub struct SeekRecordingExtractor {
    queue: QueueStore,
    seeks: Arc<Mutex<Vec<String>>>,
}

impl SeekRecordingExtractor {
    pub fn new(queue: QueueStore, seeks: Arc<Mutex<Vec<String>>>) -> Self {
        Self { queue, seeks }
    }
}

#[async_trait]
impl Extractor for SeekRecordingExtractor {
    async fn extract(&mut self) -> RelayResult<Option<Event>> {
        self.queue.take().await.map(Some)
    }

    async fn has_more_events(&self) -> bool {
        !self.queue.is_empty()
    }

    async fn seek(&mut self, event_id: &str) -> RelayResult<()> {
        self.seeks.lock().unwrap().push(event_id.to_string());
        Ok(())
    }
}
