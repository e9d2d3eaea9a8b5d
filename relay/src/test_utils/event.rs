//! Builders for events used across tests.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};

use crate::types::{ControlEvent, DataEvent, Event, metadata};

/// Builder for [`DataEvent`]s with test-friendly defaults.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: DataEvent,
}

impl EventBuilder {
    /// Starts a single-fragment transaction at the given seqno.
    pub fn new(seqno: u64) -> Self {
        Self {
            event: DataEvent {
                seqno,
                fragno: 0,
                last_frag: true,
                event_id: format!("binlog.000001:{seqno:010}"),
                shard_id: "default".to_string(),
                // Fixed timestamps keep latency assertions deterministic.
                extracted_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                source_commit_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                metadata: BTreeMap::new(),
            },
        }
    }

    /// Sets fragment position within the transaction.
    pub fn frag(mut self, fragno: u32, last_frag: bool) -> Self {
        self.event.fragno = fragno;
        self.event.last_frag = last_frag;
        self
    }

    pub fn shard(mut self, shard_id: &str) -> Self {
        self.event.shard_id = shard_id.to_string();
        self
    }

    pub fn event_id(mut self, event_id: &str) -> Self {
        self.event.event_id = event_id.to_string();
        self
    }

    pub fn service(mut self, service: &str) -> Self {
        self.event
            .metadata
            .insert(metadata::SERVICE.to_string(), service.to_string());
        self
    }

    pub fn heartbeat(mut self, name: &str) -> Self {
        self.event
            .metadata
            .insert(metadata::HEARTBEAT.to_string(), name.to_string());
        self
    }

    pub fn unsafe_for_block_commit(mut self) -> Self {
        self.event
            .metadata
            .insert(metadata::UNSAFE_FOR_BLOCK_COMMIT.to_string(), "true".to_string());
        self
    }

    pub fn rollback(mut self) -> Self {
        self.event
            .metadata
            .insert(metadata::ROLLBACK.to_string(), "true".to_string());
        self
    }

    pub fn build(self) -> DataEvent {
        self.event
    }

    pub fn build_event(self) -> Event {
        Event::Data(self.event)
    }
}

/// Single-fragment data event at the given seqno.
pub fn data_event(seqno: u64) -> Event {
    EventBuilder::new(seqno).build_event()
}

/// One fragment of a multi-part transaction.
pub fn frag_event(seqno: u64, fragno: u32, last_frag: bool) -> Event {
    EventBuilder::new(seqno).frag(fragno, last_frag).build_event()
}

/// Stop control event.
pub fn stop_event() -> Event {
    Event::Control(ControlEvent::Stop)
}

/// Sync control event carrying the given position.
pub fn sync_event(seqno: u64) -> Event {
    Event::Control(ControlEvent::Sync(EventBuilder::new(seqno).build()))
}
