use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::DataEvent;

/// Predicate over stream position evaluated against processed events.
///
/// Implementations must be cheap: predicates run under the progress tracker's
/// lock, once per processed event per pending watch.
pub trait WatchPredicate: fmt::Debug + Send + Sync {
    /// Returns true when `event` is at or past the watched point.
    fn is_satisfied_by(&self, event: &DataEvent) -> bool;
}

/// Matches once processing reaches the given sequence number.
#[derive(Debug, Clone, Copy)]
pub struct SeqnoReached(pub u64);

impl WatchPredicate for SeqnoReached {
    fn is_satisfied_by(&self, event: &DataEvent) -> bool {
        event.seqno >= self.0
    }
}

/// Matches once processing reaches the given native event id.
///
/// Native ids compare lexicographically; sources are expected to use an
/// ordered id scheme (e.g. zero-padded log name plus offset).
#[derive(Debug, Clone)]
pub struct EventIdReached(pub String);

impl WatchPredicate for EventIdReached {
    fn is_satisfied_by(&self, event: &DataEvent) -> bool {
        event.event_id.as_str() >= self.0.as_str()
    }
}

/// Matches the next heartbeat event with the given name.
///
/// The name `"*"` matches any heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatSeen(pub String);

impl WatchPredicate for HeartbeatSeen {
    fn is_satisfied_by(&self, event: &DataEvent) -> bool {
        match event.heartbeat_name() {
            Some(name) => self.0 == "*" || self.0 == name,
            None => false,
        }
    }
}

/// Matches once processing reaches the given source commit timestamp.
#[derive(Debug, Clone, Copy)]
pub struct SourceTimestampReached(pub DateTime<Utc>);

impl WatchPredicate for SourceTimestampReached {
    fn is_satisfied_by(&self, event: &DataEvent) -> bool {
        event.source_commit_at >= self.0
    }
}
