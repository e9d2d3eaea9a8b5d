use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known metadata keys carried on [`DataEvent`]s.
///
/// The metadata map is open: sources may attach arbitrary keys, and the engine
/// only interprets the ones below.
pub mod metadata {
    /// Marks a transaction that must not be batched with others into one
    /// physical commit.
    pub const UNSAFE_FOR_BLOCK_COMMIT: &str = "unsafe_for_block_commit";

    /// Marks a transaction that rolls back at its final fragment instead of
    /// committing.
    pub const ROLLBACK: &str = "rollback";

    /// Name of the logical replication service that produced the transaction.
    pub const SERVICE: &str = "service";

    /// Names a heartbeat event injected into the stream.
    pub const HEARTBEAT: &str = "heartbeat";

    /// First sequence number of a span of filter-dropped events that this
    /// event stands in for.
    pub const FILTERED_FROM: &str = "filtered_from";
}

/// One position in the replicated change stream.
///
/// A logical transaction may be split into fragments `0..=k`; `last_frag`
/// marks fragment `k`. Within one worker's stream, `seqno` is non-decreasing
/// and a transaction's fragments appear contiguously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEvent {
    /// Monotonically assigned position in the replicated stream.
    pub seqno: u64,
    /// Fragment number within the transaction.
    pub fragno: u32,
    /// True when this is the final fragment of its transaction.
    pub last_frag: bool,
    /// Native source event id (e.g. a binlog offset), ordered lexicographically.
    pub event_id: String,
    /// Partition key used to route and attribute events for progress reporting.
    pub shard_id: String,
    /// When the event was extracted from the source.
    pub extracted_at: DateTime<Utc>,
    /// Source-side commit timestamp of the originating transaction.
    pub source_commit_at: DateTime<Utc>,
    /// Open metadata map; see [`metadata`] for keys the engine interprets.
    pub metadata: BTreeMap<String, String>,
}

impl DataEvent {
    /// Returns true when this transaction must not share a block commit with
    /// others.
    pub fn is_unsafe_for_block_commit(&self) -> bool {
        self.metadata.contains_key(metadata::UNSAFE_FOR_BLOCK_COMMIT)
    }

    /// Returns true when this transaction rolls back at its final fragment.
    pub fn is_rollback(&self) -> bool {
        self.metadata.contains_key(metadata::ROLLBACK)
    }

    /// Returns the originating service name, if the source recorded one.
    pub fn service(&self) -> Option<&str> {
        self.metadata.get(metadata::SERVICE).map(String::as_str)
    }

    /// Returns the heartbeat name when this event is a heartbeat.
    pub fn heartbeat_name(&self) -> Option<&str> {
        self.metadata.get(metadata::HEARTBEAT).map(String::as_str)
    }

    /// Returns the first seqno of the filtered span this event stands in for.
    pub fn filtered_from_seqno(&self) -> Option<u64> {
        self.metadata
            .get(metadata::FILTERED_FROM)
            .and_then(|raw| raw.parse().ok())
    }

    /// Returns true when this event is a stand-in for a filtered span rather
    /// than a real change.
    pub fn is_filtered_range(&self) -> bool {
        self.metadata.contains_key(metadata::FILTERED_FROM)
    }

    /// Synthesizes the position stand-in for a span of consecutive events all
    /// dropped by filters.
    ///
    /// The result carries `last`'s position so that committing it advances the
    /// durable position across the whole dropped span `[first, last]`.
    pub fn filtered_range(first: &DataEvent, last: &DataEvent) -> DataEvent {
        let mut event = last.clone();
        event
            .metadata
            .insert(metadata::FILTERED_FROM.to_string(), first.seqno.to_string());
        event
    }
}

/// In-band control instruction delivered through the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlEvent {
    /// Tells the receiving worker to finish its current work and exit.
    Stop,
    /// Marks a position that the worker should record without applying
    /// anything.
    Sync(DataEvent),
}

/// An element of the replicated stream: either a change or a control
/// instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// An ordinary change event.
    Data(DataEvent),
    /// A control instruction.
    Control(ControlEvent),
}

impl Event {
    /// Returns the event usable for position updates, when one exists.
    ///
    /// `Stop` carries no position.
    pub fn position(&self) -> Option<&DataEvent> {
        match self {
            Event::Data(event) => Some(event),
            Event::Control(ControlEvent::Sync(event)) => Some(event),
            Event::Control(ControlEvent::Stop) => None,
        }
    }
}
