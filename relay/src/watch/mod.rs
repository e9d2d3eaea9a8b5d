//! Predicate-keyed rendezvous futures over the replicated stream.
//!
//! A watch is a registered predicate over stream position that resolves a
//! future once every parallel worker of a stage has independently reported an
//! event satisfying it. Resolution happens inside the progress tracker's
//! critical section, so a watch registered concurrently with the progress that
//! satisfies it can never miss its wake-up.

mod manager;
mod predicate;

pub use manager::EventWatch;
pub(crate) use manager::WatchManager;
pub use predicate::{
    EventIdReached, HeartbeatSeen, SeqnoReached, SourceTimestampReached, WatchPredicate,
};
