use std::time::Duration;

use serde::Serialize;

/// Statistics for an individual shard, identified by shard id.
///
/// Created lazily by the tracker on first sight of a shard and kept for the
/// stage's lifetime.
#[derive(Debug)]
pub struct ShardProgress {
    shard_id: String,
    stage_name: String,
    last_seqno: u64,
    last_event_id: String,
    event_count: u64,
    apply_latency: Duration,
}

impl ShardProgress {
    pub(crate) fn new(shard_id: &str, stage_name: &str) -> Self {
        Self {
            shard_id: shard_id.to_string(),
            stage_name: stage_name.to_string(),
            last_seqno: 0,
            last_event_id: String::new(),
            event_count: 0,
            apply_latency: Duration::ZERO,
        }
    }

    pub(crate) fn record(&mut self, seqno: u64, event_id: &str, apply_latency: Duration) {
        self.last_seqno = seqno;
        self.last_event_id = event_id.to_string();
        self.event_count += 1;
        self.apply_latency = apply_latency;
    }

    pub(crate) fn snapshot(&self) -> ShardProgressSnapshot {
        ShardProgressSnapshot {
            shard_id: self.shard_id.clone(),
            stage_name: self.stage_name.clone(),
            last_seqno: self.last_seqno,
            last_event_id: self.last_event_id.clone(),
            event_count: self.event_count,
            apply_latency: self.apply_latency,
        }
    }
}

/// Point-in-time view of one shard's progress.
#[derive(Debug, Clone, Serialize)]
pub struct ShardProgressSnapshot {
    pub shard_id: String,
    pub stage_name: String,
    pub last_seqno: u64,
    pub last_event_id: String,
    pub event_count: u64,
    pub apply_latency: Duration,
}
