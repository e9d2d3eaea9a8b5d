//! Filter doubles.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::RelayResult;
use crate::plugins::Filter;
use crate::types::DataEvent;

/// Filter that drops events whose seqno is in the configured set.
#[derive(Debug)]
pub struct DropSeqnosFilter {
    drop: BTreeSet<u64>,
}

impl DropSeqnosFilter {
    pub fn new(drop: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drop: drop.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Filter for DropSeqnosFilter {
    async fn filter(&mut self, event: DataEvent) -> RelayResult<Option<DataEvent>> {
        if self.drop.contains(&event.seqno) {
            Ok(None)
        } else {
            Ok(Some(event))
        }
    }
}

/// Filter that tags every event with the shard it rewrites to.
#[derive(Debug)]
pub struct RewriteShardFilter {
    shard_id: String,
}

impl RewriteShardFilter {
    pub fn new(shard_id: &str) -> Self {
        Self {
            shard_id: shard_id.to_string(),
        }
    }
}

#[async_trait]
impl Filter for RewriteShardFilter {
    async fn filter(&mut self, mut event: DataEvent) -> RelayResult<Option<DataEvent>> {
        event.shard_id = self.shard_id.clone();
        Ok(Some(event))
    }
}
