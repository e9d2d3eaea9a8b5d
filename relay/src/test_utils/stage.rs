//! Harness for driving a single stage from in-memory queues.

use std::sync::Arc;

use relay_config::shared::StageConfig;

use crate::notifications::{NotificationRx, create_notification_channel};
use crate::plugins::memory::{QueueExtractor, QueueStore};
use crate::plugins::StagePlugins;
use crate::stage::Stage;
use crate::test_utils::applier::ApplySink;

/// Plugin wiring where every worker drains one shared input queue and applies
/// into one shared sink.
pub fn queue_plugins(input: QueueStore, sink: &ApplySink) -> StagePlugins {
    StagePlugins {
        extractor: Arc::new(move |_task_id| Box::new(QueueExtractor::new(input.clone()))),
        filters: Vec::new(),
        applier: sink.factory(),
    }
}

/// Plugin wiring where worker `i` drains `inputs[i]`, modelling workers bound
/// to disjoint shard ranges.
pub fn partitioned_queue_plugins(inputs: Vec<QueueStore>, sink: &ApplySink) -> StagePlugins {
    StagePlugins {
        extractor: Arc::new(move |task_id| {
            Box::new(QueueExtractor::new(inputs[task_id].clone()))
        }),
        filters: Vec::new(),
        applier: sink.factory(),
    }
}

/// Builds a started-ready stage plus its notification receiver.
pub fn build_stage(
    name: &str,
    config: StageConfig,
    plugins: StagePlugins,
) -> (Stage, NotificationRx) {
    let (tx, rx) = create_notification_channel();
    let stage = Stage::new(name, config, plugins, tx).expect("stage config must be valid");
    (stage, rx)
}
