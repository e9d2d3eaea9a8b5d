use std::sync::Arc;

use relay::error::ErrorKind;
use relay::pipeline::Pipeline;
use relay::plugins::StagePlugins;
use relay::plugins::memory::{QueueApplier, QueueExtractor, QueueStore};
use relay::test_utils::applier::ApplySink;
use relay::test_utils::event::data_event;
use relay::test_utils::notify::{wait_until, within_deadline};
use rand::random;
use relay_config::shared::{PipelineConfig, StageConfig};
use relay_telemetry::tracing::init_test_tracing;

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        id: random(),
        name: "binlog-relay".to_string(),
    }
}

/// Two stages connected by an intermediate queue: extraction feeds the relay
/// queue, which the apply stage drains into the sink.
fn build_two_stage_pipeline(
    input: &QueueStore,
    relay_queue: &QueueStore,
    sink: &ApplySink,
) -> Pipeline {
    let mut pipeline = Pipeline::new(pipeline_config()).unwrap();
    pipeline.add_store("input", Arc::new(input.clone()));
    pipeline.add_store("relay-queue", Arc::new(relay_queue.clone()));

    let stage_one = StagePlugins {
        extractor: {
            let input = input.clone();
            Arc::new(move |_| Box::new(QueueExtractor::new(input.clone())))
        },
        filters: Vec::new(),
        applier: {
            let relay_queue = relay_queue.clone();
            Arc::new(move |_| Box::new(QueueApplier::new(relay_queue.clone())))
        },
    };
    pipeline
        .add_stage("binlog-to-q", StageConfig::default(), stage_one)
        .unwrap();

    let stage_two = StagePlugins {
        extractor: {
            let relay_queue = relay_queue.clone();
            Arc::new(move |_| Box::new(QueueExtractor::new(relay_queue.clone())))
        },
        filters: Vec::new(),
        applier: sink.factory(),
    };
    pipeline
        .add_stage("q-to-dbms", StageConfig::default(), stage_two)
        .unwrap();

    pipeline
}

#[tokio::test(flavor = "multi_thread")]
async fn events_flow_through_both_stages() {
    init_test_tracing();

    let input = QueueStore::new(64);
    let relay_queue = QueueStore::new(64);
    let sink = ApplySink::new();

    for seqno in 1..=3 {
        input.put(data_event(seqno)).await.unwrap();
    }

    let mut pipeline = build_two_stage_pipeline(&input, &relay_queue, &sink);
    pipeline.start().await.unwrap();

    wait_until(|| sink.committed_seqnos() == vec![1, 2, 3]).await;

    // The pipeline's position is the final stage's position.
    let watch = pipeline.watch_for_processed_seqno(2, false).unwrap();
    let resolved = within_deadline(watch.wait()).await.unwrap();
    assert!(resolved.seqno >= 2);

    pipeline.shutdown();
    within_deadline(pipeline.wait()).await.unwrap();
    within_deadline(pipeline.release()).await.unwrap();

    assert!(pipeline.stages().iter().all(|stage| stage.is_shutdown()));
}

#[tokio::test(flavor = "multi_thread")]
async fn external_shutdown_handle_stops_all_stages() {
    init_test_tracing();

    let input = QueueStore::new(64);
    let relay_queue = QueueStore::new(64);
    let sink = ApplySink::new();

    input.put(data_event(1)).await.unwrap();

    let mut pipeline = build_two_stage_pipeline(&input, &relay_queue, &sink);
    pipeline.start().await.unwrap();

    wait_until(|| sink.committed_seqnos() == vec![1]).await;

    // A detached holder of the shutdown handle can stop the pipeline.
    let shutdown_tx = pipeline.shutdown_tx();
    shutdown_tx.shutdown().unwrap();

    within_deadline(pipeline.wait()).await.unwrap();
    assert!(pipeline.stages().iter().all(|stage| stage.is_shutdown()));
}

#[tokio::test(flavor = "multi_thread")]
async fn starting_an_empty_pipeline_is_an_error() {
    init_test_tracing();

    let mut pipeline = Pipeline::new(pipeline_config()).unwrap();
    let err = pipeline.start().await.expect_err("no stages configured");
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test(flavor = "multi_thread")]
async fn stores_are_reachable_by_name() {
    init_test_tracing();

    let input = QueueStore::new(8);
    let relay_queue = QueueStore::new(8);
    let sink = ApplySink::new();

    let pipeline = build_two_stage_pipeline(&input, &relay_queue, &sink);
    assert!(pipeline.store("relay-queue").is_some());
    assert!(pipeline.store("missing").is_none());
}
