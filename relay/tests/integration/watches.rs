use std::time::Duration;

use relay::error::ErrorKind;
use relay::plugins::memory::QueueStore;
use relay::test_utils::applier::ApplySink;
use relay::test_utils::event::{EventBuilder, data_event, stop_event};
use relay::test_utils::notify::{wait_until, within_deadline};
use relay::test_utils::stage::{build_stage, partitioned_queue_plugins, queue_plugins};
use relay_config::shared::StageConfig;
use relay_telemetry::tracing::init_test_tracing;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn seqno_watch_waits_for_every_worker() {
    init_test_tracing();

    let inputs = vec![
        QueueStore::new(256),
        QueueStore::new(256),
        QueueStore::new(256),
    ];
    inputs[0].put(data_event(150)).await.unwrap();
    inputs[1].put(data_event(90)).await.unwrap();
    inputs[2].put(data_event(95)).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        task_count: 3,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        config,
        partitioned_queue_plugins(inputs.clone(), &sink),
    );
    stage.start().unwrap();

    // Workers sit at seqnos {150, 90, 95}.
    wait_until(|| {
        let tasks = stage.task_progress();
        tasks[0].last_seqno() == Some(150)
            && tasks[1].last_seqno() == Some(90)
            && tasks[2].last_seqno() == Some(95)
    })
    .await;

    let mut watch = stage.watch_for_processed_seqno(100, false);

    // Task 0 being far ahead says nothing about the others.
    sleep(Duration::from_millis(50)).await;
    assert!(watch.try_resolved().is_none());

    // Task 1 crosses the point; task 2 is still behind.
    inputs[1].put(data_event(105)).await.unwrap();
    wait_until(|| stage.task_progress()[1].last_seqno() == Some(105)).await;
    sleep(Duration::from_millis(50)).await;
    assert!(watch.try_resolved().is_none());

    // Task 2 crossing completes the rendezvous.
    inputs[2].put(data_event(100)).await.unwrap();
    let resolved = within_deadline(watch.wait()).await.unwrap();
    assert_eq!(resolved.seqno, 100);

    stage.shutdown(true);
    within_deadline(stage.wait()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_resolves_immediately_behind_minimum() {
    init_test_tracing();

    let input = QueueStore::new(64);
    for seqno in 1..=10 {
        input.put(data_event(seqno)).await.unwrap();
    }

    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input, &sink),
    );
    stage.start().unwrap();

    wait_until(|| stage.min_last_seqno() == Some(10)).await;

    let watch = stage.watch_for_processed_seqno(5, false);
    let resolved = within_deadline(watch.wait()).await.unwrap();
    assert_eq!(resolved.seqno, 10);

    stage.shutdown(true);
    within_deadline(stage.wait()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_watch_terminates_workers() {
    init_test_tracing();

    let input = QueueStore::new(64);
    for seqno in 1..=3 {
        input.put(data_event(seqno)).await.unwrap();
    }

    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input, &sink),
    );
    stage.start().unwrap();

    // Stop once seqno 3 has been processed; no stop event is ever delivered.
    let watch = stage.watch_for_processed_seqno(3, true);
    let resolved = within_deadline(watch.wait()).await.unwrap();
    assert!(resolved.seqno >= 3);

    within_deadline(stage.wait()).await.unwrap();
    assert!(stage.is_shutdown());
    assert_eq!(sink.committed_seqnos(), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_watch_waits_for_next_occurrence() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input
        .put(EventBuilder::new(1).heartbeat("hourly").build_event())
        .await
        .unwrap();

    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input.clone(), &sink),
    );
    stage.start().unwrap();

    wait_until(|| stage.min_last_seqno() == Some(1)).await;

    // A heartbeat already processed must not satisfy the watch.
    let mut watch = stage.watch_for_processed_heartbeat("hourly", false);
    sleep(Duration::from_millis(50)).await;
    assert!(watch.try_resolved().is_none());

    input
        .put(EventBuilder::new(2).heartbeat("hourly").build_event())
        .await
        .unwrap();
    let resolved = within_deadline(watch.wait()).await.unwrap();
    assert_eq!(resolved.seqno, 2);

    stage.shutdown(true);
    within_deadline(stage.wait()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn event_id_watch_resolves_on_reaching_id() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input
        .put(
            EventBuilder::new(1)
                .event_id("binlog.000001:0000000100")
                .build_event(),
        )
        .await
        .unwrap();

    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input.clone(), &sink),
    );
    stage.start().unwrap();

    let watch = stage.watch_for_processed_event_id("binlog.000001:0000000100", false);
    let resolved = within_deadline(watch.wait()).await.unwrap();
    assert_eq!(resolved.event_id, "binlog.000001:0000000100");

    stage.shutdown(true);
    within_deadline(stage.wait()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn timestamp_watch_resolves_on_reaching_commit_time() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input.put(data_event(1)).await.unwrap();

    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input.clone(), &sink),
    );
    stage.start().unwrap();

    // Builder events carry a fixed commit timestamp; watch for that instant.
    let target = relay::test_utils::event::EventBuilder::new(0)
        .build()
        .source_commit_at;
    let watch = stage.watch_for_processed_timestamp(target, false);
    let resolved = within_deadline(watch.wait()).await.unwrap();
    assert_eq!(resolved.seqno, 1);

    stage.shutdown(true);
    within_deadline(stage.wait()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn release_abandons_pending_watches() {
    init_test_tracing();

    let input = QueueStore::new(8);
    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input, &sink),
    );
    stage.start().unwrap();

    let watch = stage.watch_for_processed_seqno(1_000_000, false);

    within_deadline(stage.release()).await.unwrap();

    let err = within_deadline(watch.wait())
        .await
        .expect_err("watch must be cancelled at release");
    assert_eq!(err.kind(), ErrorKind::WatchCancelled);
}
