use relay::plugins::memory::QueueStore;
use relay::test_utils::applier::ApplySink;
use relay::test_utils::event::{EventBuilder, data_event, frag_event, stop_event};
use relay::test_utils::filter::DropSeqnosFilter;
use relay::test_utils::notify::within_deadline;
use relay::test_utils::stage::{build_stage, queue_plugins};
use relay_config::shared::StageConfig;
use relay_telemetry::tracing::init_test_tracing;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread")]
async fn block_commit_batches_transactions() {
    init_test_tracing();

    let input = QueueStore::new(64);
    for seqno in 1..=7 {
        input.put(data_event(seqno)).await.unwrap();
    }
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        block_commit_rows: 3,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // Blocks of three, with the tail flushed when the queue drained.
    assert_eq!(
        sink.commit_batches(),
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn fragments_apply_in_order_and_commit_once() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input.put(frag_event(1, 0, false)).await.unwrap();
    input.put(frag_event(1, 1, false)).await.unwrap();
    input.put(frag_event(1, 2, true)).await.unwrap();
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input, &sink),
    );

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // Commit is requested only at the final fragment; the whole transaction
    // becomes durable as one unit.
    let commit_flags: Vec<(u32, bool)> = sink
        .records()
        .iter()
        .map(|record| (record.fragno, record.do_commit))
        .collect();
    assert_eq!(commit_flags, vec![(0, false), (1, false), (2, true)]);
    assert_eq!(sink.commit_batches(), vec![vec![1, 1, 1]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unsafe_event_never_shares_a_block() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input.put(data_event(1)).await.unwrap();
    input.put(data_event(2)).await.unwrap();
    input
        .put(EventBuilder::new(3).unsafe_for_block_commit().build_event())
        .await
        .unwrap();
    input.put(data_event(4)).await.unwrap();
    input.put(data_event(5)).await.unwrap();
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        block_commit_rows: 10,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // Prior work commits first, the unsafe transaction commits alone, and
    // the tail flushes at loop exit.
    assert_eq!(
        sink.commit_batches(),
        vec![vec![1, 2], vec![3], vec![4, 5]]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn flagged_transaction_rolls_back_without_touching_prior_work() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input.put(data_event(1)).await.unwrap();
    // A fragmented transaction flagged to roll back at its end.
    input
        .put(EventBuilder::new(2).rollback().frag(0, false).build_event())
        .await
        .unwrap();
    input
        .put(EventBuilder::new(2).rollback().frag(1, true).build_event())
        .await
        .unwrap();
    input.put(data_event(3)).await.unwrap();
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        block_commit_rows: 10,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // Transaction 1 was committed before the doomed transaction started;
    // transaction 2 never became durable; 3 landed afterwards.
    assert_eq!(sink.commit_batches(), vec![vec![1], vec![3]]);

    let rollback_record = sink
        .records()
        .iter()
        .find(|record| record.do_rollback)
        .cloned()
        .expect("final fragment must arrive as a rollback");
    assert_eq!(rollback_record.seqno, 2);
    assert!(rollback_record.last_frag);
}

#[tokio::test(flavor = "multi_thread")]
async fn service_change_forces_commit_between_blocks() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input
        .put(EventBuilder::new(1).service("alpha").build_event())
        .await
        .unwrap();
    input
        .put(EventBuilder::new(2).service("alpha").build_event())
        .await
        .unwrap();
    input
        .put(EventBuilder::new(3).service("beta").build_event())
        .await
        .unwrap();
    input
        .put(EventBuilder::new(4).service("beta").build_event())
        .await
        .unwrap();
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        block_commit_rows: 10,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // One block per service; the two are never mixed.
    assert_eq!(sink.commit_batches(), vec![vec![1, 2], vec![3, 4]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn filtered_span_updates_position_as_one_range() {
    init_test_tracing();

    let input = QueueStore::new(64);
    for seqno in 9..=13 {
        input.put(data_event(seqno)).await.unwrap();
    }
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let mut plugins = queue_plugins(input, &sink);
    plugins
        .filters
        .push(Arc::new(|_| Box::new(DropSeqnosFilter::new([10, 11, 12]))));

    let (mut stage, _notifications) =
        build_stage("q-to-dbms", StageConfig::default(), plugins);

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // Only 9 and 13 carried row changes.
    assert_eq!(sink.committed_seqnos(), vec![9, 13]);

    // The dropped span reached the applier as a single aggregate position
    // update covering [10, 12], delivered before event 13.
    let records = sink.records();
    let span_index = records
        .iter()
        .position(|record| record.filtered_from == Some(10))
        .expect("aggregate position update for the filtered span");
    let span = &records[span_index];
    assert_eq!(span.seqno, 12);
    assert!(span.position_only);

    let event_13_index = records
        .iter()
        .position(|record| record.seqno == 13)
        .expect("event 13 must be applied");
    assert!(span_index < event_13_index);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_with_open_batch_commits_or_rolls_back_whole() {
    init_test_tracing();

    let input = QueueStore::new(64);
    for seqno in 1..=5 {
        input.put(data_event(seqno)).await.unwrap();
    }
    // An open fragment keeps the batch uncommitted once the queue drains.
    input.put(frag_event(6, 0, false)).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        block_commit_rows: 100,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();

    // Wait until the worker holds the whole uncommitted batch and is blocked
    // in extraction waiting for the next fragment.
    relay::test_utils::notify::wait_until(|| {
        sink.records().iter().any(|record| record.seqno == 6)
            && stage.task_progress()[0].phase == relay::progress::TaskPhase::Extract
    })
    .await;

    stage.shutdown(true);
    within_deadline(stage.wait()).await.unwrap();

    // The interrupted worker rolled its uncommitted batch back: nothing was
    // half-applied.
    assert!(sink.committed_seqnos().is_empty());
    assert!(sink.rollback_count() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn drained_queue_flushes_partial_block() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input.put(data_event(1)).await.unwrap();
    input.put(data_event(2)).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        block_commit_rows: 100,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();

    // The block threshold is far away, but the queue running dry forces the
    // flush at the last fragment.
    relay::test_utils::notify::wait_until(|| sink.committed_seqnos() == vec![1, 2]).await;

    stage.shutdown(true);
    within_deadline(stage.wait()).await.unwrap();
}
