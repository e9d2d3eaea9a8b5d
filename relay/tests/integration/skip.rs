use std::collections::BTreeSet;

use relay::plugins::memory::QueueStore;
use relay::test_utils::applier::ApplySink;
use relay::test_utils::event::{data_event, frag_event, stop_event, sync_event};
use relay::test_utils::notify::within_deadline;
use relay::test_utils::stage::{build_stage, queue_plugins};
use relay_config::shared::StageConfig;
use relay_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn skip_count_drops_whole_transactions() {
    init_test_tracing();

    let input = QueueStore::new(64);
    // First transaction is fragmented; the skip counter must only decrement
    // at its final fragment.
    input.put(frag_event(1, 0, false)).await.unwrap();
    input.put(frag_event(1, 1, true)).await.unwrap();
    input.put(data_event(2)).await.unwrap();
    input.put(data_event(3)).await.unwrap();
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        apply_skip_count: 2,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // Transactions 1 and 2 were skipped, 3 was processed normally.
    assert_eq!(sink.committed_seqnos(), vec![3]);

    // Skipped events only touched the position path.
    for record in sink.records() {
        if record.seqno < 3 {
            assert!(record.position_only, "seqno {} must be position-only", record.seqno);
            assert!(record.do_commit);
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_set_drops_listed_seqnos_only() {
    init_test_tracing();

    let input = QueueStore::new(64);
    for seqno in 4..=8 {
        input.put(data_event(seqno)).await.unwrap();
    }
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        skip_seqnos: BTreeSet::from([5, 7]),
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // 5 and 7 were dropped, 6 passed through unaffected, and once the set
    // emptied the remainder of the run was untouched.
    assert_eq!(sink.committed_seqnos(), vec![4, 6, 8]);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_markers_advance_position_without_applying() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input.put(sync_event(41)).await.unwrap();
    input.put(data_event(42)).await.unwrap();
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let (mut stage, _notifications) = build_stage(
        "q-to-dbms",
        StageConfig::default(),
        queue_plugins(input, &sink),
    );

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    assert_eq!(sink.committed_seqnos(), vec![42]);

    // The sync marker reached the applier as a position-only update and the
    // tracker recorded it for the worker.
    let sync_record = sink
        .records()
        .iter()
        .find(|record| record.seqno == 41)
        .cloned()
        .expect("sync position update must reach the applier");
    assert!(sync_record.position_only);
}

#[tokio::test(flavor = "multi_thread")]
async fn position_only_updates_respect_block_boundaries() {
    init_test_tracing();

    let input = QueueStore::new(64);
    input.put(sync_event(1)).await.unwrap();
    input.put(sync_event(2)).await.unwrap();
    input.put(sync_event(3)).await.unwrap();
    input.put(stop_event()).await.unwrap();

    let sink = ApplySink::new();
    let config = StageConfig {
        block_commit_rows: 2,
        ..Default::default()
    };
    let (mut stage, _notifications) = build_stage("q-to-dbms", config, queue_plugins(input, &sink));

    stage.start().unwrap();
    within_deadline(stage.wait()).await.unwrap();

    // With a block threshold of 2 and the queue kept non-empty, only the
    // second marker lands on a block boundary.
    let commits: Vec<(u64, bool)> = sink
        .records()
        .iter()
        .map(|record| (record.seqno, record.do_commit))
        .collect();
    assert_eq!(commits, vec![(1, false), (2, true), (3, false)]);
}
