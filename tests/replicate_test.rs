use sp_executor::chain::RedundancyType;
use sp_executor::error::{ERR_CODE_DANGLING_POINTER, ERR_CODE_INVALID_INTEGRITY};
use sp_executor::network::{ReplicatePieceTask, Task, TaskKind};
use sp_executor::storage::{piece_checksum, segment_piece_key};
use sp_executor::ExecutorError;
use sp_executor_tests::mock::*;

fn replicate_task(payload_size: u64, redundancy_type: RedundancyType, secondaries: usize) -> Task {
    let mut object = object(100, payload_size, redundancy_type);
    // Primary hash first, then one hash per secondary.
    object.checksums = (0..=6).map(|i| vec![i as u8; 32]).collect();
    Task::new(
        "replicate-100",
        2,
        TaskKind::Replicate(ReplicatePieceTask {
            object_info: object,
            storage_params: storage_params(),
            global_virtual_group_id: 1,
            secondary_endpoints: endpoints(secondaries),
            secondary_signatures: Vec::new(),
            aggregate_signature: Vec::new(),
            sealed: false,
        }),
    )
}

async fn store_segments(harness: &Harness, object_id: u64, segments: &[&[u8]]) {
    for (idx, data) in segments.iter().enumerate() {
        harness
            .piece_store
            .put(&segment_piece_key(object_id, idx as u32, 0), data)
            .await;
    }
}

fn replicate_state(task: &Task) -> &ReplicatePieceTask {
    match &task.kind {
        TaskKind::Replicate(state) => state,
        other => panic!("unexpected task kind {}", other.name()),
    }
}

#[tokio::test]
async fn test_replicate_ec_object_and_seal() {
    let harness = Harness::new();
    store_segments(&harness, 100, &[&[1u8; 16], &[2u8; 16], &[3u8; 16]]).await;
    let mut task = replicate_task(48, RedundancyType::Ec, 6);

    harness.executor.execute_task(&mut task).await.unwrap();

    let uploads = harness.secondary.uploads();
    assert_eq!(uploads.len(), 18);
    for upload in &uploads {
        let idx = upload.task.redundancy_idx as usize;
        assert_eq!(upload.endpoint, endpoints(6)[idx]);
        assert_eq!(upload.data.len(), 4);
        assert_eq!(upload.task.piece_size, 4);
        assert_eq!(upload.task.piece_checksum, piece_checksum(&upload.data));
        assert!(!upload.task.signature.is_empty());
    }
    for segment in 0..3 {
        assert_eq!(uploads.iter().filter(|u| u.task.piece_idx == segment).count(), 6);
    }

    let done = harness.secondary.done_calls();
    assert_eq!(done.len(), 6);
    assert!(done.iter().all(|(_, receive)| receive.is_done_request()));

    let expected: Vec<Vec<u8>> = (0..6).map(secondary_signature).collect();
    assert_eq!(harness.signer.aggregated(), vec![expected.clone()]);

    let seals = harness.chain.seal_calls();
    assert_eq!(seals.len(), 1);
    assert_eq!(seals[0].secondary_sp_bls_agg_signatures, aggregate(&expected));
    assert_eq!(seals[0].operator, OPERATOR);
    assert_eq!(seals[0].object_name, "object-100");
    assert_eq!(harness.chain.listen_calls(), vec![(100, 10)]);

    let state = replicate_state(&task);
    assert!(state.sealed);
    assert_eq!(state.secondary_signatures, expected);
    assert_eq!(state.aggregate_signature, aggregate(&expected));
    assert!(task.error.is_none());
}

#[tokio::test]
async fn test_replica_object_sends_whole_segments() {
    let harness = Harness::new();
    store_segments(&harness, 100, &[&[7u8; 16], &[8u8; 4]]).await;
    let mut task = replicate_task(20, RedundancyType::Replica, 6);

    harness.executor.execute_task(&mut task).await.unwrap();

    let uploads = harness.secondary.uploads();
    assert_eq!(uploads.len(), 12);
    for upload in uploads.iter().filter(|u| u.task.piece_idx == 1) {
        assert_eq!(upload.data.as_ref(), &[8u8; 4]);
    }
    assert!(replicate_state(&task).sealed);
}

#[tokio::test]
async fn test_failed_upload_skips_seal() {
    let harness = Harness::new();
    store_segments(&harness, 100, &[&[1u8; 16], &[2u8; 16], &[3u8; 16]]).await;
    harness.secondary.fail_endpoint(&endpoints(6)[3]);
    let mut task = replicate_task(48, RedundancyType::Ec, 6);

    let err = harness.executor.execute_task(&mut task).await.unwrap_err();

    assert!(matches!(err, ExecutorError::Network(_)));
    // The first segment's fan-out still completes for the healthy secondaries.
    assert_eq!(harness.secondary.uploads().len(), 5);
    assert!(harness.secondary.done_calls().is_empty());
    assert!(harness.chain.seal_calls().is_empty());
    assert!(!replicate_state(&task).sealed);
}

#[tokio::test]
async fn test_bad_secondary_signature_fails_integrity() {
    let harness = Harness::new();
    store_segments(&harness, 100, &[&[1u8; 16]]).await;
    harness.signer.reject_secondary(2);
    let mut task = replicate_task(16, RedundancyType::Ec, 6);

    let err = harness.executor.execute_task(&mut task).await.unwrap_err();

    assert_eq!(err.code(), ERR_CODE_INVALID_INTEGRITY);
    assert_eq!(harness.secondary.done_calls().len(), 3);
    assert!(harness.signer.aggregated().is_empty());
    assert!(harness.chain.seal_calls().is_empty());
}

#[tokio::test]
async fn test_endpoint_count_must_match_redundancy() {
    let harness = Harness::new();
    store_segments(&harness, 100, &[&[1u8; 16]]).await;
    let mut task = replicate_task(16, RedundancyType::Ec, 5);

    let err = harness.executor.execute_task(&mut task).await.unwrap_err();

    assert_eq!(err.code(), ERR_CODE_DANGLING_POINTER);
    assert!(harness.secondary.uploads().is_empty());
}

#[tokio::test]
async fn test_missing_segment_fails_before_upload() {
    let harness = Harness::new();
    let mut task = replicate_task(16, RedundancyType::Ec, 6);

    let err = harness.executor.execute_task(&mut task).await.unwrap_err();

    assert!(matches!(err, ExecutorError::PieceStore(_)));
    assert!(harness.secondary.uploads().is_empty());
}

#[tokio::test]
async fn test_cancel_during_replication_stops_fan_out() {
    let mut config = test_config();
    config.report_progress_per_n = 1;
    let harness = Harness::with_config(config);
    store_segments(&harness, 100, &[&[1u8; 16], &[2u8; 16], &[3u8; 16]]).await;
    harness.manager.cancel_from_report(2);
    let mut task = replicate_task(48, RedundancyType::Ec, 6);

    let err = harness.executor.execute_task(&mut task).await.unwrap_err();

    assert!(matches!(err, ExecutorError::Canceled));
    assert_eq!(harness.manager.reports().len(), 2);
    assert_eq!(harness.secondary.uploads().len(), 12);
    assert!(harness.chain.seal_calls().is_empty());
    assert!(task.error.is_none());
}
