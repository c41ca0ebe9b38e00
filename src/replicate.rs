use bytes::Bytes;
use chain::MsgSealObject;
use futures::future::join_all;
use network::{ReceivePieceTask, ReplicatePieceTask, Task, TaskKind};
use std::time::Instant;
use storage::{piece_checksum, segment_count, segment_piece_key};
use tracing::{debug, error, info, warn};

use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};
use crate::reporter::{report_progress, ProgressTicker, TaskReporter};
use crate::seal::seal_object;

/// Pushes every segment of an object to its secondaries, collects their
/// signatures and seals the object.
pub(crate) async fn handle_replicate_piece_task(
    ctx: &ExecutorContext,
    reporter: &dyn TaskReporter,
    task: &mut Task,
) -> Result<()> {
    let TaskKind::Replicate(replicate) = &task.kind else {
        return Err(ExecutorError::DanglingPointer(format!("task {} is not a replicate task", task.key)));
    };
    let replicate = replicate.clone();
    let object = &replicate.object_info;
    let params = &replicate.storage_params;

    let replica_count = params.redundancy_count() as usize;
    if replica_count == 0 || replicate.secondary_endpoints.len() != replica_count {
        return Err(ExecutorError::DanglingPointer(format!(
            "object {} needs {} secondary endpoints, task has {}",
            object.id,
            replica_count,
            replicate.secondary_endpoints.len()
        )));
    }

    let seg_count = segment_count(object.payload_size, params.max_segment_size);
    info!(
        "Replicating object {} ({} segments) to {} secondaries",
        object.id, seg_count, replica_count
    );

    let priority = task.priority;
    let mut ticker = ProgressTicker::new(ctx.config.report_progress_per_n);
    for segment_idx in 0..seg_count {
        let pieces = split_segment(ctx, &replicate, segment_idx, replica_count).await?;

        let deliveries = pieces
            .into_iter()
            .enumerate()
            .map(|(redundancy_idx, data)| deliver_piece(ctx, &replicate, priority, segment_idx, redundancy_idx, data));
        for result in join_all(deliveries).await {
            result?;
        }

        if ticker.tick() {
            task.append_log(format!("replicated {}/{} segments", segment_idx + 1, seg_count));
            report_progress(reporter, task).await?;
        }
    }

    let mut signatures = Vec::with_capacity(replica_count);
    for (redundancy_idx, endpoint) in replicate.secondary_endpoints.iter().enumerate() {
        signatures.push(done_replicate(ctx, &replicate, priority, redundancy_idx, endpoint).await?);
    }

    let aggregate = ctx.deps.signer.aggregate_bls_signatures(&signatures)?;
    if let TaskKind::Replicate(state) = &mut task.kind {
        state.secondary_signatures = signatures;
        state.aggregate_signature = aggregate.clone();
    }

    let msg = MsgSealObject {
        operator: ctx.config.operator_address.clone(),
        bucket_name: object.bucket_name.clone(),
        object_name: object.object_name.clone(),
        global_virtual_group_id: replicate.global_virtual_group_id,
        secondary_sp_bls_agg_signatures: aggregate,
    };
    seal_object(ctx, &msg, object.id, task.max_retry, task.timeout).await?;

    if let TaskKind::Replicate(state) = &mut task.kind {
        state.sealed = true;
    }
    info!("Replicated and sealed object {}", object.id);
    Ok(())
}

/// Reads a segment and produces the piece each secondary receives, in
/// secondary order.
async fn split_segment(
    ctx: &ExecutorContext,
    replicate: &ReplicatePieceTask,
    segment_idx: u32,
    replica_count: usize,
) -> Result<Vec<Bytes>> {
    let object = &replicate.object_info;
    let params = &replicate.storage_params;
    let key = segment_piece_key(object.id, segment_idx, object.version);

    let start = Instant::now();
    let segment = ctx.deps.piece_store.get_piece(&key, 0, 0).await.map_err(|e| {
        error!("Failed to read segment {} of object {}: {}", key, object.id, e);
        e
    })?;
    ctx.metrics.piece_read_time.observe(start.elapsed().as_secs_f64());

    if !object.is_erasure_coded() {
        return Ok(vec![segment; replica_count]);
    }

    let shards = ctx.deps.encoder.encode(
        &segment,
        params.redundant_data_chunk_num,
        params.redundant_parity_chunk_num,
    )?;
    if shards.len() != replica_count {
        return Err(storage::EncodeError::Failed(format!(
            "segment {} encoded into {} shards, expected {}",
            key,
            shards.len(),
            replica_count
        ))
        .into());
    }
    Ok(shards)
}

fn receive_task(replicate: &ReplicatePieceTask, priority: u8, redundancy_idx: usize, piece_idx: i32) -> ReceivePieceTask {
    ReceivePieceTask {
        object_info: replicate.object_info.clone(),
        storage_params: replicate.storage_params.clone(),
        global_virtual_group_id: replicate.global_virtual_group_id,
        priority,
        redundancy_idx: redundancy_idx as i32,
        piece_idx,
        piece_size: 0,
        piece_checksum: Vec::new(),
        signature: Vec::new(),
        sealed: false,
    }
}

async fn deliver_piece(
    ctx: &ExecutorContext,
    replicate: &ReplicatePieceTask,
    priority: u8,
    segment_idx: u32,
    redundancy_idx: usize,
    data: Bytes,
) -> Result<()> {
    let endpoint = &replicate.secondary_endpoints[redundancy_idx];
    let mut receive = receive_task(replicate, priority, redundancy_idx, segment_idx as i32);
    receive.piece_size = data.len() as u64;
    receive.piece_checksum = piece_checksum(&data);
    receive.signature = ctx.deps.signer.sign_receive_task(&receive).await?;

    let start = Instant::now();
    let result = ctx
        .deps
        .secondary
        .replicate_piece_to_secondary(endpoint, &receive, data)
        .await;
    ctx.metrics
        .replicate_piece_time
        .with_label_values(&["upload"])
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            ctx.metrics.replicate_piece_counter.with_label_values(&["success"]).inc();
            debug!(
                object_id = replicate.object_info.id,
                segment_idx,
                redundancy_idx,
                endpoint = endpoint.as_str(),
                "upload-event: piece delivered"
            );
            Ok(())
        }
        Err(e) => {
            ctx.metrics.replicate_piece_counter.with_label_values(&["failure"]).inc();
            error!(
                "Failed to replicate piece {} of object {} to {}: {}",
                segment_idx, replicate.object_info.id, endpoint, e
            );
            Err(e.into())
        }
    }
}

/// Closes out one secondary and returns its verified signature.
async fn done_replicate(
    ctx: &ExecutorContext,
    replicate: &ReplicatePieceTask,
    priority: u8,
    redundancy_idx: usize,
    endpoint: &str,
) -> Result<Vec<u8>> {
    let object = &replicate.object_info;
    let mut done = receive_task(replicate, priority, redundancy_idx, -1);
    done.signature = ctx.deps.signer.sign_receive_task(&done).await?;

    let start = Instant::now();
    let signature = ctx
        .deps
        .secondary
        .done_replicate_piece_to_secondary(endpoint, &done)
        .await
        .map_err(|e| {
            error!("Failed to finish replicating object {} to {}: {}", object.id, endpoint, e);
            e
        })?;
    ctx.metrics
        .replicate_piece_time
        .with_label_values(&["done"])
        .observe(start.elapsed().as_secs_f64());

    match object.secondary_integrity_hash(redundancy_idx) {
        Some(integrity_hash) => {
            let valid = ctx
                .deps
                .signer
                .verify_secondary_bls_signature(
                    replicate.global_virtual_group_id,
                    redundancy_idx as u32,
                    object.id,
                    integrity_hash,
                    &signature,
                )
                .await?;
            if !valid {
                warn!("Secondary {} returned a bad signature for object {}", endpoint, object.id);
                return Err(ExecutorError::InvalidIntegrity {
                    object_id: object.id,
                    redundancy_idx: redundancy_idx as u32,
                });
            }
        }
        None => debug!(
            "Object {} has no integrity hash for secondary {}, skipping signature check",
            object.id, redundancy_idx
        ),
    }
    Ok(signature)
}
