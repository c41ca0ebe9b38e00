use network::{Task, TaskKind};
use storage::{piece_key, segment_count};
use tracing::{debug, info, warn};

use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};
use crate::gc::GcWorker;
use crate::seal::listen_seal;

/// Runs on a secondary after it received every piece of an object: waits for
/// the seal and confirms this SP kept its slot. A secondary that lost the slot
/// drops what it stored.
pub(crate) async fn handle_receive_piece_task(ctx: &ExecutorContext, task: &mut Task) -> Result<()> {
    let TaskKind::ReceiveConfirm(receive) = &task.kind else {
        return Err(ExecutorError::DanglingPointer(format!("task {} is not a receive task", task.key)));
    };
    let receive = receive.clone();
    let object_id = receive.object_info.id;
    if receive.redundancy_idx < 0 {
        return Err(ExecutorError::DanglingPointer(format!(
            "receive task for object {} has no secondary index",
            object_id
        )));
    }

    if let Err(e) = listen_seal(ctx, object_id).await {
        debug!("Listen seal for object {} ended without a seal: {}", object_id, e);
    }

    let object = ctx.deps.chain.query_object_info_by_id(object_id).await?;
    if !object.is_sealed() {
        warn!("Object {} is still {:?} on chain", object_id, object.status);
        return Err(ExecutorError::Unsealed(object_id));
    }
    if let TaskKind::ReceiveConfirm(state) = &mut task.kind {
        state.sealed = true;
    }

    let bucket = ctx
        .deps
        .metadata
        .get_bucket_info_by_bucket_name(&object.bucket_name)
        .await?;
    let gvg = ctx
        .deps
        .metadata
        .get_global_virtual_group(bucket.id, object.local_virtual_group_id)
        .await?;
    let Some(holder) = gvg.secondary_sp_ids.get(receive.redundancy_idx as usize) else {
        return Err(ExecutorError::ReplicateIdxOutOfBounds {
            gvg_id: gvg.id,
            redundancy_idx: receive.redundancy_idx,
        });
    };

    let sp_id = ctx.sp_id().await?;
    if *holder == sp_id {
        info!("Confirmed object {} sealed with this SP as secondary {}", object_id, receive.redundancy_idx);
        return Ok(());
    }

    warn!(
        "Object {} sealed with SP {} as secondary {}, not this SP {}; discarding local pieces",
        object_id, holder, receive.redundancy_idx, sp_id
    );
    if let Err(e) = ctx
        .deps
        .sp_db
        .delete_object_integrity(object_id, receive.redundancy_idx)
        .await
    {
        warn!("Failed to delete integrity of object {}: {}", object_id, e);
    }

    let worker = GcWorker::new(ctx, "receive");
    let seg_count = segment_count(object.payload_size, receive.storage_params.max_segment_size);
    for segment_idx in 0..seg_count {
        let key = piece_key(
            object_id,
            segment_idx,
            receive.redundancy_idx,
            object.version,
            object.is_erasure_coded(),
        );
        if let Err(e) = worker.delete_piece_tolerant(&key).await {
            warn!("Failed to delete piece {} of object {}: {}", key, object_id, e);
        }
    }

    Err(ExecutorError::SecondaryMismatch {
        object_id,
        redundancy_idx: receive.redundancy_idx,
    })
}
