use chain::ObjectInfo;
use network::{GcObjectTask, Task, TaskKind};
use storage::{segment_count, PRIMARY_REDUNDANCY_INDEX};
use tracing::{debug, info, warn};

use super::{is_allow_gc, GcWorker, PieceLayout};
use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};
use crate::reporter::{report_progress, ProgressTicker, TaskReporter};

fn state(task: &mut Task) -> Option<&mut GcObjectTask> {
    match &mut task.kind {
        TaskKind::GcObject(state) => Some(state),
        _ => None,
    }
}

/// Removes pieces of objects deleted on chain within a block range.
pub(crate) async fn handle_gc_object_task(
    ctx: &ExecutorContext,
    reporter: &dyn TaskReporter,
    task: &mut Task,
) -> Result<()> {
    let Some(gc) = state(task) else {
        return Err(ExecutorError::DanglingPointer(format!("task {} is not an object gc task", task.key)));
    };
    let (start_block, end_block) = (gc.start_block_number, gc.end_block_number);
    if gc.current_block_number < start_block {
        gc.current_block_number = start_block;
    }

    let (deleted_objects, indexed_end) = ctx
        .deps
        .metadata
        .list_deleted_objects_by_block_number_range(&ctx.config.operator_address, start_block, end_block, true)
        .await?;

    if indexed_end < start_block || indexed_end < end_block {
        info!(
            "Metadata indexed up to block {}, gc range is [{}, {}]; trying again later",
            indexed_end, start_block, end_block
        );
        if let Some(gc) = state(task) {
            gc.try_again_later = true;
        }
        return Ok(());
    }

    if deleted_objects.is_empty() {
        if let Some(gc) = state(task) {
            gc.has_no_object = true;
            gc.current_block_number = end_block + 1;
        }
        debug!("No deleted objects in blocks [{}, {}]", start_block, end_block);
        return Ok(());
    }

    let worker = GcWorker::new(ctx, "gc_object");
    let mut ticker = ProgressTicker::new(ctx.config.report_progress_per_n);
    for deleted in &deleted_objects {
        let object = &deleted.object_info;
        let current = state(task).map(|gc| gc.current_block_number).unwrap_or(start_block);
        if deleted.delete_at < current {
            debug!("Object {} deleted at block {} is behind block {}, skipping", object.id, deleted.delete_at, current);
            continue;
        }

        // Lookup failures abort with the cursor still on the last collected
        // object, so the manager re-dispatches from there.
        if let Err(e) = gc_deleted_object(ctx, &worker, object).await {
            warn!("Failed to gc object {} deleted at block {}: {}", object.id, deleted.delete_at, e);
            return Err(e);
        }

        if let Some(gc) = state(task) {
            gc.current_block_number = gc.current_block_number.max(deleted.delete_at);
            gc.last_deleted_object_id = object.id;
            ctx.metrics.gc_object_block_number.set(gc.current_block_number as i64);
        }
        if ticker.tick() {
            report_progress(reporter, task).await?;
        }
    }

    if let Some(gc) = state(task) {
        gc.current_block_number = gc.current_block_number.max(end_block + 1);
    }
    info!("Finished object gc of blocks [{}, {}]", start_block, end_block);
    Ok(())
}

async fn gc_deleted_object(ctx: &ExecutorContext, worker: &GcWorker<'_>, object: &ObjectInfo) -> Result<()> {
    let bucket = ctx
        .deps
        .metadata
        .get_bucket_info_by_bucket_name(&object.bucket_name)
        .await?;
    if !is_allow_gc(object, &bucket) {
        info!(
            "Keeping object {}: status {:?}, bucket {} {:?}",
            object.id, object.status, bucket.bucket_name, bucket.status
        );
        return Ok(());
    }

    let params = ctx
        .deps
        .chain
        .query_storage_params_by_timestamp(object.params_timestamp())
        .await?;
    let gvg = ctx
        .deps
        .metadata
        .get_global_virtual_group(bucket.id, object.local_virtual_group_id)
        .await?;
    let sp_id = ctx.sp_id().await?;

    let seg_count = segment_count(object.payload_size, params.max_segment_size);
    let layout = PieceLayout::of(Some(object));
    let mut deleted = worker
        .delete_object_pieces_logged(object.id, seg_count, PRIMARY_REDUNDANCY_INDEX, object.version, layout)
        .await;
    for (redundancy_idx, secondary) in gvg.secondary_sp_ids.iter().enumerate() {
        if *secondary != sp_id {
            continue;
        }
        let redundancy_idx = redundancy_idx as i32;
        deleted += worker
            .delete_object_pieces_logged(object.id, seg_count, redundancy_idx, object.version, layout)
            .await;
        worker.delete_integrity_logged(object.id, redundancy_idx).await;
    }
    worker.delete_integrity_logged(object.id, PRIMARY_REDUNDANCY_INDEX).await;

    info!("Collected object {}: {} pieces removed", object.id, deleted);
    Ok(())
}
