use network::{GcBucketMigrationTask, Task, TaskKind};
use storage::{segment_count, PRIMARY_REDUNDANCY_INDEX};
use tracing::{debug, info};

use super::{GcWorker, PieceLayout};
use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};
use crate::reporter::{report_progress, ProgressTicker, TaskReporter};

const LIST_OBJECTS_LIMIT: u32 = 100;

fn state(task: &mut Task) -> Option<&mut GcBucketMigrationTask> {
    match &mut task.kind {
        TaskKind::GcBucketMigration(state) => Some(state),
        _ => None,
    }
}

/// Cleans up primary pieces left behind after a bucket moved to another SP.
pub(crate) async fn handle_gc_bucket_migration_task(
    ctx: &ExecutorContext,
    reporter: &dyn TaskReporter,
    task: &mut Task,
) -> Result<()> {
    let Some(gc) = state(task) else {
        return Err(ExecutorError::DanglingPointer(format!(
            "task {} is not a bucket migration gc task",
            task.key
        )));
    };
    let bucket_id = gc.bucket_id;
    let (resume_gvg_id, resume_object_id) = (gc.last_gc_gvg_id, gc.last_gc_object_id);

    let mut gvgs = ctx.deps.metadata.list_global_virtual_groups_by_bucket(bucket_id).await?;
    let bucket = ctx.deps.chain.query_bucket_info_by_id(bucket_id).await?;
    for gvg in &gvgs {
        if gvg.family_id != bucket.global_virtual_group_family_id {
            return Err(ExecutorError::GvgFamilyMismatch {
                gvg_id: gvg.id,
                expected: bucket.global_virtual_group_family_id,
                actual: gvg.family_id,
            });
        }
    }
    gvgs.sort_by_key(|gvg| gvg.id);
    if let Some(gc) = state(task) {
        gc.total_gvg_num = gvgs.len() as u32;
    }

    let worker = GcWorker::new(ctx, "gc_bucket_migration");
    let mut ticker = ProgressTicker::new(ctx.config.report_progress_per_n);
    for gvg in &gvgs {
        if resume_gvg_id != 0 && gvg.id < resume_gvg_id {
            continue;
        }
        let mut start_after = if gvg.id == resume_gvg_id { resume_object_id } else { 0 };
        loop {
            let objects = ctx
                .deps
                .metadata
                .list_objects_by_gvg_and_bucket_for_gc(gvg.id, bucket_id, start_after, LIST_OBJECTS_LIMIT)
                .await?;
            debug!(
                "Bucket {} gvg {}: {} objects after {}",
                bucket_id,
                gvg.id,
                objects.len(),
                start_after
            );

            for object in &objects {
                match worker.check_gvg_match_sp(object, PRIMARY_REDUNDANCY_INDEX).await {
                    Ok(()) => {}
                    Err(e) if e.is_invalid_redundancy_index() => {
                        let params = ctx
                            .deps
                            .chain
                            .query_storage_params_by_timestamp(object.params_timestamp())
                            .await?;
                        let seg_count = segment_count(object.payload_size, params.max_segment_size);
                        let deleted = worker
                            .delete_object_pieces_logged(
                                object.id,
                                seg_count,
                                PRIMARY_REDUNDANCY_INDEX,
                                object.version,
                                PieceLayout::of(Some(object)),
                            )
                            .await;
                        worker.delete_integrity(object.id, PRIMARY_REDUNDANCY_INDEX).await?;
                        info!("Removed migrated object {} from bucket {}: {} pieces", object.id, bucket_id, deleted);
                    }
                    Err(e) => return Err(e),
                }

                if let Some(gc) = state(task) {
                    gc.last_gc_gvg_id = gvg.id;
                    gc.last_gc_object_id = object.id;
                }
                if ticker.tick() {
                    report_progress(reporter, task).await?;
                }
            }

            match objects.last() {
                Some(last) if objects.len() as u32 >= LIST_OBJECTS_LIMIT => start_after = last.id,
                _ => break,
            }
        }

        if let Some(gc) = state(task) {
            gc.last_gc_gvg_id = gvg.id;
            gc.gc_finished_gvg_num += 1;
        }
    }

    if let Some(gc) = state(task) {
        gc.finished = true;
    }
    info!("Finished migration gc of bucket {} across {} gvgs", bucket_id, gvgs.len());
    Ok(())
}
