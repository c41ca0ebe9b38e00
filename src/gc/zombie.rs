use network::{GcZombiePieceTask, Task, TaskKind};
use storage::IntegrityRecord;
use tracing::{debug, info, warn};

use super::{piece_keys, GcWorker, PieceLayout};
use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};
use crate::reporter::{report_progress, ProgressTicker, TaskReporter};

fn state(task: &mut Task) -> Option<&mut GcZombiePieceTask> {
    match &mut task.kind {
        TaskKind::GcZombie(state) => Some(state),
        _ => None,
    }
}

fn record_progress(task: &mut Task, object_id: u64, deleted: u64) {
    if let Some(gc) = state(task) {
        gc.current_object_id = gc.current_object_id.max(object_id);
        gc.deleted_piece_count += deleted;
    }
}

/// Finds pieces this SP stores for objects it no longer serves and removes them.
///
/// Two passes over the object ID range: integrity rows (live and shadow),
/// then the per-piece checksums written while receiving replicas.
pub(crate) async fn handle_gc_zombie_piece_task(
    ctx: &ExecutorContext,
    reporter: &dyn TaskReporter,
    task: &mut Task,
) -> Result<()> {
    let Some(gc) = state(task) else {
        return Err(ExecutorError::DanglingPointer(format!("task {} is not a zombie gc task", task.key)));
    };
    let (start_id, end_id) = (gc.start_object_id, gc.end_object_id);
    if start_id > end_id {
        return Err(ExecutorError::DanglingPointer(format!(
            "zombie gc range [{}, {}] is empty",
            start_id, end_id
        )));
    }

    let worker = GcWorker::new(ctx, "gc_zombie");
    let mut ticker = ProgressTicker::new(ctx.config.report_progress_per_n);
    gc_zombie_integrity(ctx, &worker, reporter, task, &mut ticker, start_id, end_id).await?;
    gc_zombie_piece_checksums(ctx, &worker, reporter, task, &mut ticker, start_id, end_id).await?;

    record_progress(task, end_id, 0);
    info!("Finished zombie gc of objects [{}, {}]", start_id, end_id);
    Ok(())
}

/// Whether the slot an SP holds for this object has no owner anymore.
async fn is_zombie(worker: &GcWorker<'_>, object_id: u64, redundancy_idx: i32) -> Result<(bool, PieceLayout)> {
    let Some(object) = worker.lookup_object(object_id).await? else {
        return Ok((true, PieceLayout::Unknown));
    };
    let layout = PieceLayout::of(Some(&object));
    match worker.check_gvg_match_sp(&object, redundancy_idx).await {
        Ok(()) => Ok((false, layout)),
        Err(e) if e.is_invalid_redundancy_index() => Ok((true, layout)),
        Err(e) => Err(e),
    }
}

async fn gc_zombie_integrity(
    ctx: &ExecutorContext,
    worker: &GcWorker<'_>,
    reporter: &dyn TaskReporter,
    task: &mut Task,
    ticker: &mut ProgressTicker,
    start_id: u64,
    end_id: u64,
) -> Result<()> {
    let records = ctx
        .deps
        .sp_db
        .list_integrity_meta_by_object_id_range(start_id, end_id, true)
        .await?;
    debug!("Zombie gc checks {} integrity rows in [{}, {}]", records.len(), start_id, end_id);

    for record in &records {
        let object_id = record.object_id();
        let redundancy_idx = record.redundancy_index();
        let mut deleted = 0;
        match is_zombie(worker, object_id, redundancy_idx).await {
            Ok((true, layout)) => {
                deleted = worker
                    .delete_object_pieces_logged(
                        object_id,
                        record.segment_count(),
                        redundancy_idx,
                        record.version(),
                        layout,
                    )
                    .await;
                if let Err(e) = delete_integrity_record(ctx, worker, record).await {
                    warn!("Failed to delete integrity of zombie object {}: {}", object_id, e);
                }
                info!(
                    "Removed zombie object {} slot {} version {}: {} pieces",
                    object_id,
                    redundancy_idx,
                    record.version(),
                    deleted
                );
            }
            Ok((false, _)) => {}
            Err(e) => warn!("Failed to check object {} for zombie pieces: {}", object_id, e),
        }

        record_progress(task, object_id, deleted);
        if ticker.tick() {
            report_progress(reporter, task).await?;
        }
    }
    Ok(())
}

async fn delete_integrity_record(ctx: &ExecutorContext, worker: &GcWorker<'_>, record: &IntegrityRecord) -> Result<()> {
    match record {
        IntegrityRecord::Live(meta) => worker.delete_integrity(meta.object_id, meta.redundancy_index).await,
        IntegrityRecord::Shadow(meta) => Ok(ctx
            .deps
            .sp_db
            .delete_shadow_object_integrity(meta.object_id, meta.redundancy_index)
            .await?),
    }
}

async fn gc_zombie_piece_checksums(
    ctx: &ExecutorContext,
    worker: &GcWorker<'_>,
    reporter: &dyn TaskReporter,
    task: &mut Task,
    ticker: &mut ProgressTicker,
    start_id: u64,
    end_id: u64,
) -> Result<()> {
    let metas = ctx
        .deps
        .sp_db
        .list_replicate_piece_checksum_by_object_id_range(start_id, end_id)
        .await?;
    debug!("Zombie gc checks {} piece checksums in [{}, {}]", metas.len(), start_id, end_id);

    for meta in &metas {
        let object = match worker.lookup_object_updating(meta.object_id).await {
            Ok(object) => object,
            Err(e) => {
                warn!("Failed to look up object {}: {}", meta.object_id, e);
                continue;
            }
        };

        let layout = match &object {
            Some((object, true)) => {
                info!("Object {} is being updated, stopping piece checksum gc", object.id);
                return Ok(());
            }
            Some((object, false)) => match worker.check_gvg_match_sp(object, meta.redundancy_index).await {
                Ok(()) => None,
                Err(e) if e.is_invalid_redundancy_index() => Some(PieceLayout::of(Some(object))),
                Err(e) => {
                    warn!("Failed to check object {} for zombie pieces: {}", object.id, e);
                    None
                }
            },
            None => Some(PieceLayout::Unknown),
        };

        let mut deleted = 0;
        if let Some(layout) = layout {
            for key in piece_keys(meta.object_id, meta.segment_index, meta.redundancy_index, meta.version, layout) {
                match worker.delete_piece_tolerant(&key).await {
                    Ok(true) => deleted += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Failed to delete zombie piece {}: {}", key, e),
                }
            }
            if let Err(e) = ctx
                .deps
                .sp_db
                .delete_replicate_piece_checksum(meta.object_id, meta.segment_index, meta.redundancy_index)
                .await
            {
                warn!("Failed to delete piece checksum of object {}: {}", meta.object_id, e);
            }
        }

        record_progress(task, meta.object_id, deleted);
        if ticker.tick() {
            report_progress(reporter, task).await?;
        }
    }
    Ok(())
}
