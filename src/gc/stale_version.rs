use chain::ObjectInfo;
use network::{GcStaleVersionObjectTask, Task, TaskKind};
use storage::{IntegrityMeta, IntegrityRecord, PRIMARY_REDUNDANCY_INDEX};
use tracing::{info, warn};

use super::{GcWorker, PieceLayout};
use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};

/// Settles the pieces an object update left behind, once the chain says which
/// version won.
pub(crate) async fn handle_gc_stale_version_object_task(ctx: &ExecutorContext, task: &mut Task) -> Result<()> {
    let TaskKind::GcStaleVersion(gc) = &task.kind else {
        return Err(ExecutorError::DanglingPointer(format!(
            "task {} is not a stale version gc task",
            task.key
        )));
    };
    let gc = gc.clone();
    let worker = GcWorker::new(ctx, "gc_stale_version");

    let object = match ctx.deps.chain.query_object_info_by_id(gc.object_id).await {
        Ok(object) => Some(object),
        Err(e) if e.is_no_such_object() => None,
        Err(e) => return Err(e.into()),
    };

    match object {
        None => {
            info!("Object {} is gone, dropping version {}", gc.object_id, gc.version);
            discard_task_version(ctx, &worker, &gc, PieceLayout::Unknown).await
        }
        Some(object) if gc.version < object.version => {
            info!(
                "Object {} moved on to version {}, dropping version {}",
                gc.object_id, object.version, gc.version
            );
            discard_task_version(ctx, &worker, &gc, PieceLayout::of(Some(&object))).await
        }
        Some(object) if gc.version == object.version => {
            if object.is_updating {
                info!("Object {} version {} is mid-update, dropping it", gc.object_id, gc.version);
                discard_task_version(ctx, &worker, &gc, PieceLayout::of(Some(&object))).await
            } else {
                install_task_version(ctx, &worker, &gc, &object).await
            }
        }
        Some(object) => {
            if object.is_updating {
                info!(
                    "Object {} update to version {} still in flight, leaving it",
                    gc.object_id, gc.version
                );
                Ok(())
            } else {
                info!("Update of object {} to version {} was abandoned", gc.object_id, gc.version);
                discard_task_version(ctx, &worker, &gc, PieceLayout::of(Some(&object))).await
            }
        }
    }
}

async fn discard_task_version(
    ctx: &ExecutorContext,
    worker: &GcWorker<'_>,
    gc: &GcStaleVersionObjectTask,
    layout: PieceLayout,
) -> Result<()> {
    worker
        .delete_object_pieces(
            gc.object_id,
            gc.piece_checksum_list.len() as u32,
            gc.redundancy_index,
            gc.version,
            layout,
        )
        .await?;
    ctx.deps
        .sp_db
        .delete_shadow_object_integrity(gc.object_id, gc.redundancy_index)
        .await?;
    Ok(())
}

/// Promotes the shadow integrity to live, then drops the previous version's pieces.
async fn install_task_version(
    ctx: &ExecutorContext,
    worker: &GcWorker<'_>,
    gc: &GcStaleVersionObjectTask,
    object: &ObjectInfo,
) -> Result<()> {
    let sp_db = &ctx.deps.sp_db;
    let layout = PieceLayout::of(Some(object));

    let previous = if gc.redundancy_index == PRIMARY_REDUNDANCY_INDEX {
        sp_db.get_object_integrity(gc.object_id, PRIMARY_REDUNDANCY_INDEX).await?
    } else {
        // A secondary may have served this object from another slot before the update.
        sp_db
            .list_integrity_meta_by_object_id_range(gc.object_id, gc.object_id, false)
            .await?
            .into_iter()
            .find_map(|record| match record {
                IntegrityRecord::Live(meta) if meta.redundancy_index != PRIMARY_REDUNDANCY_INDEX => Some(meta),
                _ => None,
            })
    };

    if let Some(previous) = &previous {
        if previous.redundancy_index != gc.redundancy_index {
            sp_db
                .delete_object_integrity(gc.object_id, previous.redundancy_index)
                .await?;
        }
    }

    sp_db
        .set_object_integrity(&IntegrityMeta {
            object_id: gc.object_id,
            redundancy_index: gc.redundancy_index,
            integrity_checksum: gc.integrity_checksum.clone(),
            piece_checksum_list: gc.piece_checksum_list.clone(),
            version: gc.version,
        })
        .await?;

    match &previous {
        Some(previous) if previous.version != gc.version => {
            let deleted = worker
                .delete_object_pieces(
                    gc.object_id,
                    previous.piece_checksum_list.len() as u32,
                    previous.redundancy_index,
                    gc.version - 1,
                    layout,
                )
                .await?;
            info!(
                "Installed version {} of object {}, removed {} pieces of version {}",
                gc.version,
                gc.object_id,
                deleted,
                gc.version - 1
            );
        }
        Some(_) => info!("Version {} of object {} was already live", gc.version, gc.object_id),
        None => warn!(
            "Object {} had no live integrity before version {}",
            gc.object_id, gc.version
        ),
    }

    sp_db
        .delete_shadow_object_integrity(gc.object_id, gc.redundancy_index)
        .await?;
    Ok(())
}
