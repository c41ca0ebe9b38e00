//! Garbage collection engines.
//!
//! Every engine deletes through [`GcWorker`], which treats a missing piece as
//! already deleted so that a re-run after a crash or cancel converges.

mod bucket_migration;
mod meta;
mod object;
mod stale_version;
mod zombie;

pub(crate) use bucket_migration::handle_gc_bucket_migration_task;
pub(crate) use meta::handle_gc_meta_task;
pub(crate) use object::handle_gc_object_task;
pub(crate) use stale_version::handle_gc_stale_version_object_task;
pub(crate) use zombie::handle_gc_zombie_piece_task;

use chain::{BucketInfo, ObjectInfo};
use storage::{ec_piece_key, segment_piece_key, PRIMARY_REDUNDANCY_INDEX};
use tracing::{debug, warn};

use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};

/// An object may only be collected once it is sealed and its bucket is not moving.
pub(crate) fn is_allow_gc(object: &ObjectInfo, bucket: &BucketInfo) -> bool {
    object.is_sealed() && !bucket.is_migrating()
}

/// How an object's secondary pieces are keyed. `Unknown` covers objects that
/// no longer exist anywhere, whose redundancy type cannot be looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PieceLayout {
    ErasureCoded,
    Replicated,
    Unknown,
}

impl PieceLayout {
    pub(crate) fn of(object: Option<&ObjectInfo>) -> Self {
        match object {
            Some(object) if object.is_erasure_coded() => PieceLayout::ErasureCoded,
            Some(_) => PieceLayout::Replicated,
            None => PieceLayout::Unknown,
        }
    }
}

/// Keys a piece may be stored under.
pub(crate) fn piece_keys(
    object_id: u64,
    segment_idx: u32,
    redundancy_idx: i32,
    version: i64,
    layout: PieceLayout,
) -> Vec<String> {
    if redundancy_idx < 0 {
        return vec![segment_piece_key(object_id, segment_idx, version)];
    }
    let ec = ec_piece_key(object_id, segment_idx, redundancy_idx as u32, version);
    match layout {
        PieceLayout::ErasureCoded => vec![ec],
        PieceLayout::Replicated => vec![segment_piece_key(object_id, segment_idx, version)],
        PieceLayout::Unknown => vec![ec, segment_piece_key(object_id, segment_idx, version)],
    }
}

pub(crate) struct GcWorker<'a> {
    ctx: &'a ExecutorContext,
    kind: &'static str,
}

impl<'a> GcWorker<'a> {
    pub(crate) fn new(ctx: &'a ExecutorContext, kind: &'static str) -> Self {
        Self { ctx, kind }
    }

    /// Deletes a piece. Returns `false` when it was already gone.
    pub(crate) async fn delete_piece_tolerant(&self, key: &str) -> Result<bool> {
        match self.ctx.deps.piece_store.delete_piece(key).await {
            Ok(()) => {
                self.ctx.metrics.gc_deleted_pieces.with_label_values(&[self.kind]).inc();
                debug!("Deleted piece {}", key);
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every piece of one redundancy slot, stopping at the first failure.
    pub(crate) async fn delete_object_pieces(
        &self,
        object_id: u64,
        seg_count: u32,
        redundancy_idx: i32,
        version: i64,
        layout: PieceLayout,
    ) -> Result<u64> {
        let mut deleted = 0;
        for segment_idx in 0..seg_count {
            for key in piece_keys(object_id, segment_idx, redundancy_idx, version, layout) {
                if self.delete_piece_tolerant(&key).await? {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    /// Like [`Self::delete_object_pieces`], but logs failures and keeps going.
    pub(crate) async fn delete_object_pieces_logged(
        &self,
        object_id: u64,
        seg_count: u32,
        redundancy_idx: i32,
        version: i64,
        layout: PieceLayout,
    ) -> u64 {
        let mut deleted = 0;
        for segment_idx in 0..seg_count {
            for key in piece_keys(object_id, segment_idx, redundancy_idx, version, layout) {
                match self.delete_piece_tolerant(&key).await {
                    Ok(true) => deleted += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Failed to delete piece {} of object {}: {}", key, object_id, e),
                }
            }
        }
        deleted
    }

    pub(crate) async fn delete_integrity(&self, object_id: u64, redundancy_idx: i32) -> Result<()> {
        self.ctx
            .deps
            .sp_db
            .delete_object_integrity(object_id, redundancy_idx)
            .await?;
        self.ctx.metrics.gc_deleted_integrity.with_label_values(&[self.kind]).inc();
        Ok(())
    }

    pub(crate) async fn delete_integrity_logged(&self, object_id: u64, redundancy_idx: i32) {
        if let Err(e) = self.delete_integrity(object_id, redundancy_idx).await {
            warn!("Failed to delete integrity of object {} index {}: {}", object_id, redundancy_idx, e);
        }
    }

    /// Looks an object up in metadata, falling back to the chain. `None` means
    /// neither knows it.
    pub(crate) async fn lookup_object(&self, object_id: u64) -> Result<Option<ObjectInfo>> {
        match self.ctx.deps.metadata.get_object_by_id(object_id).await {
            Ok(object) => return Ok(Some(object)),
            Err(e) if e.is_no_such_object() => {}
            Err(e) => return Err(e.into()),
        }
        match self.ctx.deps.chain.query_object_info_by_id(object_id).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_no_such_object() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`Self::lookup_object`], also returning whether the chain reports
    /// the object as mid-update. Metadata may lag behind an update, so the
    /// flag always comes from the chain.
    pub(crate) async fn lookup_object_updating(&self, object_id: u64) -> Result<Option<(ObjectInfo, bool)>> {
        let chain = &self.ctx.deps.chain;
        match self.ctx.deps.metadata.get_object_by_id(object_id).await {
            Ok(object) => {
                let updating = match chain.query_object_info_by_id(object_id).await {
                    Ok(on_chain) => on_chain.is_updating,
                    Err(e) if e.is_no_such_object() => false,
                    Err(e) => return Err(e.into()),
                };
                return Ok(Some((object, updating)));
            }
            Err(e) if e.is_no_such_object() => {}
            Err(e) => return Err(e.into()),
        }
        match chain.query_object_info_by_id(object_id).await {
            Ok(object) => {
                let updating = object.is_updating;
                Ok(Some((object, updating)))
            }
            Err(e) if e.is_no_such_object() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Checks that this SP still holds `redundancy_idx` of the object, or is
    /// taking it over through a swap-in. Fails with
    /// [`ExecutorError::InvalidRedundancyIndex`] otherwise. Objects that may
    /// not be collected yet always pass.
    pub(crate) async fn check_gvg_match_sp(&self, object: &ObjectInfo, redundancy_idx: i32) -> Result<()> {
        let deps = &self.ctx.deps;
        let bucket = deps.metadata.get_bucket_info_by_bucket_name(&object.bucket_name).await?;
        if !is_allow_gc(object, &bucket) {
            return Ok(());
        }
        let gvg = deps
            .metadata
            .get_global_virtual_group(bucket.id, object.local_virtual_group_id)
            .await?;
        let sp_id = self.ctx.sp_id().await?;
        let invalid = || ExecutorError::InvalidRedundancyIndex {
            object_id: object.id,
            redundancy_idx,
        };

        let (holder, swap_in) = if redundancy_idx == PRIMARY_REDUNDANCY_INDEX {
            if gvg.primary_sp_id == sp_id {
                return Ok(());
            }
            (gvg.primary_sp_id, deps.chain.query_swap_in_info(gvg.family_id, 0).await?)
        } else {
            let holder = usize::try_from(redundancy_idx)
                .ok()
                .and_then(|idx| gvg.secondary_sp_ids.get(idx).copied())
                .ok_or_else(invalid)?;
            if holder == sp_id {
                return Ok(());
            }
            (holder, deps.chain.query_swap_in_info(0, gvg.id).await?)
        };

        match swap_in {
            Some(swap) if swap.successor_sp_id == sp_id && swap.target_sp_id == holder => {
                debug!(
                    "SP {} is swapping in for SP {} on object {}",
                    sp_id, holder, object.id
                );
                Ok(())
            }
            _ => Err(invalid()),
        }
    }
}
