use async_trait::async_trait;

use crate::messages::MsgSealObject;
use crate::types::{
    BucketInfo, DeletedObject, GlobalVirtualGroup, ObjectInfo, StorageParams, StorageProvider,
    SwapInInfo,
};
use crate::Result;

/// Authoritative on-chain state.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn query_storage_params_by_timestamp(&self, timestamp: i64) -> Result<StorageParams>;

    /// Fails with [`crate::ChainError::NoSuchObject`] when the object is gone.
    async fn query_object_info_by_id(&self, object_id: u64) -> Result<ObjectInfo>;

    async fn query_bucket_info_by_id(&self, bucket_id: u64) -> Result<BucketInfo>;

    /// Pass a family ID with `gvg_id == 0` for primary swap-ins, or a GVG ID
    /// with `family_id == 0` for secondary ones. `None` means no swap-in.
    async fn query_swap_in_info(&self, family_id: u32, gvg_id: u32) -> Result<Option<SwapInInfo>>;

    /// Broadcasts the seal transaction and returns its hash.
    async fn seal_object(&self, msg: &MsgSealObject) -> Result<String>;

    /// Waits up to `timeout_height` blocks for the object to seal.
    async fn listen_object_seal(&self, object_id: u64, timeout_height: u64) -> Result<bool>;

    async fn query_sp(&self, operator_address: &str) -> Result<StorageProvider>;
}

/// Indexed view of chain state. Cheaper than the chain but may lag behind it.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Returns the deletions found and the highest block the index has processed.
    async fn list_deleted_objects_by_block_number_range(
        &self,
        operator_address: &str,
        start_block: u64,
        end_block: u64,
        include_removed: bool,
    ) -> Result<(Vec<DeletedObject>, u64)>;

    async fn get_object_by_id(&self, object_id: u64) -> Result<ObjectInfo>;

    async fn get_bucket_info_by_bucket_name(&self, bucket_name: &str) -> Result<BucketInfo>;

    async fn get_global_virtual_group(&self, bucket_id: u64, lvg_id: u32) -> Result<GlobalVirtualGroup>;

    async fn list_global_virtual_groups_by_bucket(&self, bucket_id: u64) -> Result<Vec<GlobalVirtualGroup>>;

    /// Objects of `bucket_id` stored in `gvg_id` with IDs greater than `start_after`, ascending.
    async fn list_objects_by_gvg_and_bucket_for_gc(
        &self,
        gvg_id: u32,
        bucket_id: u64,
        start_after: u64,
        limit: u32,
    ) -> Result<Vec<ObjectInfo>>;
}
