use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStatus {
    Created,
    Sealed,
    Discontinued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundancyType {
    Ec,
    Replica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketStatus {
    Created,
    Migrating,
    Discontinued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: u64,
    pub bucket_name: String,
    pub object_name: String,
    pub payload_size: u64,
    pub version: i64,
    pub redundancy_type: RedundancyType,
    pub status: ObjectStatus,
    pub is_updating: bool,
    pub local_virtual_group_id: u32,
    /// Index 0 is the primary's integrity hash, index `j + 1` the hash of
    /// secondary `j`.
    pub checksums: Vec<Vec<u8>>,
    /// Unix seconds.
    pub create_at: i64,
    pub updated_at: i64,
}

impl ObjectInfo {
    pub fn is_sealed(&self) -> bool {
        self.status == ObjectStatus::Sealed
    }

    pub fn is_erasure_coded(&self) -> bool {
        self.redundancy_type == RedundancyType::Ec
    }

    /// Timestamp whose storage params govern the current version's layout.
    pub fn params_timestamp(&self) -> i64 {
        if self.version > 0 && self.updated_at > 0 {
            self.updated_at
        } else {
            self.create_at
        }
    }

    pub fn secondary_integrity_hash(&self, redundancy_idx: usize) -> Option<&[u8]> {
        self.checksums.get(redundancy_idx + 1).map(|hash| hash.as_slice())
    }
}

/// An object removed on chain, with the block height of the deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedObject {
    pub object_info: ObjectInfo,
    pub delete_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: u64,
    pub bucket_name: String,
    pub status: BucketStatus,
    pub global_virtual_group_family_id: u32,
}

impl BucketInfo {
    pub fn is_migrating(&self) -> bool {
        self.status == BucketStatus::Migrating
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVirtualGroup {
    pub id: u32,
    pub family_id: u32,
    pub primary_sp_id: u32,
    /// Position in this list is the secondary's redundancy index.
    pub secondary_sp_ids: Vec<u32>,
}

impl GlobalVirtualGroup {
    pub fn secondary_index_of(&self, sp_id: u32) -> Option<usize> {
        self.secondary_sp_ids.iter().position(|id| *id == sp_id)
    }
}

/// A swap-in in progress: `successor_sp_id` serves the pieces still mapped
/// to `target_sp_id`. Exactly one of the family or GVG IDs is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInInfo {
    pub global_virtual_group_family_id: u32,
    pub global_virtual_group_id: u32,
    pub target_sp_id: u32,
    pub successor_sp_id: u32,
    pub expiration_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageParams {
    pub max_segment_size: u64,
    pub redundant_data_chunk_num: u32,
    pub redundant_parity_chunk_num: u32,
    pub max_payload_size: u64,
}

impl StorageParams {
    pub fn redundancy_count(&self) -> u32 {
        self.redundant_data_chunk_num + self.redundant_parity_chunk_num
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProvider {
    pub id: u32,
    pub operator_address: String,
    pub endpoint: String,
}
