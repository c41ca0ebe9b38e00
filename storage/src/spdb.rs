use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::SpDbError;

/// Integrity record of one object copy held by this SP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityMeta {
    pub object_id: u64,
    pub redundancy_index: i32,
    pub integrity_checksum: Vec<u8>,
    pub piece_checksum_list: Vec<Vec<u8>>,
    pub version: i64,
}

/// Integrity record written while an object update is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowIntegrityMeta {
    pub object_id: u64,
    pub redundancy_index: i32,
    pub integrity_checksum: Vec<u8>,
    pub piece_checksum_list: Vec<Vec<u8>>,
    pub version: i64,
}

impl From<ShadowIntegrityMeta> for IntegrityMeta {
    fn from(shadow: ShadowIntegrityMeta) -> Self {
        IntegrityMeta {
            object_id: shadow.object_id,
            redundancy_index: shadow.redundancy_index,
            integrity_checksum: shadow.integrity_checksum,
            piece_checksum_list: shadow.piece_checksum_list,
            version: shadow.version,
        }
    }
}

impl From<IntegrityMeta> for ShadowIntegrityMeta {
    fn from(meta: IntegrityMeta) -> Self {
        ShadowIntegrityMeta {
            object_id: meta.object_id,
            redundancy_index: meta.redundancy_index,
            integrity_checksum: meta.integrity_checksum,
            piece_checksum_list: meta.piece_checksum_list,
            version: meta.version,
        }
    }
}

/// A row returned by integrity listings, tagged with the table it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityRecord {
    Live(IntegrityMeta),
    Shadow(ShadowIntegrityMeta),
}

impl IntegrityRecord {
    pub fn object_id(&self) -> u64 {
        match self {
            IntegrityRecord::Live(meta) => meta.object_id,
            IntegrityRecord::Shadow(meta) => meta.object_id,
        }
    }

    pub fn redundancy_index(&self) -> i32 {
        match self {
            IntegrityRecord::Live(meta) => meta.redundancy_index,
            IntegrityRecord::Shadow(meta) => meta.redundancy_index,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            IntegrityRecord::Live(meta) => meta.version,
            IntegrityRecord::Shadow(meta) => meta.version,
        }
    }

    pub fn segment_count(&self) -> u32 {
        match self {
            IntegrityRecord::Live(meta) => meta.piece_checksum_list.len() as u32,
            IntegrityRecord::Shadow(meta) => meta.piece_checksum_list.len() as u32,
        }
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self, IntegrityRecord::Shadow(_))
    }
}

/// Checksum of a piece received from a primary, kept until the object seals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcPieceMeta {
    pub object_id: u64,
    pub segment_index: u32,
    pub redundancy_index: i32,
    pub piece_checksum: Vec<u8>,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTraffic {
    pub bucket_id: u64,
    pub bucket_name: String,
    /// `YYYY-MM`
    pub year_month: String,
    pub read_consumed_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRecord {
    pub object_id: u64,
    pub bucket_id: u64,
    pub read_timestamp_us: i64,
    pub read_size: u64,
}

/// Persistent SP state the executor reads and reclaims: integrity rows,
/// their shadows, received-piece checksums and traffic bookkeeping.
#[async_trait]
pub trait SpDb: Send + Sync {
    async fn get_object_integrity(&self, object_id: u64, redundancy_index: i32) -> Result<Option<IntegrityMeta>, SpDbError>;

    async fn set_object_integrity(&self, meta: &IntegrityMeta) -> Result<(), SpDbError>;

    async fn delete_object_integrity(&self, object_id: u64, redundancy_index: i32) -> Result<(), SpDbError>;

    /// Rows with `start <= object_id <= end`, ordered by object ID then redundancy index.
    async fn list_integrity_meta_by_object_id_range(
        &self,
        start: u64,
        end: u64,
        include_shadow: bool,
    ) -> Result<Vec<IntegrityRecord>, SpDbError>;

    async fn get_shadow_object_integrity(
        &self,
        object_id: u64,
        redundancy_index: i32,
    ) -> Result<Option<ShadowIntegrityMeta>, SpDbError>;

    async fn set_shadow_object_integrity(&self, meta: &ShadowIntegrityMeta) -> Result<(), SpDbError>;

    async fn delete_shadow_object_integrity(&self, object_id: u64, redundancy_index: i32) -> Result<(), SpDbError>;

    async fn set_replicate_piece_checksum(&self, meta: &GcPieceMeta) -> Result<(), SpDbError>;

    async fn delete_replicate_piece_checksum(
        &self,
        object_id: u64,
        segment_index: u32,
        redundancy_index: i32,
    ) -> Result<(), SpDbError>;

    async fn list_replicate_piece_checksum_by_object_id_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<GcPieceMeta>, SpDbError>;

    /// Deletes traffic rows of months strictly before `year_month`. Returns the number removed.
    async fn delete_expired_bucket_traffic(&self, year_month: &str) -> Result<u64, SpDbError>;

    /// Deletes at most `limit` read records older than `before_us`. Returns the number removed.
    async fn delete_expired_read_record(&self, before_us: i64, limit: usize) -> Result<u64, SpDbError>;
}
