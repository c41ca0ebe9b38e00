use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::piece_store::slice_piece;
use crate::spdb::{BucketTraffic, GcPieceMeta, IntegrityMeta, IntegrityRecord, ReadRecord, ShadowIntegrityMeta, SpDb};
use crate::{PieceStore, PieceStoreError, SpDbError};

/// Piece store held in process memory.
#[derive(Default)]
pub struct MemoryPieceStore {
    pieces: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryPieceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.pieces.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.pieces.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.pieces.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pieces.read().await.is_empty()
    }
}

#[async_trait]
impl PieceStore for MemoryPieceStore {
    async fn get_piece(&self, key: &str, offset: u64, length: u64) -> Result<Bytes, PieceStoreError> {
        let pieces = self.pieces.read().await;
        let data = pieces
            .get(key)
            .ok_or_else(|| PieceStoreError::NotFound(key.to_string()))?;
        slice_piece(key, data, offset, length)
    }

    async fn put_piece(&self, key: &str, data: Bytes) -> Result<(), PieceStoreError> {
        self.pieces.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete_piece(&self, key: &str) -> Result<(), PieceStoreError> {
        match self.pieces.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(PieceStoreError::NotFound(key.to_string())),
        }
    }
}

#[derive(Default)]
struct SpDbState {
    integrity: BTreeMap<(u64, i32), IntegrityMeta>,
    shadow_integrity: BTreeMap<(u64, i32), ShadowIntegrityMeta>,
    piece_checksums: BTreeMap<(u64, i32, u32), GcPieceMeta>,
    bucket_traffic: Vec<BucketTraffic>,
    read_records: Vec<ReadRecord>,
}

/// SP database held in process memory.
#[derive(Default)]
pub struct MemorySpDb {
    state: RwLock<SpDbState>,
}

impl MemorySpDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_bucket_traffic(&self, traffic: BucketTraffic) {
        self.state.write().await.bucket_traffic.push(traffic);
    }

    pub async fn insert_read_record(&self, record: ReadRecord) {
        self.state.write().await.read_records.push(record);
    }

    pub async fn bucket_traffic(&self) -> Vec<BucketTraffic> {
        self.state.read().await.bucket_traffic.clone()
    }

    pub async fn read_records(&self) -> Vec<ReadRecord> {
        self.state.read().await.read_records.clone()
    }
}

#[async_trait]
impl SpDb for MemorySpDb {
    async fn get_object_integrity(&self, object_id: u64, redundancy_index: i32) -> Result<Option<IntegrityMeta>, SpDbError> {
        Ok(self.state.read().await.integrity.get(&(object_id, redundancy_index)).cloned())
    }

    async fn set_object_integrity(&self, meta: &IntegrityMeta) -> Result<(), SpDbError> {
        self.state
            .write()
            .await
            .integrity
            .insert((meta.object_id, meta.redundancy_index), meta.clone());
        Ok(())
    }

    async fn delete_object_integrity(&self, object_id: u64, redundancy_index: i32) -> Result<(), SpDbError> {
        self.state.write().await.integrity.remove(&(object_id, redundancy_index));
        Ok(())
    }

    async fn list_integrity_meta_by_object_id_range(
        &self,
        start: u64,
        end: u64,
        include_shadow: bool,
    ) -> Result<Vec<IntegrityRecord>, SpDbError> {
        if start > end {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let mut records: Vec<IntegrityRecord> = state
            .integrity
            .range((start, i32::MIN)..=(end, i32::MAX))
            .map(|(_, meta)| IntegrityRecord::Live(meta.clone()))
            .collect();
        if include_shadow {
            records.extend(
                state
                    .shadow_integrity
                    .range((start, i32::MIN)..=(end, i32::MAX))
                    .map(|(_, meta)| IntegrityRecord::Shadow(meta.clone())),
            );
            records.sort_by_key(|record| (record.object_id(), record.redundancy_index(), record.is_shadow()));
        }
        Ok(records)
    }

    async fn get_shadow_object_integrity(
        &self,
        object_id: u64,
        redundancy_index: i32,
    ) -> Result<Option<ShadowIntegrityMeta>, SpDbError> {
        Ok(self
            .state
            .read()
            .await
            .shadow_integrity
            .get(&(object_id, redundancy_index))
            .cloned())
    }

    async fn set_shadow_object_integrity(&self, meta: &ShadowIntegrityMeta) -> Result<(), SpDbError> {
        self.state
            .write()
            .await
            .shadow_integrity
            .insert((meta.object_id, meta.redundancy_index), meta.clone());
        Ok(())
    }

    async fn delete_shadow_object_integrity(&self, object_id: u64, redundancy_index: i32) -> Result<(), SpDbError> {
        self.state
            .write()
            .await
            .shadow_integrity
            .remove(&(object_id, redundancy_index));
        Ok(())
    }

    async fn set_replicate_piece_checksum(&self, meta: &GcPieceMeta) -> Result<(), SpDbError> {
        self.state.write().await.piece_checksums.insert(
            (meta.object_id, meta.redundancy_index, meta.segment_index),
            meta.clone(),
        );
        Ok(())
    }

    async fn delete_replicate_piece_checksum(
        &self,
        object_id: u64,
        segment_index: u32,
        redundancy_index: i32,
    ) -> Result<(), SpDbError> {
        self.state
            .write()
            .await
            .piece_checksums
            .remove(&(object_id, redundancy_index, segment_index));
        Ok(())
    }

    async fn list_replicate_piece_checksum_by_object_id_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<GcPieceMeta>, SpDbError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .state
            .read()
            .await
            .piece_checksums
            .range((start, i32::MIN, 0)..=(end, i32::MAX, u32::MAX))
            .map(|(_, meta)| meta.clone())
            .collect())
    }

    async fn delete_expired_bucket_traffic(&self, year_month: &str) -> Result<u64, SpDbError> {
        let mut state = self.state.write().await;
        let before = state.bucket_traffic.len();
        // YYYY-MM sorts lexicographically in time order
        state
            .bucket_traffic
            .retain(|traffic| traffic.year_month.as_str() >= year_month);
        Ok((before - state.bucket_traffic.len()) as u64)
    }

    async fn delete_expired_read_record(&self, before_us: i64, limit: usize) -> Result<u64, SpDbError> {
        let mut state = self.state.write().await;
        let mut removed = 0usize;
        state.read_records.retain(|record| {
            if removed < limit && record.read_timestamp_us < before_us {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed as u64)
    }
}
