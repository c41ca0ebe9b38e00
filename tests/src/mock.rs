//! In-process collaborators that record every call the executor makes.

use async_trait::async_trait;
use bytes::Bytes;
use sp_executor::chain::{
    self, BucketInfo, BucketStatus, ChainClient, ChainError, DeletedObject, GlobalVirtualGroup,
    MetadataClient, MsgSealObject, ObjectInfo, ObjectStatus, RedundancyType, StorageParams,
    StorageProvider, SwapInInfo,
};
use sp_executor::network::{
    ManagerClient, ManagerError, NetworkError, ReceivePieceTask, SecondaryClient, Signer,
    SignerError, Task,
};
use sp_executor::rcmgr::Limit;
use sp_executor::storage::{
    EncodeError, MemoryPieceStore, MemorySpDb, PieceStore, PieceStoreError, SegmentEncoder,
};
use sp_executor::{Collaborators, Executor, ExecutorConfig};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

pub const THIS_SP: u32 = 1;
pub const OPERATOR: &str = "0xsp-operator";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Manager

#[derive(Default)]
pub struct MockManager {
    tasks: Mutex<VecDeque<Task>>,
    reports: Mutex<Vec<Task>>,
    asks: Mutex<Vec<Limit>>,
    cancel_from_report: Mutex<Option<usize>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockManager {
    pub fn push_task(&self, task: Task) {
        lock(&self.tasks).push_back(task);
    }

    pub fn reports(&self) -> Vec<Task> {
        lock(&self.reports).clone()
    }

    pub fn ask_count(&self) -> usize {
        lock(&self.asks).len()
    }

    /// Answers report number `n` (1-based) and every later one with `CanceledTask`.
    pub fn cancel_from_report(&self, n: usize) {
        *lock(&self.cancel_from_report) = Some(n);
    }

    /// Makes `ask_task` hang until the returned notify fires.
    pub fn block_asks(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.gate) = Some(gate.clone());
        gate
    }

    /// Lets the blocked ask through; later asks no longer wait.
    pub fn release_asks(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl ManagerClient for MockManager {
    async fn ask_task(&self, limit: &Limit) -> Result<Task, ManagerError> {
        lock(&self.asks).push(*limit);
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        lock(&self.tasks).pop_front().ok_or(ManagerError::NoTaskMatchLimit)
    }

    async fn report_task(&self, task: &Task) -> Result<(), ManagerError> {
        let mut reports = lock(&self.reports);
        reports.push(task.clone());
        match *lock(&self.cancel_from_report) {
            Some(n) if reports.len() >= n => Err(ManagerError::CanceledTask(task.key.clone())),
            _ => Ok(()),
        }
    }
}

// Chain

pub struct MockChain {
    params: StorageParams,
    objects: Mutex<HashMap<u64, ObjectInfo>>,
    buckets: Mutex<HashMap<u64, BucketInfo>>,
    swap_ins: Mutex<HashMap<(u32, u32), SwapInInfo>>,
    unreachable_objects: Mutex<HashSet<u64>>,
    seal_failures: Mutex<u32>,
    listen_results: Mutex<VecDeque<bool>>,
    seal_calls: Mutex<Vec<MsgSealObject>>,
    listen_calls: Mutex<Vec<(u64, u64)>>,
}

impl MockChain {
    pub fn new(params: StorageParams) -> Self {
        Self {
            params,
            objects: Mutex::default(),
            buckets: Mutex::default(),
            swap_ins: Mutex::default(),
            unreachable_objects: Mutex::default(),
            seal_failures: Mutex::new(0),
            listen_results: Mutex::default(),
            seal_calls: Mutex::default(),
            listen_calls: Mutex::default(),
        }
    }

    pub fn put_object(&self, object: ObjectInfo) {
        lock(&self.objects).insert(object.id, object);
    }

    pub fn remove_object(&self, object_id: u64) {
        lock(&self.objects).remove(&object_id);
    }

    pub fn put_bucket(&self, bucket: BucketInfo) {
        lock(&self.buckets).insert(bucket.id, bucket);
    }

    pub fn put_swap_in(&self, family_id: u32, gvg_id: u32, swap_in: SwapInInfo) {
        lock(&self.swap_ins).insert((family_id, gvg_id), swap_in);
    }

    /// Object queries for `object_id` fail with a transport error.
    pub fn fail_object_query(&self, object_id: u64) {
        lock(&self.unreachable_objects).insert(object_id);
    }

    /// The next `n` seal submissions fail.
    pub fn fail_seals(&self, n: u32) {
        *lock(&self.seal_failures) = n;
    }

    /// Queues listen answers; once drained, listens report sealed.
    pub fn queue_listen_results(&self, results: &[bool]) {
        lock(&self.listen_results).extend(results.iter().copied());
    }

    pub fn seal_calls(&self) -> Vec<MsgSealObject> {
        lock(&self.seal_calls).clone()
    }

    pub fn listen_calls(&self) -> Vec<(u64, u64)> {
        lock(&self.listen_calls).clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn query_storage_params_by_timestamp(&self, _timestamp: i64) -> chain::Result<StorageParams> {
        Ok(self.params.clone())
    }

    async fn query_object_info_by_id(&self, object_id: u64) -> chain::Result<ObjectInfo> {
        if lock(&self.unreachable_objects).contains(&object_id) {
            return Err(ChainError::Rpc("connection reset by peer".to_string()));
        }
        lock(&self.objects)
            .get(&object_id)
            .cloned()
            .ok_or_else(|| ChainError::NoSuchObject(object_id.to_string()))
    }

    async fn query_bucket_info_by_id(&self, bucket_id: u64) -> chain::Result<BucketInfo> {
        lock(&self.buckets)
            .get(&bucket_id)
            .cloned()
            .ok_or_else(|| ChainError::NoSuchBucket(bucket_id.to_string()))
    }

    async fn query_swap_in_info(&self, family_id: u32, gvg_id: u32) -> chain::Result<Option<SwapInInfo>> {
        Ok(lock(&self.swap_ins).get(&(family_id, gvg_id)).cloned())
    }

    async fn seal_object(&self, msg: &MsgSealObject) -> chain::Result<String> {
        lock(&self.seal_calls).push(msg.clone());
        let mut failures = lock(&self.seal_failures);
        if *failures > 0 {
            *failures -= 1;
            return Err(ChainError::Rpc("account sequence mismatch".to_string()));
        }
        Ok("0xseal".to_string())
    }

    async fn listen_object_seal(&self, object_id: u64, timeout_height: u64) -> chain::Result<bool> {
        lock(&self.listen_calls).push((object_id, timeout_height));
        Ok(lock(&self.listen_results).pop_front().unwrap_or(true))
    }

    async fn query_sp(&self, operator_address: &str) -> chain::Result<StorageProvider> {
        if operator_address != OPERATOR {
            return Err(ChainError::NoSuchStorageProvider(operator_address.to_string()));
        }
        Ok(StorageProvider {
            id: THIS_SP,
            operator_address: operator_address.to_string(),
            endpoint: "http://sp1.local".to_string(),
        })
    }
}

// Metadata

#[derive(Default)]
pub struct MockMetadata {
    deleted: Mutex<Vec<DeletedObject>>,
    indexed_end: Mutex<Option<u64>>,
    objects: Mutex<HashMap<u64, ObjectInfo>>,
    buckets: Mutex<HashMap<String, BucketInfo>>,
    gvgs: Mutex<HashMap<(u64, u32), GlobalVirtualGroup>>,
    bucket_gvgs: Mutex<HashMap<u64, Vec<GlobalVirtualGroup>>>,
    gvg_objects: Mutex<HashMap<(u32, u64), Vec<ObjectInfo>>>,
    list_object_calls: Mutex<Vec<(u32, u64, u64, u32)>>,
}

impl MockMetadata {
    pub fn put_deleted(&self, object: ObjectInfo, delete_at: u64) {
        lock(&self.deleted).push(DeletedObject {
            object_info: object,
            delete_at,
        });
    }

    /// Pretends the indexer only reached `block`.
    pub fn set_indexed_end(&self, block: u64) {
        *lock(&self.indexed_end) = Some(block);
    }

    pub fn put_object(&self, object: ObjectInfo) {
        lock(&self.objects).insert(object.id, object);
    }

    pub fn remove_object(&self, object_id: u64) {
        lock(&self.objects).remove(&object_id);
    }

    pub fn put_bucket(&self, bucket: BucketInfo) {
        lock(&self.buckets).insert(bucket.bucket_name.clone(), bucket);
    }

    pub fn put_gvg(&self, bucket_id: u64, lvg_id: u32, gvg: GlobalVirtualGroup) {
        lock(&self.gvgs).insert((bucket_id, lvg_id), gvg.clone());
        let mut bucket_gvgs = lock(&self.bucket_gvgs);
        let list = bucket_gvgs.entry(bucket_id).or_default();
        if !list.iter().any(|existing| existing.id == gvg.id) {
            list.push(gvg);
        }
    }

    pub fn put_gvg_object(&self, gvg_id: u32, bucket_id: u64, object: ObjectInfo) {
        lock(&self.gvg_objects).entry((gvg_id, bucket_id)).or_default().push(object);
    }

    pub fn list_object_calls(&self) -> Vec<(u32, u64, u64, u32)> {
        lock(&self.list_object_calls).clone()
    }
}

#[async_trait]
impl MetadataClient for MockMetadata {
    async fn list_deleted_objects_by_block_number_range(
        &self,
        _operator_address: &str,
        start_block: u64,
        end_block: u64,
        _include_removed: bool,
    ) -> chain::Result<(Vec<DeletedObject>, u64)> {
        let deleted = lock(&self.deleted)
            .iter()
            .filter(|deleted| deleted.delete_at >= start_block && deleted.delete_at <= end_block)
            .cloned()
            .collect();
        let indexed_end = lock(&self.indexed_end).unwrap_or(end_block);
        Ok((deleted, indexed_end))
    }

    async fn get_object_by_id(&self, object_id: u64) -> chain::Result<ObjectInfo> {
        lock(&self.objects)
            .get(&object_id)
            .cloned()
            .ok_or_else(|| ChainError::from_rpc_message(format!("No such object: {}", object_id)))
    }

    async fn get_bucket_info_by_bucket_name(&self, bucket_name: &str) -> chain::Result<BucketInfo> {
        lock(&self.buckets)
            .get(bucket_name)
            .cloned()
            .ok_or_else(|| ChainError::NoSuchBucket(bucket_name.to_string()))
    }

    async fn get_global_virtual_group(&self, bucket_id: u64, lvg_id: u32) -> chain::Result<GlobalVirtualGroup> {
        lock(&self.gvgs)
            .get(&(bucket_id, lvg_id))
            .cloned()
            .ok_or_else(|| ChainError::NoSuchGlobalVirtualGroup(format!("{}/{}", bucket_id, lvg_id)))
    }

    async fn list_global_virtual_groups_by_bucket(&self, bucket_id: u64) -> chain::Result<Vec<GlobalVirtualGroup>> {
        Ok(lock(&self.bucket_gvgs).get(&bucket_id).cloned().unwrap_or_default())
    }

    async fn list_objects_by_gvg_and_bucket_for_gc(
        &self,
        gvg_id: u32,
        bucket_id: u64,
        start_after: u64,
        limit: u32,
    ) -> chain::Result<Vec<ObjectInfo>> {
        lock(&self.list_object_calls).push((gvg_id, bucket_id, start_after, limit));
        let mut objects: Vec<ObjectInfo> = lock(&self.gvg_objects)
            .get(&(gvg_id, bucket_id))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|object| object.id > start_after)
            .collect();
        objects.sort_by_key(|object| object.id);
        objects.truncate(limit as usize);
        Ok(objects)
    }
}

// Signer

#[derive(Default)]
pub struct MockSigner {
    rejected: Mutex<HashSet<u32>>,
    aggregated: Mutex<Vec<Vec<Vec<u8>>>>,
}

impl MockSigner {
    /// Signatures from this secondary fail verification.
    pub fn reject_secondary(&self, redundancy_idx: u32) {
        lock(&self.rejected).insert(redundancy_idx);
    }

    pub fn aggregated(&self) -> Vec<Vec<Vec<u8>>> {
        lock(&self.aggregated).clone()
    }
}

pub fn aggregate(signatures: &[Vec<u8>]) -> Vec<u8> {
    signatures.concat()
}

#[async_trait]
impl Signer for MockSigner {
    async fn sign_receive_task(&self, task: &ReceivePieceTask) -> Result<Vec<u8>, SignerError> {
        Ok(format!("task-{}-{}-{}", task.object_info.id, task.redundancy_idx, task.piece_idx).into_bytes())
    }

    async fn verify_secondary_bls_signature(
        &self,
        _gvg_id: u32,
        redundancy_idx: u32,
        _object_id: u64,
        _integrity_hash: &[u8],
        signature: &[u8],
    ) -> Result<bool, SignerError> {
        Ok(!lock(&self.rejected).contains(&redundancy_idx) && signature == secondary_signature(redundancy_idx as i32))
    }

    fn aggregate_bls_signatures(&self, signatures: &[Vec<u8>]) -> Result<Vec<u8>, SignerError> {
        if signatures.is_empty() {
            return Err(SignerError::InvalidSignature("nothing to aggregate".to_string()));
        }
        lock(&self.aggregated).push(signatures.to_vec());
        Ok(aggregate(signatures))
    }
}

// Secondary SPs

pub fn secondary_signature(redundancy_idx: i32) -> Vec<u8> {
    format!("sigma-{}", redundancy_idx).into_bytes()
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub endpoint: String,
    pub task: ReceivePieceTask,
    pub data: Bytes,
}

#[derive(Default)]
pub struct MockSecondary {
    uploads: Mutex<Vec<Upload>>,
    done: Mutex<Vec<(String, ReceivePieceTask)>>,
    failing_endpoint: Mutex<Option<String>>,
}

impl MockSecondary {
    pub fn fail_endpoint(&self, endpoint: &str) {
        *lock(&self.failing_endpoint) = Some(endpoint.to_string());
    }

    pub fn uploads(&self) -> Vec<Upload> {
        lock(&self.uploads).clone()
    }

    pub fn done_calls(&self) -> Vec<(String, ReceivePieceTask)> {
        lock(&self.done).clone()
    }
}

#[async_trait]
impl SecondaryClient for MockSecondary {
    async fn replicate_piece_to_secondary(
        &self,
        endpoint: &str,
        task: &ReceivePieceTask,
        data: Bytes,
    ) -> sp_executor::network::Result<()> {
        if lock(&self.failing_endpoint).as_deref() == Some(endpoint) {
            return Err(NetworkError::ConnectionFailed(endpoint.to_string()));
        }
        lock(&self.uploads).push(Upload {
            endpoint: endpoint.to_string(),
            task: task.clone(),
            data,
        });
        Ok(())
    }

    async fn done_replicate_piece_to_secondary(
        &self,
        endpoint: &str,
        task: &ReceivePieceTask,
    ) -> sp_executor::network::Result<Vec<u8>> {
        lock(&self.done).push((endpoint.to_string(), task.clone()));
        Ok(secondary_signature(task.redundancy_idx))
    }
}

/// Splits a segment into `data_chunks` zero-padded stripes plus XOR parity.
pub struct StripeEncoder;

impl SegmentEncoder for StripeEncoder {
    fn encode(&self, segment: &[u8], data_chunks: u32, parity_chunks: u32) -> Result<Vec<Bytes>, EncodeError> {
        if data_chunks == 0 {
            return Err(EncodeError::InvalidParams {
                data_chunks,
                parity_chunks,
            });
        }
        let shard_len = segment.len().div_ceil(data_chunks as usize).max(1);
        let mut shards: Vec<Vec<u8>> = (0..data_chunks as usize)
            .map(|i| {
                let mut shard: Vec<u8> = segment.iter().skip(i * shard_len).take(shard_len).copied().collect();
                shard.resize(shard_len, 0);
                shard
            })
            .collect();
        let parity = shards.iter().fold(vec![0u8; shard_len], |mut acc, shard| {
            acc.iter_mut().zip(shard).for_each(|(a, b)| *a ^= b);
            acc
        });
        shards.extend((0..parity_chunks).map(|_| parity.clone()));
        Ok(shards.into_iter().map(Bytes::from).collect())
    }
}

// Piece store

/// Memory piece store that remembers delete calls and can be told to fail keys.
#[derive(Default)]
pub struct RecordingPieceStore {
    inner: MemoryPieceStore,
    deletes: Mutex<Vec<String>>,
    broken: Mutex<HashSet<String>>,
}

impl RecordingPieceStore {
    pub async fn put(&self, key: &str, data: &[u8]) {
        self.inner.put_piece(key, Bytes::copy_from_slice(data)).await.unwrap();
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.contains(key).await
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }

    pub fn deletes(&self) -> Vec<String> {
        lock(&self.deletes).clone()
    }

    pub fn break_key(&self, key: &str) {
        lock(&self.broken).insert(key.to_string());
    }
}

#[async_trait]
impl PieceStore for RecordingPieceStore {
    async fn get_piece(&self, key: &str, offset: u64, length: u64) -> Result<Bytes, PieceStoreError> {
        self.inner.get_piece(key, offset, length).await
    }

    async fn put_piece(&self, key: &str, data: Bytes) -> Result<(), PieceStoreError> {
        self.inner.put_piece(key, data).await
    }

    async fn delete_piece(&self, key: &str) -> Result<(), PieceStoreError> {
        lock(&self.deletes).push(key.to_string());
        if lock(&self.broken).contains(key) {
            return Err(PieceStoreError::from_backend(key, "disk I/O error"));
        }
        self.inner.delete_piece(key).await
    }
}

// Fixtures

pub fn storage_params() -> StorageParams {
    StorageParams {
        max_segment_size: 16,
        redundant_data_chunk_num: 4,
        redundant_parity_chunk_num: 2,
        max_payload_size: 1 << 20,
    }
}

pub fn object(id: u64, payload_size: u64, redundancy_type: RedundancyType) -> ObjectInfo {
    ObjectInfo {
        id,
        bucket_name: "bucket-a".to_string(),
        object_name: format!("object-{}", id),
        payload_size,
        version: 0,
        redundancy_type,
        status: ObjectStatus::Sealed,
        is_updating: false,
        local_virtual_group_id: 1,
        checksums: Vec::new(),
        create_at: 1_700_000_000,
        updated_at: 0,
    }
}

pub fn bucket(id: u64, name: &str, status: BucketStatus) -> BucketInfo {
    BucketInfo {
        id,
        bucket_name: name.to_string(),
        status,
        global_virtual_group_family_id: 1,
    }
}

pub fn gvg(id: u32, primary_sp_id: u32, secondary_sp_ids: Vec<u32>) -> GlobalVirtualGroup {
    GlobalVirtualGroup {
        id,
        family_id: 1,
        primary_sp_id,
        secondary_sp_ids,
    }
}

pub fn endpoints(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("http://secondary-{}.local", i)).collect()
}

pub fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        operator_address: OPERATOR.to_string(),
        ..ExecutorConfig::default()
    }
}

/// An executor wired to fresh mocks.
pub struct Harness {
    pub manager: Arc<MockManager>,
    pub chain: Arc<MockChain>,
    pub metadata: Arc<MockMetadata>,
    pub signer: Arc<MockSigner>,
    pub secondary: Arc<MockSecondary>,
    pub piece_store: Arc<RecordingPieceStore>,
    pub sp_db: Arc<MemorySpDb>,
    pub executor: Executor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        init_tracing();
        let manager = Arc::new(MockManager::default());
        let chain = Arc::new(MockChain::new(storage_params()));
        let metadata = Arc::new(MockMetadata::default());
        let signer = Arc::new(MockSigner::default());
        let secondary = Arc::new(MockSecondary::default());
        let piece_store = Arc::new(RecordingPieceStore::default());
        let sp_db = Arc::new(MemorySpDb::new());

        let deps = Collaborators {
            manager: manager.clone(),
            piece_store: piece_store.clone(),
            sp_db: sp_db.clone(),
            chain: chain.clone(),
            metadata: metadata.clone(),
            signer: signer.clone(),
            secondary: secondary.clone(),
            encoder: Arc::new(StripeEncoder),
        };
        let executor = Executor::new(config, deps).unwrap();

        Self {
            manager,
            chain,
            metadata,
            signer,
            secondary,
            piece_store,
            sp_db,
            executor,
        }
    }

    /// Makes an object, its bucket and its GVG known to both chain and metadata.
    pub fn place(&self, object: &ObjectInfo, bucket: &BucketInfo, gvg: &GlobalVirtualGroup) {
        self.chain.put_object(object.clone());
        self.chain.put_bucket(bucket.clone());
        self.metadata.put_object(object.clone());
        self.metadata.put_bucket(bucket.clone());
        self.metadata.put_gvg(bucket.id, object.local_virtual_group_id, gvg.clone());
    }

    /// Waits on the (usually paused) tokio clock until `cond` holds.
    pub async fn wait_until(&self, cond: impl Fn(&Harness) -> bool) {
        for _ in 0..600 {
            if cond(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached in time");
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
