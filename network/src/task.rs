use chain::{ObjectInfo, StorageParams};
use chrono::Utc;
use rcmgr::{ReserveTaskPriority, ScopeStat};
use serde::{Deserialize, Serialize};

/// Memory reserved by tasks that only make RPC calls.
const SMALL_TASK_MEMORY: i64 = 1024 * 1024;
/// Task logs kept for the manager; older entries are dropped first.
const MAX_TASK_LOGS: usize = 64;

/// Error attached to a task and carried in its final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: u32,
    pub description: String,
}

/// A unit of background work handed out by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub key: String,
    pub priority: u8,
    pub max_retry: u32,
    pub retry: u32,
    /// Seconds; also the pause between seal submissions.
    pub timeout: i64,
    pub create_time: i64,
    pub update_time: i64,
    pub error: Option<TaskError>,
    pub canceled: bool,
    pub logs: Vec<String>,
    pub kind: TaskKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskKind {
    Replicate(ReplicatePieceTask),
    Seal(SealObjectTask),
    ReceiveConfirm(ReceivePieceTask),
    GcObject(GcObjectTask),
    GcZombie(GcZombiePieceTask),
    GcMeta(GcMetaTask),
    GcBucketMigration(GcBucketMigrationTask),
    GcStaleVersion(GcStaleVersionObjectTask),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatePieceTask {
    pub object_info: ObjectInfo,
    pub storage_params: StorageParams,
    pub global_virtual_group_id: u32,
    /// One endpoint per redundancy index, in the GVG's secondary order.
    pub secondary_endpoints: Vec<String>,
    pub secondary_signatures: Vec<Vec<u8>>,
    pub aggregate_signature: Vec<u8>,
    pub sealed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealObjectTask {
    pub object_info: ObjectInfo,
    pub storage_params: StorageParams,
    pub global_virtual_group_id: u32,
    pub secondary_signatures: Vec<Vec<u8>>,
}

/// Sent by a primary with every piece, and once more with `piece_idx == -1`
/// to collect the secondary's signature. Also runs on the secondary as the
/// seal confirmation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePieceTask {
    pub object_info: ObjectInfo,
    pub storage_params: StorageParams,
    pub global_virtual_group_id: u32,
    pub priority: u8,
    pub redundancy_idx: i32,
    pub piece_idx: i32,
    pub piece_size: u64,
    pub piece_checksum: Vec<u8>,
    pub signature: Vec<u8>,
    pub sealed: bool,
}

impl ReceivePieceTask {
    pub fn is_done_request(&self) -> bool {
        self.piece_idx < 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcObjectTask {
    pub start_block_number: u64,
    pub end_block_number: u64,
    pub current_block_number: u64,
    pub last_deleted_object_id: u64,
    pub try_again_later: bool,
    pub has_no_object: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcZombiePieceTask {
    pub start_object_id: u64,
    pub end_object_id: u64,
    pub current_object_id: u64,
    pub deleted_piece_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcMetaTask {
    pub deleted_bucket_traffic: u64,
    pub deleted_read_records: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcBucketMigrationTask {
    pub bucket_id: u64,
    pub last_gc_object_id: u64,
    pub last_gc_gvg_id: u32,
    pub total_gvg_num: u32,
    pub gc_finished_gvg_num: u32,
    pub finished: bool,
}

/// Pieces written by an object update, described by their shadow integrity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStaleVersionObjectTask {
    pub object_id: u64,
    pub redundancy_index: i32,
    pub version: i64,
    pub integrity_checksum: Vec<u8>,
    pub piece_checksum_list: Vec<Vec<u8>>,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Replicate(_) => "replicate",
            TaskKind::Seal(_) => "seal",
            TaskKind::ReceiveConfirm(_) => "receive",
            TaskKind::GcObject(_) => "gc_object",
            TaskKind::GcZombie(_) => "gc_zombie",
            TaskKind::GcMeta(_) => "gc_meta",
            TaskKind::GcBucketMigration(_) => "gc_bucket_migration",
            TaskKind::GcStaleVersion(_) => "gc_stale_version",
        }
    }
}

impl Task {
    pub fn new(key: impl Into<String>, priority: u8, kind: TaskKind) -> Self {
        let now = Utc::now().timestamp();
        Self {
            key: key.into(),
            priority,
            max_retry: 0,
            retry: 0,
            timeout: 0,
            create_time: now,
            update_time: now,
            error: None,
            canceled: false,
            logs: Vec::new(),
            kind,
        }
    }

    pub fn with_retry(mut self, max_retry: u32, timeout: i64) -> Self {
        self.max_retry = max_retry;
        self.timeout = timeout;
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn object_id(&self) -> Option<u64> {
        match &self.kind {
            TaskKind::Replicate(task) => Some(task.object_info.id),
            TaskKind::Seal(task) => Some(task.object_info.id),
            TaskKind::ReceiveConfirm(task) => Some(task.object_info.id),
            TaskKind::GcStaleVersion(task) => Some(task.object_id),
            _ => None,
        }
    }

    pub fn set_error(&mut self, code: u32, description: impl Into<String>) {
        self.error = Some(TaskError {
            code,
            description: description.into(),
        });
        self.update_time = Utc::now().timestamp();
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn append_log(&mut self, log: impl Into<String>) {
        if self.logs.len() >= MAX_TASK_LOGS {
            self.logs.remove(0);
        }
        self.logs.push(format!("{}: {}", Utc::now().format("%Y-%m-%dT%H:%M:%S"), log.into()));
        self.update_time = Utc::now().timestamp();
    }

    pub fn reserve_priority(&self) -> ReserveTaskPriority {
        ReserveTaskPriority::from_level(self.priority)
    }

    /// Resources the task needs while it runs. Replication holds a segment
    /// plus its encoded shards at once; everything else is RPC-bound.
    pub fn estimate_limit(&self) -> ScopeStat {
        let memory = match &self.kind {
            TaskKind::Replicate(task) => {
                let params = &task.storage_params;
                let segment = params.max_segment_size.min(task.object_info.payload_size.max(1));
                let shards = if task.object_info.is_erasure_coded() {
                    storage::ec_piece_size(segment, params.redundant_data_chunk_num)
                        * params.redundancy_count() as u64
                } else {
                    0
                };
                (segment + shards) as i64
            }
            _ => SMALL_TASK_MEMORY,
        };
        ScopeStat::for_task(memory, self.reserve_priority())
    }
}
