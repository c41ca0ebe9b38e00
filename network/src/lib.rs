mod manager;
mod secondary;
mod signer;
mod task;

pub use manager::{ManagerClient, ManagerError};
pub use secondary::{
    HttpSecondaryClient, SecondaryClient, INTEGRITY_HASH_SIGNATURE_HEADER, RECEIVE_MSG_HEADER,
    REPLICATE_OBJECT_PIECE_PATH,
};
pub use signer::{Signer, SignerError};
pub use task::{
    GcBucketMigrationTask, GcMetaTask, GcObjectTask, GcStaleVersionObjectTask, GcZombiePieceTask,
    ReceivePieceTask, ReplicatePieceTask, SealObjectTask, Task, TaskError, TaskKind,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 60_000,
            connect_timeout_ms: 5_000,
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
