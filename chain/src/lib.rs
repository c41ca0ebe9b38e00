mod client;
mod messages;
mod types;

pub use client::{ChainClient, MetadataClient};
pub use messages::MsgSealObject;
pub use types::{
    BucketInfo, BucketStatus, DeletedObject, GlobalVirtualGroup, ObjectInfo, ObjectStatus,
    RedundancyType, StorageParams, StorageProvider, SwapInInfo,
};

pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors surfaced by the chain and metadata clients.
///
/// RPC layers report missing entities as free-form strings; implementations
/// translate them with [`ChainError::from_rpc_message`] so callers can match
/// on variants instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("No such bucket: {0}")]
    NoSuchBucket(String),

    #[error("No such global virtual group: {0}")]
    NoSuchGlobalVirtualGroup(String),

    #[error("No such storage provider: {0}")]
    NoSuchStorageProvider(String),

    #[error("Chain RPC error: {0}")]
    Rpc(String),

    #[error("Metadata service error: {0}")]
    Metadata(String),
}

impl ChainError {
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, ChainError::NoSuchObject(_))
    }

    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if lowered.contains("no such object") {
            ChainError::NoSuchObject(message)
        } else if lowered.contains("no such bucket") {
            ChainError::NoSuchBucket(message)
        } else if lowered.contains("no such global virtual group") {
            ChainError::NoSuchGlobalVirtualGroup(message)
        } else if lowered.contains("no such storage provider") || lowered.contains("no such sp") {
            ChainError::NoSuchStorageProvider(message)
        } else {
            ChainError::Rpc(message)
        }
    }
}
