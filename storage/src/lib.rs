mod checksum;
mod local;
mod memory;
mod piece_key;
mod piece_store;
mod redundancy;
mod spdb;

pub use checksum::{integrity_hash, piece_checksum, verify_piece_checksum};
pub use local::{LocalPieceStore, PieceStoreStats};
pub use memory::{MemoryPieceStore, MemorySpDb};
pub use piece_key::{
    decode_ec_piece_key, decode_segment_piece_key, ec_piece_key, ec_piece_size, piece_key,
    segment_count, segment_piece_key, segment_size, EcPieceKey, SegmentPieceKey,
    PRIMARY_REDUNDANCY_INDEX,
};
pub use piece_store::PieceStore;
pub use redundancy::SegmentEncoder;
pub use spdb::{
    BucketTraffic, GcPieceMeta, IntegrityMeta, IntegrityRecord, ReadRecord, ShadowIntegrityMeta,
    SpDb,
};

/// Message the piece-store backends use for a missing key.
pub const NOT_FOUND_MESSAGE: &str = "The specified key does not exist";

#[derive(Debug, thiserror::Error)]
pub enum PieceStoreError {
    #[error("The specified key does not exist: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid range for piece {key}: offset {offset}, length {length}, size {size}")]
    InvalidRange {
        key: String,
        offset: u64,
        length: u64,
        size: u64,
    },

    #[error("Piece store backend error: {0}")]
    Backend(String),
}

impl PieceStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PieceStoreError::NotFound(_))
    }

    /// Translates a raw backend message into a typed error.
    pub fn from_backend(key: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(NOT_FOUND_MESSAGE) {
            PieceStoreError::NotFound(key.to_string())
        } else {
            PieceStoreError::Backend(message)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpDbError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SpDbError {
    fn from(err: serde_json::Error) -> Self {
        SpDbError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PieceKeyError {
    #[error("invalid segment piece key: {0}")]
    InvalidSegmentKey(String),

    #[error("invalid EC piece key: {0}")]
    InvalidEcKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("invalid redundancy parameters: data {data_chunks}, parity {parity_chunks}")]
    InvalidParams { data_chunks: u32, parity_chunks: u32 },

    #[error("encode failed: {0}")]
    Failed(String),
}
