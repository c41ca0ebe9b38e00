use thiserror::Error;

use chain::ChainError;
use network::{ManagerError, NetworkError, SignerError};
use rcmgr::RcmgrError;
use storage::{EncodeError, PieceStoreError, SpDbError};

pub const ERR_CODE_DANGLING_POINTER: u32 = 40001;
pub const ERR_CODE_INSUFFICIENT_APPROVAL: u32 = 40002;
pub const ERR_CODE_UNSEALED: u32 = 40003;
pub const ERR_CODE_EXHAUSTED_APPROVAL: u32 = 40004;
pub const ERR_CODE_INVALID_INTEGRITY: u32 = 40005;
pub const ERR_CODE_SECONDARY_MISMATCH: u32 = 40006;
pub const ERR_CODE_REPLICATE_IDX_OUT_OF_BOUNDS: u32 = 40007;
pub const ERR_CODE_SP_DB: u32 = 45201;
pub const ERR_CODE_PIECE_STORE: u32 = 45205;
pub const ERR_CODE_CHAIN: u32 = 45211;
pub const ERR_CODE_INVALID_REDUNDANCY_INDEX: u32 = 45212;
pub const ERR_CODE_RESOURCE_EXHAUSTED: u32 = 45213;
pub const ERR_CODE_INTERNAL: u32 = 45299;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Dangling pointer: {0}")]
    DanglingPointer(String),

    #[error("Resource error: {0}")]
    Resource(#[from] RcmgrError),

    #[error("Piece store error: {0}")]
    PieceStore(#[from] PieceStoreError),

    #[error("SP DB error: {0}")]
    SpDb(#[from] SpDbError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Invalid redundancy index {redundancy_idx} for object {object_id}")]
    InvalidRedundancyIndex { object_id: u64, redundancy_idx: i32 },

    #[error("Object {0} is not sealed")]
    Unsealed(u64),

    #[error("SP is no longer secondary {redundancy_idx} of object {object_id}")]
    SecondaryMismatch { object_id: u64, redundancy_idx: i32 },

    #[error("Replicate index {redundancy_idx} out of bounds for global virtual group {gvg_id}")]
    ReplicateIdxOutOfBounds { gvg_id: u32, redundancy_idx: i32 },

    #[error("Insufficient replicate approvals: {0}")]
    InsufficientApproval(String),

    #[error("Replicate approvals exhausted: {0}")]
    ExhaustedApproval(String),

    #[error("Invalid integrity hash signature from secondary {redundancy_idx} of object {object_id}")]
    InvalidIntegrity { object_id: u64, redundancy_idx: u32 },

    #[error("gvg family id mismatch: gvg {gvg_id} belongs to family {actual}, bucket family is {expected}")]
    GvgFamilyMismatch { gvg_id: u32, expected: u32, actual: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Task canceled")]
    Canceled,
}

impl ExecutorError {
    /// Code reported to the manager with the task's error.
    pub fn code(&self) -> u32 {
        match self {
            ExecutorError::DanglingPointer(_) => ERR_CODE_DANGLING_POINTER,
            ExecutorError::InsufficientApproval(_) => ERR_CODE_INSUFFICIENT_APPROVAL,
            ExecutorError::Unsealed(_) => ERR_CODE_UNSEALED,
            ExecutorError::ExhaustedApproval(_) => ERR_CODE_EXHAUSTED_APPROVAL,
            ExecutorError::InvalidIntegrity { .. } => ERR_CODE_INVALID_INTEGRITY,
            ExecutorError::SecondaryMismatch { .. } => ERR_CODE_SECONDARY_MISMATCH,
            ExecutorError::ReplicateIdxOutOfBounds { .. } => ERR_CODE_REPLICATE_IDX_OUT_OF_BOUNDS,
            ExecutorError::SpDb(_) => ERR_CODE_SP_DB,
            ExecutorError::PieceStore(_) => ERR_CODE_PIECE_STORE,
            ExecutorError::Chain(_) => ERR_CODE_CHAIN,
            ExecutorError::InvalidRedundancyIndex { .. } => ERR_CODE_INVALID_REDUNDANCY_INDEX,
            ExecutorError::Resource(_) => ERR_CODE_RESOURCE_EXHAUSTED,
            _ => ERR_CODE_INTERNAL,
        }
    }

    pub fn is_invalid_redundancy_index(&self) -> bool {
        matches!(self, ExecutorError::InvalidRedundancyIndex { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ExecutorError::DanglingPointer("x".into()).code(), 40001);
        assert_eq!(ExecutorError::Unsealed(1).code(), 40003);
        assert_eq!(
            ExecutorError::SecondaryMismatch {
                object_id: 1,
                redundancy_idx: 0
            }
            .code(),
            40006
        );
        assert_eq!(
            ExecutorError::from(ChainError::NoSuchObject("1".into())).code(),
            ERR_CODE_CHAIN
        );
        assert_eq!(ExecutorError::Canceled.code(), ERR_CODE_INTERNAL);
    }

    #[test]
    fn test_gvg_family_mismatch_message() {
        let err = ExecutorError::GvgFamilyMismatch {
            gvg_id: 3,
            expected: 1,
            actual: 2,
        };
        assert!(err.to_string().starts_with("gvg family id mismatch"));
    }
}
