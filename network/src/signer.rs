use async_trait::async_trait;

use crate::task::ReceivePieceTask;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Sign(String),

    #[error("invalid BLS signature: {0}")]
    InvalidSignature(String),

    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Holds this SP's keys. BLS primitives stay behind this boundary.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_receive_task(&self, task: &ReceivePieceTask) -> Result<Vec<u8>, SignerError>;

    /// Checks the signature secondary `redundancy_idx` of `gvg_id` produced
    /// over the object's integrity hash.
    async fn verify_secondary_bls_signature(
        &self,
        gvg_id: u32,
        redundancy_idx: u32,
        object_id: u64,
        integrity_hash: &[u8],
        signature: &[u8],
    ) -> Result<bool, SignerError>;

    fn aggregate_bls_signatures(&self, signatures: &[Vec<u8>]) -> Result<Vec<u8>, SignerError>;
}
