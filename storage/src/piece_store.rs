use async_trait::async_trait;
use bytes::Bytes;

use crate::PieceStoreError;

/// Key/value store holding segment and EC pieces.
///
/// `delete_piece` on a missing key returns [`PieceStoreError::NotFound`];
/// callers that treat deletion as idempotent check `is_not_found()`.
#[async_trait]
pub trait PieceStore: Send + Sync {
    /// Reads `length` bytes starting at `offset`. A zero length reads to the end.
    async fn get_piece(&self, key: &str, offset: u64, length: u64) -> Result<Bytes, PieceStoreError>;

    async fn put_piece(&self, key: &str, data: Bytes) -> Result<(), PieceStoreError>;

    async fn delete_piece(&self, key: &str) -> Result<(), PieceStoreError>;
}

pub(crate) fn slice_piece(key: &str, data: &Bytes, offset: u64, length: u64) -> Result<Bytes, PieceStoreError> {
    let size = data.len() as u64;
    let end = if length == 0 { size } else { offset.saturating_add(length) };
    if offset > size || end > size {
        return Err(PieceStoreError::InvalidRange {
            key: key.to_string(),
            offset,
            length,
            size,
        });
    }
    Ok(data.slice(offset as usize..end as usize))
}
