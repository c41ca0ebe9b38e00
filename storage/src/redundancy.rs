use bytes::Bytes;

use crate::EncodeError;

/// Erasure coder for one segment. Returns `data_chunks + parity_chunks`
/// shards; shard `j` is delivered to the secondary at redundancy index `j`.
pub trait SegmentEncoder: Send + Sync {
    fn encode(&self, segment: &[u8], data_chunks: u32, parity_chunks: u32) -> Result<Vec<Bytes>, EncodeError>;
}
