use serde::{Deserialize, Serialize};

/// Seal transaction submitted by the primary once every secondary has
/// acknowledged its pieces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSealObject {
    pub operator: String,
    pub bucket_name: String,
    pub object_name: String,
    pub global_virtual_group_id: u32,
    pub secondary_sp_bls_agg_signatures: Vec<u8>,
}
