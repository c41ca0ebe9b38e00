use sha2::{Digest, Sha256};

pub fn piece_checksum(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Integrity hash of an object copy: SHA-256 over the concatenated piece checksums.
pub fn integrity_hash(piece_checksums: &[Vec<u8>]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for checksum in piece_checksums {
        hasher.update(checksum);
    }
    hasher.finalize().to_vec()
}

pub fn verify_piece_checksum(data: &[u8], expected: &[u8]) -> bool {
    piece_checksum(data) == expected
}
