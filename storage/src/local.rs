use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::piece_store::slice_piece;
use crate::{PieceStore, PieceStoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceStoreStats {
    pub total_pieces: u64,
    pub used_space_bytes: u64,
}

/// Piece store on the local filesystem. Pieces live under
/// `<root>/pieces/<shard>/<key>` where the shard is the first byte of the
/// key's SHA-256, so no directory grows unbounded.
pub struct LocalPieceStore {
    storage_path: PathBuf,
    stats: Arc<RwLock<PieceStoreStats>>,
}

impl LocalPieceStore {
    pub async fn new(storage_path: impl AsRef<Path>) -> Result<Self, PieceStoreError> {
        let storage_path = storage_path.as_ref().to_path_buf();
        fs::create_dir_all(storage_path.join("pieces")).await?;

        let store = Self {
            storage_path,
            stats: Arc::new(RwLock::new(PieceStoreStats::default())),
        };
        store.update_stats().await?;

        tracing::info!("Local piece store opened at {:?}", store.storage_path);
        Ok(store)
    }

    pub async fn stats(&self) -> PieceStoreStats {
        self.stats.read().await.clone()
    }

    fn piece_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.storage_path
            .join("pieces")
            .join(format!("{:02x}", digest[0]))
            .join(key)
    }

    /// Rescans the piece directory and rebuilds the usage counters.
    pub async fn update_stats(&self) -> Result<(), PieceStoreError> {
        let mut total_pieces = 0;
        let mut used_space_bytes = 0;

        let mut shards = fs::read_dir(self.storage_path.join("pieces")).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut pieces = fs::read_dir(shard.path()).await?;
            while let Some(piece) = pieces.next_entry().await? {
                let metadata = piece.metadata().await?;
                if metadata.is_file() {
                    total_pieces += 1;
                    used_space_bytes += metadata.len();
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.total_pieces = total_pieces;
        stats.used_space_bytes = used_space_bytes;
        Ok(())
    }
}

#[async_trait]
impl PieceStore for LocalPieceStore {
    async fn get_piece(&self, key: &str, offset: u64, length: u64) -> Result<Bytes, PieceStoreError> {
        let data = match fs::read(self.piece_path(key)).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PieceStoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        slice_piece(key, &data, offset, length)
    }

    async fn put_piece(&self, key: &str, data: Bytes) -> Result<(), PieceStoreError> {
        let path = self.piece_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let previous = match fs::metadata(&path).await {
            Ok(metadata) => Some(metadata.len()),
            Err(_) => None,
        };

        // write-then-rename keeps readers from seeing a partial piece
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &path).await?;

        let mut stats = self.stats.write().await;
        match previous {
            Some(len) => stats.used_space_bytes = stats.used_space_bytes.saturating_sub(len),
            None => stats.total_pieces += 1,
        }
        stats.used_space_bytes += data.len() as u64;

        tracing::debug!("Stored piece: {} ({})", key, data.len());
        Ok(())
    }

    async fn delete_piece(&self, key: &str) -> Result<(), PieceStoreError> {
        let path = self.piece_path(key);
        let len = match fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PieceStoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PieceStoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let mut stats = self.stats.write().await;
        stats.total_pieces = stats.total_pieces.saturating_sub(1);
        stats.used_space_bytes = stats.used_space_bytes.saturating_sub(len);

        tracing::debug!("Deleted piece: {}", key);
        Ok(())
    }
}
