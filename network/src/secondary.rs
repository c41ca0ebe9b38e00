use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::task::ReceivePieceTask;
use crate::{Config, NetworkError, Result};

pub const REPLICATE_OBJECT_PIECE_PATH: &str = "/greenfield/receiver/v1/replicate-piece";
pub const RECEIVE_MSG_HEADER: &str = "X-Gnfd-Receive-Msg";
pub const INTEGRITY_HASH_SIGNATURE_HEADER: &str = "X-Gnfd-Integrity-Hash-Signature";

/// Channel from a primary to its secondary SPs.
#[async_trait]
pub trait SecondaryClient: Send + Sync {
    async fn replicate_piece_to_secondary(&self, endpoint: &str, task: &ReceivePieceTask, data: Bytes) -> Result<()>;

    /// Tells the secondary every piece has been sent; returns its BLS
    /// signature over the integrity hash.
    async fn done_replicate_piece_to_secondary(&self, endpoint: &str, task: &ReceivePieceTask) -> Result<Vec<u8>>;
}

/// Talks to secondaries over their HTTP gateway. The receive task travels
/// hex-encoded JSON in a header; the body carries the piece bytes.
pub struct HttpSecondaryClient {
    client: reqwest::Client,
}

impl HttpSecondaryClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }

    fn receive_header(task: &ReceivePieceTask) -> Result<String> {
        Ok(hex::encode(serde_json::to_vec(task)?))
    }

    async fn put(&self, endpoint: &str, task: &ReceivePieceTask, body: Bytes) -> Result<reqwest::Response> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), REPLICATE_OBJECT_PIECE_PATH);
        let response = self
            .client
            .put(&url)
            .header(RECEIVE_MSG_HEADER, Self::receive_header(task)?)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NetworkError::Timeout(format!("{}: {}", endpoint, e))
                } else {
                    NetworkError::ConnectionFailed(format!("{}: {}", endpoint, e))
                }
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(NetworkError::Protocol(format!(
                "failed to replicate piece, status code {} endpoint {}",
                response.status().as_u16(),
                endpoint
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SecondaryClient for HttpSecondaryClient {
    async fn replicate_piece_to_secondary(&self, endpoint: &str, task: &ReceivePieceTask, data: Bytes) -> Result<()> {
        let size = data.len();
        self.put(endpoint, task, data).await?;
        tracing::debug!(
            "Replicated piece {} of object {} to {} ({} bytes)",
            task.piece_idx,
            task.object_info.id,
            endpoint,
            size
        );
        Ok(())
    }

    async fn done_replicate_piece_to_secondary(&self, endpoint: &str, task: &ReceivePieceTask) -> Result<Vec<u8>> {
        let response = self.put(endpoint, task, Bytes::new()).await?;
        let signature = response
            .headers()
            .get(INTEGRITY_HASH_SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                NetworkError::Protocol(format!("missing {} from {}", INTEGRITY_HASH_SIGNATURE_HEADER, endpoint))
            })?;
        hex::decode(signature).map_err(|e| NetworkError::Protocol(format!("bad signature from {}: {}", endpoint, e)))
    }
}
