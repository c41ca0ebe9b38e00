use chain::{ChainClient, MetadataClient};
use network::{ManagerClient, SecondaryClient, Signer};
use std::sync::Arc;
use storage::{PieceStore, SegmentEncoder, SpDb};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::metrics::ExecutorMetrics;

/// Services the executor drives. The host wires in real clients; tests wire in mocks.
#[derive(Clone)]
pub struct Collaborators {
    pub manager: Arc<dyn ManagerClient>,
    pub piece_store: Arc<dyn PieceStore>,
    pub sp_db: Arc<dyn SpDb>,
    pub chain: Arc<dyn ChainClient>,
    pub metadata: Arc<dyn MetadataClient>,
    pub signer: Arc<dyn Signer>,
    pub secondary: Arc<dyn SecondaryClient>,
    pub encoder: Arc<dyn SegmentEncoder>,
}

/// Read-only state shared by every worker.
pub(crate) struct ExecutorContext {
    pub(crate) config: ExecutorConfig,
    pub(crate) deps: Collaborators,
    pub(crate) metrics: Arc<ExecutorMetrics>,
    sp_id: OnceCell<u32>,
}

impl ExecutorContext {
    pub(crate) fn new(config: ExecutorConfig, deps: Collaborators, metrics: Arc<ExecutorMetrics>) -> Self {
        Self {
            config,
            deps,
            metrics,
            sp_id: OnceCell::new(),
        }
    }

    /// This SP's on-chain ID, resolved once from the operator address.
    pub(crate) async fn sp_id(&self) -> Result<u32> {
        let id = self
            .sp_id
            .get_or_try_init(|| async {
                if let Some(id) = self.config.sp_id {
                    return Ok(id);
                }
                let sp = self.deps.chain.query_sp(&self.config.operator_address).await?;
                info!("Resolved SP ID {} for operator {}", sp.id, self.config.operator_address);
                Ok::<u32, crate::error::ExecutorError>(sp.id)
            })
            .await?;
        Ok(*id)
    }
}
