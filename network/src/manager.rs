use async_trait::async_trait;
use rcmgr::Limit;

use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    #[error("no task matches the remaining resource limit")]
    NoTaskMatchLimit,

    #[error("task dispatch is rate limited")]
    RateLimited,

    #[error("task canceled by manager: {0}")]
    CanceledTask(String),

    #[error("manager transport error: {0}")]
    Transport(String),
}

impl ManagerError {
    /// Errors meaning there is simply nothing to do right now.
    pub fn is_no_task(&self) -> bool {
        matches!(self, ManagerError::NoTaskMatchLimit | ManagerError::RateLimited)
    }
}

/// The manager module that owns task queues.
#[async_trait]
pub trait ManagerClient: Send + Sync {
    /// Hands out one task whose estimated needs fit within `limit`.
    async fn ask_task(&self, limit: &Limit) -> Result<Task, ManagerError>;

    /// Records the task's progress. Fails with `CanceledTask` once the
    /// manager has dropped the task.
    async fn report_task(&self, task: &Task) -> Result<(), ManagerError>;
}
