use async_trait::async_trait;
use network::{ManagerClient, ManagerError, Task};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, Result};
use crate::metrics::ExecutorMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Continue,
    Canceled,
}

/// Sends task snapshots upstream. Engines only see this capability, never the executor.
#[async_trait]
pub trait TaskReporter: Send + Sync {
    async fn report(&self, task: &Task) -> ReportOutcome;
}

pub struct ManagerReporter {
    manager: Arc<dyn ManagerClient>,
    metrics: Arc<ExecutorMetrics>,
}

impl ManagerReporter {
    pub fn new(manager: Arc<dyn ManagerClient>, metrics: Arc<ExecutorMetrics>) -> Self {
        Self { manager, metrics }
    }
}

#[async_trait]
impl TaskReporter for ManagerReporter {
    async fn report(&self, task: &Task) -> ReportOutcome {
        match self.manager.report_task(task).await {
            Ok(()) => {
                self.metrics.report_task_counter.with_label_values(&["success"]).inc();
                debug!("Reported task {}", task.key);
                ReportOutcome::Continue
            }
            Err(ManagerError::CanceledTask(reason)) => {
                self.metrics.report_task_counter.with_label_values(&["canceled"]).inc();
                info!("Task {} canceled by manager: {}", task.key, reason);
                ReportOutcome::Canceled
            }
            Err(e) => {
                self.metrics.report_task_counter.with_label_values(&["failure"]).inc();
                warn!("Failed to report task {}: {}", task.key, e);
                ReportOutcome::Continue
            }
        }
    }
}

/// Reports a checkpoint, turning a cancel into [`ExecutorError::Canceled`].
pub(crate) async fn report_progress(reporter: &dyn TaskReporter, task: &Task) -> Result<()> {
    match reporter.report(task).await {
        ReportOutcome::Continue => Ok(()),
        ReportOutcome::Canceled => Err(ExecutorError::Canceled),
    }
}

/// Fires once every `every` processed items.
pub(crate) struct ProgressTicker {
    every: u64,
    processed: u64,
}

impl ProgressTicker {
    pub(crate) fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            processed: 0,
        }
    }

    pub(crate) fn tick(&mut self) -> bool {
        self.processed += 1;
        self.processed % self.every == 0
    }
}
