use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ExecutorError, Result};

/// Executor settings. Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub operator_address: String,
    /// Skips the chain lookup of this SP's ID when set.
    pub sp_id: Option<u32>,
    pub max_execute_number: i64,
    pub ask_task_interval_ms: u64,
    pub listen_seal_timeout_height: u64,
    pub listen_seal_retry_timeout_secs: u64,
    pub max_listen_seal_retry: u32,
    pub ask_replicate_approval_timeout_secs: u64,
    pub ask_replicate_approval_ex_factor: f64,
    pub bucket_traffic_keep_latest_day: u64,
    pub read_record_keep_latest_day: u64,
    pub read_record_delete_limit: usize,
    pub report_progress_per_n: u64,
    pub statistics_output_interval_secs: u64,
    pub resource: rcmgr::Config,
    pub network: network::Config,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            operator_address: String::new(),
            sp_id: None,
            max_execute_number: 1024,
            ask_task_interval_ms: 1000,
            listen_seal_timeout_height: 10,
            listen_seal_retry_timeout_secs: 6,
            max_listen_seal_retry: 3,
            ask_replicate_approval_timeout_secs: 10,
            ask_replicate_approval_ex_factor: 1.0,
            bucket_traffic_keep_latest_day: 30,
            read_record_keep_latest_day: 30,
            read_record_delete_limit: 100,
            report_progress_per_n: 10,
            statistics_output_interval_secs: 60,
            resource: rcmgr::Config::default(),
            network: network::Config::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn new(operator_address: impl Into<String>) -> Self {
        Self {
            operator_address: operator_address.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ExecutorConfig =
            serde_json::from_str(json).map_err(|e| ExecutorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_json(&raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_execute_number <= 0 {
            return Err(ExecutorError::InvalidConfig(
                "max_execute_number must be positive".to_string(),
            ));
        }
        if self.ask_task_interval_ms == 0 {
            return Err(ExecutorError::InvalidConfig(
                "ask_task_interval_ms must be positive".to_string(),
            ));
        }
        if self.report_progress_per_n == 0 {
            return Err(ExecutorError::InvalidConfig(
                "report_progress_per_n must be positive".to_string(),
            ));
        }
        if self.statistics_output_interval_secs == 0 {
            return Err(ExecutorError::InvalidConfig(
                "statistics_output_interval_secs must be positive".to_string(),
            ));
        }
        if self.ask_replicate_approval_ex_factor <= 0.0 {
            return Err(ExecutorError::InvalidConfig(
                "ask_replicate_approval_ex_factor must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ask_task_interval(&self) -> Duration {
        Duration::from_millis(self.ask_task_interval_ms)
    }

    pub fn listen_seal_retry_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_seal_retry_timeout_secs)
    }

    pub fn statistics_output_interval(&self) -> Duration {
        Duration::from_secs(self.statistics_output_interval_secs)
    }

    /// How long a replicate approval request may wait, scaled by the extension factor.
    pub fn replicate_approval_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ask_replicate_approval_timeout_secs as f64 * self.ask_replicate_approval_ex_factor)
    }
}

impl From<ExecutorConfig> for rcmgr::Config {
    fn from(config: ExecutorConfig) -> Self {
        config.resource
    }
}

impl From<ExecutorConfig> for network::Config {
    fn from(config: ExecutorConfig) -> Self {
        config.network
    }
}
