mod limit;
mod scope;

pub use limit::{Limit, ReserveTaskPriority, ScopeStat, HIGH_PRIORITY_LEVEL, MEDIUM_PRIORITY_LEVEL};
pub use scope::{ResourceManager, ResourceScope, ResourceScopeSpan, ScopeSnapshot};

use serde::{Deserialize, Serialize};

/// Limits for the process-wide system scope and for each service scope opened on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub system_limit: Limit,
    pub service_limit: Limit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_limit: Limit::new(8 * 1024 * 1024 * 1024, 2048, 1024, 512, 512),
            service_limit: Limit::new(4 * 1024 * 1024 * 1024, 1024, 512, 256, 256),
        }
    }
}

pub type Result<T> = std::result::Result<T, RcmgrError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RcmgrError {
    #[error("resource exhausted in scope {scope}: {dimension} requested {requested}, remaining {remaining}")]
    ResourceExhausted {
        scope: String,
        dimension: &'static str,
        requested: i64,
        remaining: i64,
    },

    #[error("resource scope closed: {0}")]
    ScopeClosed(String),
}
