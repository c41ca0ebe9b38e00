pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod reporter;

mod gc;
mod receive;
mod replicate;
mod seal;

pub use config::ExecutorConfig;
pub use context::Collaborators;
pub use error::{ExecutorError, Result};
pub use executor::{Executor, EXECUTOR_MODULE_NAME};
pub use metrics::ExecutorMetrics;
pub use reporter::{ManagerReporter, ReportOutcome, TaskReporter};

// Re-export key types from workspace crates
pub use chain;
pub use network;
pub use rcmgr;
pub use storage;
