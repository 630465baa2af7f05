//! Error types for the rebalancer.

use std::path::PathBuf;

use spotsync_broker::BrokerError;

/// All errors that can occur during rebalancer operation.
///
/// Per-action broker failures never show up here; they are recorded in the
/// [`ExecutionReport`](crate::execution::ExecutionReport). Only failures that
/// stop a whole run do.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("target file error: {0}")]
    Target(String),

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Broker failure that invalidates the whole run (auth, or connection
    /// retries exhausted while capturing the account snapshot).
    #[error("broker error on account {account}: {source}")]
    Broker {
        account: String,
        source: BrokerError,
    },

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
