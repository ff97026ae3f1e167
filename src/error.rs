//! Error types for segwatch.

use thiserror::Error;

/// Failures talking to the transfer backend.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status} for {endpoint}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode snapshot payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid source locator: {0}")]
    InvalidLocator(String),

    #[error("snapshot fetch timed out after {0} ms")]
    Timeout(u64),
}

/// A single snapshot record that cannot be merged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot record has no transfer id")]
    MissingId,

    #[error("snapshot record has negative transfer id {0}")]
    InvalidId(i64),
}

/// Commands the store refuses to overlay.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown transfer {0}")]
    UnknownTransfer(u64),

    #[error("transfer {0} is already finished")]
    TerminalTransfer(u64),
}

/// Failures seen by a caller issuing commands through an engine handle.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("engine has stopped")]
    EngineStopped,

    #[error("command was not delivered: {0}")]
    Delivery(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
