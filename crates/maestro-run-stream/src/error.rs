//! Error types for the run stream client.

use thiserror::Error;

use crate::model::{RunId, RunStatus};

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Failure of a single status probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The service has no record of the run.
    #[error("agent run {0} not found")]
    NotFound(RunId),

    /// Network failure or non-2xx other than 404.
    #[error("transient probe failure{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// The status body could not be decoded.
    #[error("malformed run status: {0}")]
    Decode(String),
}

impl ProbeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Channel-level failure. Never fatal until verified by a fresh probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect event channel: {0}")]
    Connect(String),

    #[error("event channel rejected (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("event channel stream error: {0}")]
    Stream(String),
}

/// Terminal conditions reported to the observer, each exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The run was already known terminal, or the probe did not report it
    /// running. `status` is `None` when the registry short-circuited the start
    /// or the service has no record of the run.
    #[error("agent run is not running{}", .status.map(|s| format!(" (status: {s})")).unwrap_or_default())]
    NotRunning { status: Option<RunStatus> },

    /// The server reported mid-stream that the run is not in its active-run table.
    #[error("agent run not found in active runs")]
    NotFoundMidStream,

    /// The stream carried an in-band end-of-run signal.
    #[error("agent run ended")]
    RunEnded,

    /// A channel error was confirmed as terminal by a fresh probe.
    #[error("event channel failed and run is no longer running: {reason}")]
    TransportFailedAfterVerification { reason: String },

    /// The initial probe failed transiently; retrying is the caller's call.
    #[error("could not verify run status: {message}")]
    ProbeTransient { message: String },

    /// The channel could not be kept open although the run is still running.
    #[error("event channel lost while run is still running: {reason}")]
    ChannelLost { reason: String },
}

/// Failures of plain request/response API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
