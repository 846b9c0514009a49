//! Error types for telemetry retrieval.
//!
//! Every fallible operation in mooring returns [`MooringError`]. Failures that
//! originate on the node (the remote side of the transport) are carried as a
//! tagged [`RemoteError`] inside [`MooringError::Remote`] so callers can match
//! them exhaustively instead of guessing from message text.
//!
//! ## Error Categories
//!
//! - **Transport failures**: connection refused, timeout, torn connection,
//!   malformed frames, result-kind mismatches
//! - **Remote application errors**: device or port missing, no data in the
//!   requested window, lease refused, generic remote failure
//! - **Codec errors**: unsupported packet tag, truncated or invalid buffers
//! - **Local persistence errors**: checkpoint and packet log I/O
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use mooring::{MooringError, RemoteError};
//!
//! let error = MooringError::connection_failed("node unreachable");
//! assert!(error.is_retryable());
//!
//! let empty = MooringError::remote("getDevicePackets", RemoteError::no_data("empty window"));
//! assert!(empty.is_nothing_to_do());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for mooring operations.
pub type Result<T, E = MooringError> = std::result::Result<T, E>;

/// Application error raised by the node and propagated over the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("device {source_id} not found")]
    DeviceNotFound { source_id: i64 },

    #[error("port not found: {reason}")]
    PortNotFound { reason: String },

    #[error("no data: {reason}")]
    NoData { reason: String },

    #[error("lease refused: {reason}")]
    LeaseRefused { reason: String },

    #[error("remote failure: {message}")]
    Failure { message: String },
}

impl RemoteError {
    pub fn no_data(reason: impl Into<String>) -> Self {
        RemoteError::NoData { reason: reason.into() }
    }

    pub fn lease_refused(reason: impl Into<String>) -> Self {
        RemoteError::LeaseRefused { reason: reason.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        RemoteError::Failure { message: message.into() }
    }

    /// Wire discriminant used by the transport.
    pub(crate) fn kind_code(&self) -> u8 {
        match self {
            RemoteError::DeviceNotFound { .. } => 0,
            RemoteError::PortNotFound { .. } => 1,
            RemoteError::NoData { .. } => 2,
            RemoteError::LeaseRefused { .. } => 3,
            RemoteError::Failure { .. } => 4,
        }
    }
}

/// Main error type for mooring operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MooringError {
    #[error("Failed to connect to node: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Connection to node is closed; reconnect before issuing '{command}'")]
    Disconnected { command: String },

    #[error("'{command}' timed out after {duration:?}")]
    Timeout { command: String, duration: Duration },

    #[error("'{command}' returned {found}, expected {expected}")]
    UnexpectedResult { command: String, expected: &'static str, found: String },

    #[error("Remote error from '{command}': {error}")]
    Remote {
        command: String,
        #[source]
        error: RemoteError,
    },

    #[error("Protocol error in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("Unsupported packet type tag {tag:#06x}")]
    UnsupportedPacketType { tag: u16 },

    #[error("Codec error in {context}: {details}")]
    Codec { context: String, details: String },

    #[error("Checkpoint file error: {path}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl MooringError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            MooringError::Connection { .. } => true,
            MooringError::Disconnected { .. } => true,
            MooringError::Timeout { .. } => true,
            MooringError::Protocol { .. } => true,
            MooringError::Remote { error, .. } => match error {
                RemoteError::DeviceNotFound { .. } => false,
                RemoteError::PortNotFound { .. } => false,
                RemoteError::NoData { .. } => true,
                RemoteError::LeaseRefused { .. } => false,
                RemoteError::Failure { .. } => true,
            },
            MooringError::UnexpectedResult { .. } => false,
            MooringError::UnsupportedPacketType { .. } => false,
            MooringError::Codec { .. } => false,
            MooringError::Checkpoint { .. } => false,
            MooringError::File { .. } => false,
            MooringError::Config { .. } => false,
            MooringError::InvalidArgument { .. } => false,
            MooringError::Cancelled => false,
        }
    }

    /// True for remote errors that mean "nothing to do this round".
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(
            self,
            MooringError::Remote {
                error: RemoteError::NoData { .. }
                    | RemoteError::DeviceNotFound { .. }
                    | RemoteError::PortNotFound { .. },
                ..
            }
        )
    }

    /// True when a single packet record could not be imported.
    pub fn is_codec_error(&self) -> bool {
        matches!(self, MooringError::Codec { .. } | MooringError::UnsupportedPacketType { .. })
    }

    /// True when the node refused a lease request.
    pub fn is_lease_refused(&self) -> bool {
        matches!(self, MooringError::Remote { error: RemoteError::LeaseRefused { .. }, .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            MooringError::Connection { .. } | MooringError::Disconnected { .. } => vec![
                "Check that the node service is running",
                "Verify the shore link is up and a lease is held",
                "Reconnect and retry the operation",
            ],
            MooringError::Timeout { .. } => vec![
                "Increase the transport timeout",
                "Reduce the per-request byte budget",
                "Check link quality",
            ],
            MooringError::UnexpectedResult { .. } | MooringError::Protocol { .. } => vec![
                "Check client and node protocol versions",
                "Reconnect to reset the framing state",
            ],
            MooringError::Remote { error, .. } => match error {
                RemoteError::DeviceNotFound { .. } | RemoteError::PortNotFound { .. } => {
                    vec!["List the node's ports to find valid device IDs"]
                }
                RemoteError::NoData { .. } => vec![
                    "Widen the retrieval time window",
                    "Include more packet types",
                ],
                RemoteError::LeaseRefused { .. } => vec![
                    "Wait for other lessees to release the link",
                    "Try the auxiliary channel",
                ],
                RemoteError::Failure { .. } => vec!["Inspect the node log"],
            },
            MooringError::UnsupportedPacketType { .. } | MooringError::Codec { .. } => vec![
                "Verify the record was written by a compatible exporter",
                "Run check-and-repair on the packet log",
            ],
            MooringError::Checkpoint { .. } | MooringError::File { .. } => vec![
                "Check file permissions",
                "Ensure the directory exists and has free space",
            ],
            MooringError::Config { .. } | MooringError::InvalidArgument { .. } => {
                vec!["Check the configuration file and command-line arguments"]
            }
            MooringError::Cancelled => vec!["Re-run the operation"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        MooringError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        MooringError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for remote application errors.
    pub fn remote(command: impl Into<String>, error: RemoteError) -> Self {
        MooringError::Remote { command: command.into(), error }
    }

    /// Helper constructor for malformed transport frames.
    pub fn protocol(context: impl Into<String>, details: impl Into<String>) -> Self {
        MooringError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for codec errors.
    pub fn codec(context: impl Into<String>, details: impl Into<String>) -> Self {
        MooringError::Codec { context: context.into(), details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MooringError::File { path: path.into(), source }
    }

    /// Helper constructor for invalid arguments.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        MooringError::InvalidArgument { reason: reason.into() }
    }
}

impl From<std::io::Error> for MooringError {
    fn from(err: std::io::Error) -> Self {
        MooringError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}
