use std::io;
use thiserror::Error;

/// Failures of the underlying event transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("transport I/O failed")]
    Io(#[from] io::Error),

    #[error("failed to encode outbound event")]
    Encode(#[from] serde_json::Error),

    #[error("outbound queue is full")]
    QueueFull,

    #[error("transport worker is gone")]
    WorkerGone,
}

/// An inbound event that could not be turned into an `Inbound` value.
/// These are counted and dropped, never fatal.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("event '{event}' is missing required field '{field}'")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    #[error("event '{event}' has an invalid payload: {reason}")]
    InvalidPayload {
        event: &'static str,
        reason: String,
    },

    #[error("malformed event envelope")]
    Envelope(#[from] serde_json::Error),
}

/// Failures reported by the presentation collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PresentError {
    /// The render target was removed out-of-band. Treated as a close.
    #[error("render target no longer exists")]
    TargetGone,

    #[error("presenter failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
