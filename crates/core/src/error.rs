use std::{path::PathBuf, time::Duration};

/// Result alias that carries the custom [`LipSyncError`] type.
pub type Result<T> = std::result::Result<T, LipSyncError>;

/// Failure reported by a [`Transport`](crate::rig::Transport).
///
/// The split matters: only [`TransportError::Closed`] triggers the
/// reconnect-and-retry cycle in [`RigSession::send_resilient`](crate::RigSession::send_resilient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed by the peer or is no longer usable.
    #[error("connection closed")]
    Closed,
    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// True when the failure warrants a reconnect.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LipSyncError {
    /// The watched file never held still long enough.
    #[error("{} was not write-stable after {elapsed:?}", .path.display())]
    Timeout { path: PathBuf, elapsed: Duration },
    /// Connecting to the controller failed.
    #[error("could not connect to controller: {0}")]
    Connection(String),
    /// The controller refused to authenticate the plugin.
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The controller answered with an `APIError` message.
    #[error("controller error {code}: {message}")]
    Api { code: i64, message: String },
    /// The controller answered with something we did not ask for.
    #[error("unexpected controller response: {0}")]
    Protocol(String),
    #[error("playback failed: {0}")]
    Playback(String),
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Free-form message for call sites without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl LipSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for LipSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LipSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<hound::Error> for LipSyncError {
    fn from(value: hound::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<serde_json::Error> for LipSyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Protocol(value.to_string())
    }
}
