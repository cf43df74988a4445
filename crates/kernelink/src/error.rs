use std::sync::Arc;

use thiserror::Error;

use crate::bridge::transport::SpawnError;
use crate::reference::RefId;

/// Errors surfaced by the bridge.
///
/// Template, binding and reference errors are returned synchronously from
/// `submit`. Everything that happens after a command has been handed to the
/// channel is delivered through that command's [`PendingReply`](crate::PendingReply).
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("malformed template at byte {offset}: {reason}")]
    MalformedTemplate { offset: usize, reason: String },

    #[error("no binding for placeholder '{name}'")]
    MissingBinding { name: String },

    #[error("unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("reference {id} is stale (disposed or never registered)")]
    StaleReference { id: RefId },

    #[error("invalid engine handle '{0}'")]
    InvalidHandle(String),

    #[error("channel closed: {reason}")]
    ChannelClosed { reason: String },

    #[error("remote execution failed: {message}")]
    RemoteExecution { message: String },

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("message handler already registered")]
    HandlerAlreadyRegistered,

    #[error("engine startup failed: {0}")]
    Startup(String),

    #[error("could not reach engine: {0}")]
    Spawn(#[source] Arc<SpawnError>),

    #[error("engine did not become ready in time")]
    StartupTimeout,

    #[error("io error: {0}")]
    Io(String),
}

impl BridgeError {
    pub fn channel_closed(reason: impl Into<String>) -> Self {
        Self::ChannelClosed {
            reason: reason.into(),
        }
    }

    /// Transport-level failure that takes the whole session down.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }
}

impl From<SpawnError> for BridgeError {
    fn from(e: SpawnError) -> Self {
        Self::Spawn(Arc::new(e))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_channel_closed_is_classified_as_closed() {
        assert!(BridgeError::channel_closed("gone").is_channel_closed());
        assert!(!BridgeError::RemoteExecution { message: "boom".into() }.is_channel_closed());
        assert!(!BridgeError::InvalidHandle("42".into()).is_channel_closed());
    }

    #[test]
    fn spawn_error_keeps_its_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = BridgeError::from(SpawnError::Connect {
            endpoint: "tcp:127.0.0.1:1".to_string(),
            source: io,
        });

        assert_eq!(
            err.to_string(),
            "could not reach engine: failed to connect to tcp:127.0.0.1:1: refused"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "failed to connect to tcp:127.0.0.1:1: refused");
    }
}
