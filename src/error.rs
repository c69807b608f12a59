use thiserror::Error;

/// Errors surfaced to the caller of a streaming session, either as the
/// return value of `start` or through the `on_error` callback.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a streaming session is already active")]
    AlreadyActive,

    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("no matching input device was found")]
    DeviceNotFound,

    #[error("audio capture failed: {0}")]
    CaptureFailed(String),

    #[error("timed out waiting for the relay connection to open")]
    ConnectTimeout,

    #[error("could not reach the relay: {0}")]
    Transport(String),

    #[error("the relay connection was lost")]
    ConnectionLost,

    #[error("relay reported an error: {0}")]
    Relay(String),

    #[error("unrecognized message from the relay: {0}")]
    MalformedMessage(String),
}
