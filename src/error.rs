use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors surfaced by the public API.
///
/// Recoverable conditions (`BufferFull`, `BufferEmpty`, `Timeout`) are ordinary
/// results of normal operation and never terminate the worker loops.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),

    #[error("unknown channel id {0}")]
    IdUnknown(u16),

    #[error("channel id {0} used twice in the same direction")]
    IdCollision(u16),

    #[error("buffer is full")]
    BufferFull,

    #[error("buffer is empty")]
    BufferEmpty,

    #[error("timed out waiting for data")]
    Timeout,

    #[error("manager is not running")]
    NotInitialized,

    #[error("buffer allocation failed: {0}")]
    Allocation(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure reported by the datagram transport collaborator.
///
/// `Closed` is terminal: the loop that observes it shuts the engine down.
/// Everything else degrades the one send or receive attempt it occurred on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket permission denied")]
    PermissionDenied,

    #[error("transport closed")]
    Closed,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
