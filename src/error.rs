use thiserror::Error;

use crate::client::ClientError;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A native error whose underlying cause was a recoverable I/O failure.
    /// The cause is surfaced unwrapped so callers can tell transient I/O
    /// problems apart from logic errors.
    #[error("i/o error talking to the spatial database")]
    Io(#[from] std::io::Error),

    /// Any other native-layer failure, wrapped with its cause attached.
    #[error("spatial database error: {0}")]
    DataSource(#[source] ClientError),

    /// A precondition of the session lifecycle was violated. This is a
    /// programming error on the caller's side and is never retried.
    #[error("illegal session state: {0}")]
    IllegalState(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("layer not found: {0}")]
    LayerNotFound(String),

    #[error("raster column not found: {0}")]
    RasterColumnNotFound(String),

    /// The confined worker is gone or the hand-off to it was severed.
    #[error("session worker is no longer running")]
    WorkerTerminated,

    /// Failure reported by the owning pool while collaborating with it.
    #[error("connection pool error: {0}")]
    Pool(String),
}

impl SessionError {
    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        SessionError::IllegalState(message.into())
    }

    /// Translates a native-layer error: a recoverable I/O cause is re-raised
    /// unwrapped, everything else becomes a data-source error.
    pub(crate) fn from_native(error: ClientError) -> Self {
        match error.into_io_cause() {
            Ok(io) => SessionError::Io(io),
            Err(other) => SessionError::DataSource(other),
        }
    }
}

/// Native errors crossing the session boundary are translated, so `?` on a
/// [`ClientError`] inside a command applies the rule above.
impl From<ClientError> for SessionError {
    fn from(error: ClientError) -> Self {
        SessionError::from_native(error)
    }
}
