//! The native client contract consumed by sessions.
//!
//! The remote service is reached through a vendor client library whose handle
//! is opaque, blocking and not thread-safe. This module pins down the narrow
//! surface the session layer needs from it:
//! - `SpatialClient`: one open handle (transactions, catalog enumeration,
//!   statement execution)
//! - `SpatialConnector`: opens handles from connection parameters
//! - `ClientError`: the native-layer error, optionally carrying an I/O cause
//!
//! Implementations are supplied by the embedding application; the session
//! layer never touches a handle outside its confined worker.

use std::io;

use thiserror::Error;

use crate::config::ConnectionConfig;
use crate::types::{RasterColumnDescriptor, RowSet, TableRegistration};

/// Error raised by the native client library.
///
/// Carries the vendor message, an optional vendor error code and, for
/// transport-level failures, the underlying [`std::io::Error`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ClientError {
    message: String,
    code: Option<i32>,
    #[source]
    cause: Option<io::Error>,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            cause: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// A native error rooted in a transport-level I/O failure.
    pub fn from_io(message: impl Into<String>, cause: io::Error) -> Self {
        Self {
            message: message.into(),
            code: None,
            cause: Some(cause),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn io_cause(&self) -> Option<&io::Error> {
        self.cause.as_ref()
    }

    /// Extracts the I/O cause, handing the error back when there is none.
    pub(crate) fn into_io_cause(self) -> Result<io::Error, Self> {
        match self.cause {
            Some(io) => Ok(io),
            None => Err(self),
        }
    }
}

/// One open handle to the remote spatial database service.
///
/// All operations block. The handle is not thread-safe; the session layer
/// guarantees it is only ever driven from one confined worker at a time, so
/// implementations need no internal locking.
pub trait SpatialClient: Send {
    /// Cheap liveness probe used by pool validation.
    fn ping(&mut self) -> Result<(), ClientError>;

    /// Toggles auto-commit on the server-side connection.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ClientError>;

    fn begin_transaction(&mut self) -> Result<(), ClientError>;

    fn commit_transaction(&mut self) -> Result<(), ClientError>;

    fn rollback_transaction(&mut self) -> Result<(), ClientError>;

    /// Enumerates every registered table, together with its layer when the
    /// table carries a spatial column. One round trip for the whole catalog.
    fn list_registrations(&mut self) -> Result<Vec<TableRegistration>, ClientError>;

    /// Enumerates every registered raster column in one round trip.
    fn list_raster_columns(&mut self) -> Result<Vec<RasterColumnDescriptor>, ClientError>;

    /// Executes a statement, returning the affected row count.
    fn execute(&mut self, statement: &str) -> Result<u64, ClientError>;

    /// Executes a query and fetches all rows.
    fn query(&mut self, statement: &str) -> Result<RowSet, ClientError>;

    /// Releases the server-side connection. The handle must not be used
    /// afterwards.
    fn close(&mut self) -> Result<(), ClientError>;
}

/// Opens native handles from connection parameters.
pub trait SpatialConnector: Send + Sync {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SpatialClient>, ClientError>;
}
