//! Pool collaboration.
//!
//! Sessions do not implement pooling themselves; they cooperate with an
//! external pool through two surfaces:
//! - [`SessionPool`]: the injected contract a session's `close` uses to hand
//!   itself back (and that tests mock)
//! - [`SessionManager`]: ready-made [`r2d2`] glue for applications that do
//!   not bring their own pool, where returning is the guard drop and
//!   `mark_active`/`mark_inactive` never come into play

use r2d2::ManageConnection;
use tracing::debug;

use crate::error::SessionError;
use crate::session::{Session, SessionFactory};

/// The contract a session consumes from its owning pool.
///
/// Borrowing lives on the pool implementation itself; the session only ever
/// needs to give itself back or ask to be discarded. Implementations receive
/// sessions already passivated and are expected to call
/// [`Session::mark_active`] when handing one to the next borrower, and
/// [`Session::destroy`] when evicting one.
pub trait SessionPool: Send + Sync {
    /// Accepts a session back into the pool.
    fn return_session(&self, session: &Session) -> Result<(), SessionError>;

    /// Discards a session that must not be reused (broken handle, failed
    /// validation).
    fn invalidate(&self, session: &Session);
}

/// r2d2 connection manager handing out sessions.
///
/// Creation opens a native handle and spawns the session worker; validation
/// pings through the confinement path; a session whose worker has died is
/// reported broken so the pool replaces it.
pub struct SessionManager {
    factory: SessionFactory,
}

impl SessionManager {
    pub fn new(factory: SessionFactory) -> Self {
        Self { factory }
    }
}

impl ManageConnection for SessionManager {
    type Connection = Session;
    type Error = SessionError;

    fn connect(&self) -> Result<Session, SessionError> {
        let session = self.factory.create_session(None)?;
        debug!(session_id = %session.session_id(), "pool created session");
        Ok(session)
    }

    fn is_valid(&self, session: &mut Session) -> Result<(), SessionError> {
        session.ping()
    }

    fn has_broken(&self, session: &mut Session) -> bool {
        session.is_defunct() || session.is_passivated()
    }
}
