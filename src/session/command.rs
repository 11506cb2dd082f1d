//! The unit-of-work abstraction.
//!
//! A command is one logical operation against the native handle. It runs
//! inside the session's confined worker and receives the confined
//! [`SessionContext`], through which it may touch the handle, read the
//! metadata caches, drive the transaction bracket, or issue nested commands.

use crate::error::SessionError;
use crate::session::context::SessionContext;

/// One logical operation executed against the native handle.
///
/// Native failures convert into [`SessionError`] with `?` (recoverable I/O
/// causes re-raised unwrapped, everything else wrapped as a data-source
/// error). Commands must not block on anything other than the handle's own
/// blocking I/O and must not spawn execution contexts of their own; the
/// session provides the only confinement they run under.
pub trait Command: Send {
    type Output: Send;

    fn execute(&mut self, session: &SessionContext) -> Result<Self::Output, SessionError>;
}

/// Closures are commands, so one-off operations read inline:
///
/// ```ignore
/// let version = session.issue(|ctx: &SessionContext| -> Result<RowSet, SessionError> {
///     Ok(ctx.with_client(|client| client.query("SELECT version FROM VERSION"))?)
/// })?;
/// ```
impl<F, T> Command for F
where
    F: FnMut(&SessionContext) -> Result<T, SessionError> + Send,
    T: Send,
{
    type Output = T;

    fn execute(&mut self, session: &SessionContext) -> Result<T, SessionError> {
        self(session)
    }
}
