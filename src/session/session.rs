//! The public session handle.
//!
//! A `Session` is the confinement-and-lifecycle wrapper around one native
//! connection handle. Every operation funnels through [`Session::issue`],
//! which hands the work to the session's dedicated worker and blocks for the
//! result; a call arriving from inside a command on that same worker runs
//! inline instead, so nested invocations never deadlock. The handle is cheap
//! to clone; all clones drive the same worker.

use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use tracing::{debug, info, instrument, warn};

use crate::client::SpatialClient;
use crate::config::ConnectionConfig;
use crate::error::SessionError;
use crate::pool::SessionPool;
use crate::session::command::Command;
use crate::session::context::{SessionContext, SessionFlags};
use crate::session::id::SessionId;
use crate::session::worker::{self, Task};
use crate::types::{LayerDescriptor, RasterColumnDescriptor, TableDescriptor};

/// A pooled session owning one native connection to the spatial database.
///
/// Sessions are handed out by the pool in the active state, used for zero or
/// more commands and at most one transaction bracket, and given back with
/// [`close`](Session::close). After that, every operation fails fast until
/// the pool reactivates the session for the next borrower.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    config: ConnectionConfig,
    pool: Option<Weak<dyn SessionPool>>,
    flags: Arc<SessionFlags>,
    sender: Sender<Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Opens the worker around an already-connected native handle. Sessions
    /// are created through [`SessionFactory`](crate::session::SessionFactory);
    /// this is the factory's entry point.
    pub(crate) fn spawn(
        config: ConnectionConfig,
        client: Box<dyn SpatialClient>,
        pool: Option<Weak<dyn SessionPool>>,
    ) -> Result<Self, SessionError> {
        let id = SessionId::next();
        let flags = Arc::new(SessionFlags::new());
        let (sender, receiver) = mpsc::channel();
        let handle = worker::spawn(id, client, Arc::clone(&flags), receiver)?;
        info!(session_id = %id, host = %config.host, instance = %config.instance, "session created");
        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                config,
                pool,
                flags,
                sender,
                worker: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.flags.transaction_active()
    }

    pub fn is_passivated(&self) -> bool {
        self.inner.flags.passivated()
    }

    /// True once the worker has exited, e.g. after [`destroy`](Session::destroy)
    /// or because every handle was dropped. Used by pool eviction policies.
    pub fn is_defunct(&self) -> bool {
        self.inner.flags.worker_exited()
    }

    /// Executes `command` on the session's confined worker and blocks until
    /// it finishes. Called from inside a command on that worker, the nested
    /// command executes inline with no hand-off and behaves identically to a
    /// top-level call.
    #[instrument(skip(self, command), fields(session_id = %self.inner.id))]
    pub fn issue<C>(&self, mut command: C) -> Result<C::Output, SessionError>
    where
        C: Command + 'static,
        C::Output: 'static,
    {
        self.run(move |context| command.execute(context))
    }

    /// Resolves a table descriptor through the session's metadata cache.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn get_table(&self, name: &str) -> Result<Arc<TableDescriptor>, SessionError> {
        let name = name.to_string();
        self.run(move |context| context.get_table(&name))
    }

    /// Resolves a layer descriptor through the session's metadata cache.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn get_layer(&self, name: &str) -> Result<Arc<LayerDescriptor>, SessionError> {
        let name = name.to_string();
        self.run(move |context| context.get_layer(&name))
    }

    /// Resolves a raster column descriptor through the session's metadata
    /// cache.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn get_raster_column(
        &self,
        name: &str,
    ) -> Result<Arc<RasterColumnDescriptor>, SessionError> {
        let name = name.to_string();
        self.run(move |context| context.get_raster_column(&name))
    }

    /// Drops all cached descriptors; the next lookup re-enumerates the
    /// catalog.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn invalidate_caches(&self) -> Result<(), SessionError> {
        self.run(|context| {
            context.invalidate_caches();
            Ok(())
        })
    }

    /// Cheap liveness probe, used by pool validation on checkout.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn ping(&self) -> Result<(), SessionError> {
        self.run(|context| {
            context.with_client(|client| client.ping())?;
            Ok(())
        })
    }

    /// Begins a transaction. Legal only while idle and active.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn start_transaction(&self) -> Result<(), SessionError> {
        self.run(|context| context.start_transaction())
    }

    /// Commits the in-progress transaction. On failure the transaction stays
    /// open so the caller can still roll back.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn commit_transaction(&self) -> Result<(), SessionError> {
        self.run(|context| context.commit_transaction())
    }

    /// Rolls back the in-progress transaction. The transaction is considered
    /// closed afterwards even when the native rollback fails.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn rollback_transaction(&self) -> Result<(), SessionError> {
        let result = self.run(|context| context.rollback_transaction());
        // Also covers a failed hand-off: the session must never keep claiming
        // a transaction after a rollback attempt.
        self.inner.flags.set_transaction_active(false);
        result
    }

    /// Returns the session to its owning pool.
    ///
    /// Refused while a transaction is open, so uncommitted work is never
    /// silently lost. A failure reported by the pool itself is logged and
    /// swallowed; the caller's work already completed (see DESIGN.md).
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn close(&self) -> Result<(), SessionError> {
        self.ensure_active()?;
        if self.inner.flags.transaction_active() {
            return Err(SessionError::illegal_state(
                "cannot return a session with an open transaction; commit or roll back first",
            ));
        }
        self.mark_inactive();
        match self.inner.pool.as_ref().and_then(Weak::upgrade) {
            Some(pool) => {
                if let Err(error) = pool.return_session(self) {
                    warn!(
                        session_id = %self.inner.id,
                        error = %error,
                        "failed to return session to the pool"
                    );
                }
            }
            None => {
                debug!(session_id = %self.inner.id, "session closed without an owning pool");
            }
        }
        Ok(())
    }

    /// Pool hook: puts the session back in service for the next borrower.
    /// Application code never calls this.
    pub fn mark_active(&self) {
        self.inner.flags.set_passivated(false);
        debug!(session_id = %self.inner.id, "session activated");
    }

    /// Pool hook: takes the session out of service. Every public operation
    /// fails fast until the session is reactivated. Application code never
    /// calls this.
    pub fn mark_inactive(&self) {
        self.inner.flags.set_passivated(true);
        debug!(session_id = %self.inner.id, "session passivated");
    }

    /// Closes the native handle and stops the worker. Invoked by the pool's
    /// eviction policy, never by `close`. Idempotent, so eviction paths can
    /// call it on an already-destroyed session.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn destroy(&self) -> Result<(), SessionError> {
        if worker::inside_worker(self.inner.id) {
            return Err(SessionError::illegal_state(
                "destroy must not be invoked from inside a command",
            ));
        }
        let handle = self
            .inner
            .worker
            .lock()
            .expect("worker handle mutex poisoned")
            .take();
        let Some(handle) = handle else {
            debug!(session_id = %self.inner.id, "session already destroyed");
            return Ok(());
        };
        // A send failure means the worker already exited on its own; still
        // join it below.
        let _ = self.inner.sender.send(Task::Shutdown);
        if handle.join().is_err() {
            warn!(session_id = %self.inner.id, "session worker panicked during shutdown");
        }
        info!(session_id = %self.inner.id, "session destroyed");
        Ok(())
    }

    /// Guard at the top of every public operation: a passivated session must
    /// refuse all use without touching the native handle.
    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.inner.flags.passivated() {
            return Err(SessionError::illegal_state(
                "session has been returned to the pool and must not be used",
            ));
        }
        Ok(())
    }

    /// The dispatch funnel: runs `operation` inline when already on this
    /// session's worker, otherwise ships it over the task channel and blocks
    /// on the reply.
    fn run<T, F>(&self, operation: F) -> Result<T, SessionError>
    where
        F: FnOnce(&SessionContext) -> Result<T, SessionError> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_active()?;

        let operation = match worker::try_run_inline(self.inner.id, operation) {
            Ok(result) => return result,
            Err(operation) => operation,
        };

        let (reply_sender, reply_receiver) = mpsc::channel();
        let job: worker::Job = Box::new(move |context| {
            let _ = reply_sender.send(operation(context));
        });
        self.inner
            .sender
            .send(Task::Run(job))
            .map_err(|_| SessionError::WorkerTerminated)?;
        // A severed reply means the task died before answering, e.g. the
        // command panicked or the worker shut down mid-flight.
        reply_receiver
            .recv()
            .map_err(|_| SessionError::WorkerTerminated)?
    }
}

impl PartialEq for Session {
    /// Session equality is reference identity; the diagnostic id plays no
    /// part in it.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("passivated", &self.inner.flags.passivated())
            .field("in_transaction", &self.inner.flags.transaction_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use anyhow::Result;

    use super::*;
    use crate::client::mock::{MockClient, MockState};
    use crate::client::ClientError;

    fn test_session(state: &Arc<MockState>) -> Session {
        Session::spawn(
            ConnectionConfig::default(),
            MockClient::boxed(Arc::clone(state)),
            None,
        )
        .expect("session spawn")
    }

    fn pooled_session(state: &Arc<MockState>, pool: &Arc<MockPool>) -> Session {
        let pool_dyn: Arc<dyn SessionPool> = Arc::clone(pool) as Arc<dyn SessionPool>;
        let weak: Weak<dyn SessionPool> = Arc::downgrade(&pool_dyn);
        Session::spawn(
            ConnectionConfig::default(),
            MockClient::boxed(Arc::clone(state)),
            Some(weak),
        )
        .expect("session spawn")
    }

    fn ping_command() -> impl Command<Output = ()> {
        |ctx: &SessionContext| -> Result<(), SessionError> {
            ctx.with_client(|client| client.ping())?;
            Ok(())
        }
    }

    fn insert_command() -> impl Command<Output = u64> {
        |ctx: &SessionContext| -> Result<u64, SessionError> {
            Ok(ctx.with_client(|client| client.execute("INSERT INTO GIS.ROADS (SHAPE) VALUES (?)"))?)
        }
    }

    #[derive(Default)]
    struct MockPool {
        returned: Mutex<Vec<SessionId>>,
        fail_return: AtomicBool,
    }

    impl SessionPool for MockPool {
        fn return_session(&self, session: &Session) -> Result<(), SessionError> {
            if self.fail_return.load(Ordering::SeqCst) {
                return Err(SessionError::Pool("pool is shutting down".to_string()));
            }
            self.returned
                .lock()
                .expect("returned mutex poisoned")
                .push(session.session_id());
            Ok(())
        }

        fn invalidate(&self, _session: &Session) {}
    }

    #[test]
    fn concurrent_issuers_never_overlap_on_the_native_handle() {
        let state = MockState::new();
        let session = test_session(&state);

        let mut issuers = Vec::new();
        for _ in 0..4 {
            let session = session.clone();
            issuers.push(thread::spawn(move || {
                for _ in 0..5 {
                    session.issue(ping_command()).expect("ping failed");
                }
            }));
        }
        for issuer in issuers {
            issuer.join().expect("issuer thread panicked");
        }

        assert_eq!(state.pings.load(Ordering::SeqCst), 20);
        assert!(!state.overlap_detected.load(Ordering::SeqCst));
    }

    #[test]
    fn reentrant_issue_executes_inline_and_matches_top_level_results() {
        let state = MockState::with_catalog(&["GIS.ROADS"], &[]);
        let session = test_session(&state);
        let inner = session.clone();

        let (done_sender, done_receiver) = mpsc::channel();
        let runner = thread::spawn(move || {
            let outcome = inner.clone().issue(
                move |ctx: &SessionContext| -> Result<
                    (Arc<TableDescriptor>, Arc<TableDescriptor>),
                    SessionError,
                > {
                    let via_session = inner.get_table("GIS.ROADS")?;
                    let via_context = ctx.get_table("GIS.ROADS")?;
                    Ok((via_session, via_context))
                },
            );
            done_sender.send(outcome).expect("result channel closed");
        });

        let (via_session, via_context) = done_receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("re-entrant command deadlocked")
            .expect("re-entrant command failed");
        assert!(Arc::ptr_eq(&via_session, &via_context));
        assert_eq!(state.enumerations.load(Ordering::SeqCst), 1);
        runner.join().expect("runner thread panicked");
    }

    #[test]
    fn transaction_bracket_commits_and_returns_to_idle() -> Result<()> {
        let state = MockState::new();
        let session = test_session(&state);

        session.start_transaction()?;
        assert!(session.in_transaction());
        assert!(!state.auto_commit.load(Ordering::SeqCst));

        let affected = session.issue(insert_command())?;
        assert_eq!(affected, 1);

        session.commit_transaction()?;
        assert!(!session.in_transaction());
        assert!(state.auto_commit.load(Ordering::SeqCst));
        assert_eq!(
            state.statements.lock().unwrap().as_slice(),
            ["INSERT INTO GIS.ROADS (SHAPE) VALUES (?)"]
        );
        Ok(())
    }

    #[test]
    fn nested_transaction_start_is_refused() -> Result<()> {
        let state = MockState::new();
        let session = test_session(&state);

        session.start_transaction()?;
        let error = session.start_transaction().unwrap_err();
        assert!(matches!(error, SessionError::IllegalState(_)));
        assert!(session.in_transaction());
        Ok(())
    }

    #[test]
    fn failed_commit_leaves_the_transaction_open_for_rollback() -> Result<()> {
        let state = MockState::new();
        let session = test_session(&state);

        session.start_transaction()?;
        state.fail_commit.store(true, Ordering::SeqCst);
        let error = session.commit_transaction().unwrap_err();
        assert!(matches!(error, SessionError::DataSource(_)));
        assert!(session.in_transaction());

        session.rollback_transaction()?;
        assert!(!session.in_transaction());
        Ok(())
    }

    #[test]
    fn failed_rollback_still_closes_the_transaction() -> Result<()> {
        let state = MockState::new();
        let session = test_session(&state);

        session.start_transaction()?;
        state.fail_rollback.store(true, Ordering::SeqCst);
        let error = session.rollback_transaction().unwrap_err();
        assert!(matches!(error, SessionError::DataSource(_)));
        assert!(!session.in_transaction());

        // Idle again, so returning to a pool is legal.
        session.close()?;
        Ok(())
    }

    #[test]
    fn metadata_lookups_share_one_bulk_enumeration() -> Result<()> {
        let state = MockState::with_catalog(&["GIS.ROADS", "GIS.RIVERS"], &[]);
        let session = test_session(&state);

        let roads = session.get_table("gis.roads")?;
        assert_eq!(state.enumerations.load(Ordering::SeqCst), 1);

        // Served from the population triggered by the table lookup.
        let layer = session.get_layer("GIS.ROADS")?;
        assert_eq!(state.enumerations.load(Ordering::SeqCst), 1);
        assert_eq!(layer.spatial_column, "SHAPE");

        let roads_again = session.get_table("GIS.ROADS")?;
        assert!(Arc::ptr_eq(&roads, &roads_again));
        assert_eq!(state.enumerations.load(Ordering::SeqCst), 1);

        // An absent name is not speculatively re-queried.
        let missing = session.get_table("GIS.UNKNOWN").unwrap_err();
        assert!(matches!(missing, SessionError::TableNotFound(_)));
        assert_eq!(state.enumerations.load(Ordering::SeqCst), 1);

        session.invalidate_caches()?;
        let _ = session.get_table("GIS.RIVERS")?;
        assert_eq!(state.enumerations.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn raster_columns_populate_from_their_own_bulk_query() -> Result<()> {
        let state = MockState::with_catalog(&["GIS.ROADS"], &["GIS.DEM"]);
        let session = test_session(&state);

        let dem = session.get_raster_column("GIS.DEM")?;
        assert_eq!(state.raster_enumerations.load(Ordering::SeqCst), 1);
        assert_eq!(state.enumerations.load(Ordering::SeqCst), 0);

        let dem_again = session.get_raster_column("gis.dem")?;
        assert!(Arc::ptr_eq(&dem, &dem_again));
        assert_eq!(state.raster_enumerations.load(Ordering::SeqCst), 1);

        let missing = session.get_raster_column("GIS.ORTHO").unwrap_err();
        assert!(matches!(missing, SessionError::RasterColumnNotFound(_)));
        assert_eq!(state.raster_enumerations.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn passivated_sessions_fail_fast_without_touching_the_handle() -> Result<()> {
        let state = MockState::with_catalog(&["GIS.ROADS"], &[]);
        let session = test_session(&state);

        session.mark_inactive();
        let calls_before = state.native_calls.load(Ordering::SeqCst);

        assert!(matches!(
            session.ping().unwrap_err(),
            SessionError::IllegalState(_)
        ));
        assert!(matches!(
            session.get_table("GIS.ROADS").unwrap_err(),
            SessionError::IllegalState(_)
        ));
        assert!(matches!(
            session.start_transaction().unwrap_err(),
            SessionError::IllegalState(_)
        ));
        assert!(matches!(
            session.issue(ping_command()).unwrap_err(),
            SessionError::IllegalState(_)
        ));
        assert_eq!(state.native_calls.load(Ordering::SeqCst), calls_before);

        session.mark_active();
        session.ping()?;
        Ok(())
    }

    #[test]
    fn close_returns_the_session_to_its_pool_once() -> Result<()> {
        let state = MockState::new();
        let pool = Arc::new(MockPool::default());
        let session = pooled_session(&state, &pool);

        session.close()?;
        assert!(session.is_passivated());
        assert_eq!(
            pool.returned.lock().unwrap().as_slice(),
            [session.session_id()]
        );

        let second = session.close().unwrap_err();
        assert!(matches!(second, SessionError::IllegalState(_)));
        assert_eq!(pool.returned.lock().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn close_with_an_open_transaction_is_refused() -> Result<()> {
        let state = MockState::new();
        let pool = Arc::new(MockPool::default());
        let session = pooled_session(&state, &pool);

        session.start_transaction()?;
        let error = session.close().unwrap_err();
        assert!(matches!(error, SessionError::IllegalState(_)));
        assert!(session.in_transaction());
        assert!(!session.is_passivated());
        assert!(pool.returned.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn pool_return_failures_are_logged_not_propagated() -> Result<()> {
        let state = MockState::new();
        let pool = Arc::new(MockPool::default());
        pool.fail_return.store(true, Ordering::SeqCst);
        let session = pooled_session(&state, &pool);

        session.close()?;
        assert!(session.is_passivated());
        Ok(())
    }

    #[test]
    fn destroy_closes_the_native_handle_and_stops_the_worker() -> Result<()> {
        let state = MockState::new();
        let session = test_session(&state);

        session.destroy()?;
        assert!(state.closed.load(Ordering::SeqCst));
        assert!(session.is_defunct());
        assert!(matches!(
            session.ping().unwrap_err(),
            SessionError::WorkerTerminated
        ));

        session.destroy()?;
        Ok(())
    }

    #[test]
    fn dropping_the_last_handle_shuts_the_worker_down() {
        let state = MockState::new();
        drop(test_session(&state));

        // The worker notices the severed channel asynchronously.
        for _ in 0..200 {
            if state.closed.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("worker did not close the native handle after the last drop");
    }

    #[test]
    fn io_failures_surface_unwrapped() {
        let state = MockState::new();
        let session = test_session(&state);

        state.fail_next_execute_with_io.store(true, Ordering::SeqCst);
        let error = session.issue(insert_command()).unwrap_err();
        assert!(matches!(error, SessionError::Io(_)));
    }

    #[test]
    fn panicking_commands_report_termination_but_spare_the_worker() -> Result<()> {
        let state = MockState::new();
        let session = test_session(&state);

        let error = session
            .issue(|_ctx: &SessionContext| -> Result<(), SessionError> {
                panic!("command blew up");
            })
            .unwrap_err();
        assert!(matches!(error, SessionError::WorkerTerminated));

        // The worker survives a panicking command.
        session.ping()?;
        Ok(())
    }

    #[test]
    fn commands_may_raise_native_errors_directly() {
        let state = MockState::new();
        let session = test_session(&state);

        let error = session
            .issue(|_ctx: &SessionContext| -> Result<(), SessionError> {
                Err(ClientError::new("SE_INVALID_PARAM").with_code(-9).into())
            })
            .unwrap_err();
        match error {
            SessionError::DataSource(cause) => assert_eq!(cause.code(), Some(-9)),
            other => panic!("expected a data-source error, got {other:?}"),
        }
    }

    #[test]
    fn session_equality_is_reference_identity() {
        let state = MockState::new();
        let first = test_session(&state);
        let alias = first.clone();
        let second = test_session(&state);

        assert_eq!(first, alias);
        assert_ne!(first, second);
        assert_ne!(first.session_id(), second.session_id());
    }
}
