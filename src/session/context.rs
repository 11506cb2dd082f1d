//! The confined side of a session.
//!
//! A `SessionContext` bundles the native handle with the metadata caches and
//! lives on the session's worker thread for the session's whole lifetime.
//! Commands receive it by reference and use it to reach the handle, resolve
//! metadata, drive the transaction bracket, or issue nested commands inline.
//! Because exactly one worker ever touches it, plain single-threaded interior
//! mutability is enough; there are no locks around the handle or the caches.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::client::{ClientError, SpatialClient};
use crate::error::SessionError;
use crate::session::cache::MetadataCache;
use crate::session::command::Command;
use crate::session::id::SessionId;
use crate::types::{LayerDescriptor, RasterColumnDescriptor, TableDescriptor};

/// Lifecycle flags shared between a session's public handle and its confined
/// worker.
pub(crate) struct SessionFlags {
    transaction_active: AtomicBool,
    passivated: AtomicBool,
    worker_exited: AtomicBool,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self {
            transaction_active: AtomicBool::new(false),
            passivated: AtomicBool::new(false),
            worker_exited: AtomicBool::new(false),
        }
    }

    pub fn transaction_active(&self) -> bool {
        self.transaction_active.load(Ordering::SeqCst)
    }

    pub fn set_transaction_active(&self, active: bool) {
        self.transaction_active.store(active, Ordering::SeqCst);
    }

    pub fn passivated(&self) -> bool {
        self.passivated.load(Ordering::SeqCst)
    }

    pub fn set_passivated(&self, passivated: bool) {
        self.passivated.store(passivated, Ordering::SeqCst);
    }

    pub fn worker_exited(&self) -> bool {
        self.worker_exited.load(Ordering::SeqCst)
    }

    pub fn set_worker_exited(&self) {
        self.worker_exited.store(true, Ordering::SeqCst);
    }
}

/// The confined state of one session: the native handle and the metadata
/// caches, reachable only from inside a command.
pub struct SessionContext {
    id: SessionId,
    client: RefCell<Box<dyn SpatialClient>>,
    cache: RefCell<MetadataCache>,
    flags: Arc<SessionFlags>,
}

impl SessionContext {
    pub(crate) fn new(
        id: SessionId,
        client: Box<dyn SpatialClient>,
        flags: Arc<SessionFlags>,
    ) -> Self {
        Self {
            id,
            client: RefCell::new(client),
            cache: RefCell::new(MetadataCache::default()),
            flags,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.id
    }

    pub fn in_transaction(&self) -> bool {
        self.flags.transaction_active()
    }

    /// Executes a nested command inline. Already confined, so there is no
    /// hand-off and no blocking.
    pub fn issue<C>(&self, mut command: C) -> Result<C::Output, SessionError>
    where
        C: Command,
    {
        command.execute(self)
    }

    /// Runs `op` with exclusive access to the native handle.
    ///
    /// The handle is borrowed only for the duration of the closure. Do not
    /// call back into session helpers from inside it; take what you need from
    /// the handle, return, and call them afterwards.
    pub fn with_client<T>(
        &self,
        op: impl FnOnce(&mut dyn SpatialClient) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let mut client = self.client.try_borrow_mut().map_err(|_| {
            ClientError::new("native handle is already in use by an enclosing operation")
        })?;
        op(client.as_mut())
    }

    /// Resolves a table descriptor, populating the table and layer caches
    /// from one bulk catalog enumeration on first use.
    pub fn get_table(&self, name: &str) -> Result<Arc<TableDescriptor>, SessionError> {
        self.ensure_tables_cached()?;
        self.cache
            .borrow()
            .table(name)
            .ok_or_else(|| SessionError::TableNotFound(name.to_string()))
    }

    /// Resolves a layer descriptor from the same bulk enumeration as
    /// [`get_table`](Self::get_table).
    pub fn get_layer(&self, name: &str) -> Result<Arc<LayerDescriptor>, SessionError> {
        self.ensure_tables_cached()?;
        self.cache
            .borrow()
            .layer(name)
            .ok_or_else(|| SessionError::LayerNotFound(name.to_string()))
    }

    /// Resolves a raster column descriptor, populating the raster cache from
    /// its own bulk query on first use.
    pub fn get_raster_column(
        &self,
        name: &str,
    ) -> Result<Arc<RasterColumnDescriptor>, SessionError> {
        self.ensure_rasters_cached()?;
        self.cache
            .borrow()
            .raster_column(name)
            .ok_or_else(|| SessionError::RasterColumnNotFound(name.to_string()))
    }

    /// Drops all cached descriptors; the next lookup re-enumerates.
    pub fn invalidate_caches(&self) {
        self.cache.borrow_mut().invalidate_all();
        debug!(session_id = %self.id, "metadata caches invalidated");
    }

    fn ensure_tables_cached(&self) -> Result<(), ClientError> {
        if self.cache.borrow().tables_populated() {
            return Ok(());
        }
        let registrations = self.with_client(|client| client.list_registrations())?;
        debug!(
            session_id = %self.id,
            registrations = registrations.len(),
            "populated table and layer caches"
        );
        self.cache.borrow_mut().store_registrations(registrations);
        Ok(())
    }

    fn ensure_rasters_cached(&self) -> Result<(), ClientError> {
        if self.cache.borrow().rasters_populated() {
            return Ok(());
        }
        let columns = self.with_client(|client| client.list_raster_columns())?;
        debug!(
            session_id = %self.id,
            raster_columns = columns.len(),
            "populated raster column cache"
        );
        self.cache.borrow_mut().store_raster_columns(columns);
        Ok(())
    }

    /// Starts a transaction: disables auto-commit, then begins a native
    /// transaction. Legal only while no transaction is in progress. On
    /// failure the session stays idle and auto-commit is restored best-effort.
    pub fn start_transaction(&self) -> Result<(), SessionError> {
        if self.flags.transaction_active() {
            return Err(SessionError::illegal_state(
                "a transaction is already in progress",
            ));
        }
        self.with_client(|client| {
            client.set_auto_commit(false)?;
            match client.begin_transaction() {
                Ok(()) => Ok(()),
                Err(error) => {
                    let _ = client.set_auto_commit(true);
                    Err(error)
                }
            }
        })?;
        self.flags.set_transaction_active(true);
        debug!(session_id = %self.id, "transaction started");
        Ok(())
    }

    /// Commits the in-progress transaction. The transaction flag is cleared
    /// only when the native commit succeeds, so a failed commit can still be
    /// rolled back.
    pub fn commit_transaction(&self) -> Result<(), SessionError> {
        if !self.flags.transaction_active() {
            return Err(SessionError::illegal_state("no transaction in progress"));
        }
        self.with_client(|client| {
            client.commit_transaction()?;
            client.set_auto_commit(true)
        })?;
        self.flags.set_transaction_active(false);
        debug!(session_id = %self.id, "transaction committed");
        Ok(())
    }

    /// Rolls back the in-progress transaction. The transaction flag is
    /// cleared even when the native rollback fails: a session must not keep
    /// claiming a transaction it can no longer reason about.
    pub fn rollback_transaction(&self) -> Result<(), SessionError> {
        if !self.flags.transaction_active() {
            return Err(SessionError::illegal_state("no transaction in progress"));
        }
        let outcome = self.with_client(|client| {
            let result = client.rollback_transaction();
            let _ = client.set_auto_commit(true);
            result
        });
        self.flags.set_transaction_active(false);
        outcome?;
        debug!(session_id = %self.id, "transaction rolled back");
        Ok(())
    }

    /// Releases the native handle. Worker shutdown only.
    pub(crate) fn close_client(&self) -> Result<(), ClientError> {
        self.with_client(|client| client.close())
    }
}
