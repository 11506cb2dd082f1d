//! The confined worker behind each session.
//!
//! One dedicated thread per session owns the [`SessionContext`] and drains a
//! task channel in strict submission order. While a task runs, the worker
//! publishes a thread-local re-entry tag (session id plus a pointer to the
//! confined context); a session operation that finds its own tag on the
//! current thread is a nested call from inside a command and executes inline
//! instead of handing off, which would deadlock the worker against itself.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::client::SpatialClient;
use crate::session::context::{SessionContext, SessionFlags};
use crate::session::id::SessionId;

pub(crate) type Job = Box<dyn FnOnce(&SessionContext) + Send>;

pub(crate) enum Task {
    Run(Job),
    Shutdown,
}

thread_local! {
    static ACTIVE_CONTEXT: Cell<Option<(SessionId, *const SessionContext)>> =
        const { Cell::new(None) };
}

/// Runs `operation` inline against the confined context when the current
/// thread is session `id`'s worker executing a task; otherwise hands the
/// operation back untouched.
pub(crate) fn try_run_inline<R, F>(id: SessionId, operation: F) -> Result<R, F>
where
    F: FnOnce(&SessionContext) -> R,
{
    ACTIVE_CONTEXT.with(|cell| match cell.get() {
        Some((active, pointer)) if active == id => {
            // The pointer was published by the worker loop below and stays
            // valid until the task that published it returns; only shared
            // references are ever derived from it, on this thread alone.
            let context = unsafe { &*pointer };
            Ok(operation(context))
        }
        _ => Err(operation),
    })
}

/// True when the current thread is session `id`'s worker executing a task.
pub(crate) fn inside_worker(id: SessionId) -> bool {
    ACTIVE_CONTEXT.with(|cell| matches!(cell.get(), Some((active, _)) if active == id))
}

pub(crate) fn spawn(
    id: SessionId,
    client: Box<dyn SpatialClient>,
    flags: Arc<SessionFlags>,
    receiver: Receiver<Task>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("session-{id}"))
        .spawn(move || run(id, client, flags, receiver))
}

fn run(
    id: SessionId,
    client: Box<dyn SpatialClient>,
    flags: Arc<SessionFlags>,
    receiver: Receiver<Task>,
) {
    let context = SessionContext::new(id, client, Arc::clone(&flags));
    debug!(session_id = %id, "session worker started");

    // Tasks execute strictly in submission order. A disconnected channel
    // means every session handle is gone and the worker shuts itself down.
    while let Ok(task) = receiver.recv() {
        match task {
            Task::Run(job) => {
                ACTIVE_CONTEXT.with(|cell| cell.set(Some((id, &context as *const _))));
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&context)));
                ACTIVE_CONTEXT.with(|cell| cell.set(None));
                if outcome.is_err() {
                    // The submitter observes the severed reply channel; the
                    // worker itself stays up for subsequent commands.
                    warn!(session_id = %id, "command panicked inside the session worker");
                }
            }
            Task::Shutdown => break,
        }
    }

    if let Err(error) = context.close_client() {
        warn!(
            session_id = %id,
            error = %error,
            "failed to close the native handle during worker shutdown"
        );
    }
    flags.set_worker_exited();
    debug!(session_id = %id, "session worker stopped");
}
