//! Pooled, thread-confined sessions for remote spatial database services.
//!
//! The native client handle for these services is blocking and not
//! thread-safe, yet applications share it through a connection pool. This
//! crate guards every handle with a [`Session`]: one dedicated worker per
//! session executes all commands in submission order, nested commands run
//! inline instead of deadlocking the worker against itself, transactions are
//! an explicit bracket, and catalog metadata is cached per session without
//! locks. Pools drive sessions through [`SessionFactory`] and the
//! [`pool::SessionPool`] contract, or through the bundled r2d2 manager.

pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod session;
pub mod types;

pub use client::{ClientError, SpatialClient, SpatialConnector};
pub use config::ConnectionConfig;
pub use error::SessionError;
pub use pool::{SessionManager, SessionPool};
pub use session::{Command, Session, SessionContext, SessionFactory, SessionId};
