//! Session management module.
//!
//! This module provides:
//! - `Session`: the public handle around one native connection, with all work
//!   funneled through its confined worker
//! - `SessionContext`: the confined state commands execute against
//! - `Command`: the unit-of-work abstraction
//! - `SessionFactory`: opens native handles and spawns sessions
//! - `SessionId`: process-wide diagnostic identity

pub mod command;
pub mod context;
pub mod factory;
pub mod id;
pub mod session;

mod cache;
mod worker;

pub use command::Command;
pub use context::SessionContext;
pub use factory::SessionFactory;
pub use id::SessionId;
pub use session::Session;
