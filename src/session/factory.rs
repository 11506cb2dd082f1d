//! Factory for fully wired sessions.
//!
//! The factory is what a pool drives to create sessions: it opens a native
//! handle through the injected connector, spawns the session's confined
//! worker around it, and hands back the session in the active state.

use std::sync::{Arc, Weak};

use tracing::{info, instrument};

use crate::client::SpatialConnector;
use crate::config::ConnectionConfig;
use crate::error::SessionError;
use crate::pool::SessionPool;
use crate::session::session::Session;

pub struct SessionFactory {
    config: ConnectionConfig,
    connector: Arc<dyn SpatialConnector>,
}

impl SessionFactory {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn SpatialConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens a native connection and wraps it in a fresh session. `pool` is
    /// the back-reference the session uses to return itself on `close`; pools
    /// that reclaim sessions by dropping them pass `None`.
    #[instrument(skip_all, fields(host = %self.config.host, instance = %self.config.instance))]
    pub fn create_session(
        &self,
        pool: Option<Weak<dyn SessionPool>>,
    ) -> Result<Session, SessionError> {
        let client = self.connector.connect(&self.config)?;
        let session = Session::spawn(self.config.clone(), client, pool)?;
        info!(session_id = %session.session_id(), "session opened by factory");
        Ok(session)
    }
}
