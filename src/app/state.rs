//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::session::{SessionRegistry, SnapshotBroadcaster};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broadcaster: Arc<SnapshotBroadcaster>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let broadcaster = Arc::new(SnapshotBroadcaster::new());

        // The tick loop itself is started by the first join
        let sessions = Arc::new(SessionRegistry::new(config.game.clone(), broadcaster.clone()));

        Self {
            config,
            broadcaster,
            sessions,
        }
    }
}
