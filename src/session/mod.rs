//! Connected sessions: identity mapping and snapshot delivery

pub mod broadcast;
pub mod registry;

pub use broadcast::{DeliveryError, OutboxReceivers, SessionOutbox, SnapshotBroadcaster};
pub use registry::{SessionError, SessionRegistry};

use uuid::Uuid;

/// Identity of one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
