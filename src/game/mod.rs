//! Game simulation modules

pub mod physics;
pub mod reconciler;
pub mod scoring;
pub mod snapshot;
pub mod tick;
pub mod world;

pub use reconciler::{InputOutcome, InputReconciler};
pub use tick::GameLoop;
pub use world::World;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::session::{ConnectionId, SessionOutbox};

/// Identity of a live player, stable for the lifetime of its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a live coin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoinId(pub Uuid);

impl std::fmt::Display for CoinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Directional intent as last reported by a client.
/// Flags missing from the wire default to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputIntent {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl InputIntent {
    pub const IDLE: Self = Self {
        up: false,
        down: false,
        left: false,
        right: false,
    };
}

/// Work queued for the tick loop, drained at the start of every tick
#[derive(Debug, Clone)]
pub enum GameCommand {
    /// Spawn a player, then greet its session and start sending it snapshots
    Join {
        player_id: PlayerId,
        name: String,
        outbox: Arc<SessionOutbox>,
    },
    /// Remove a player and stop sending snapshots to its session
    Leave {
        player_id: PlayerId,
        connection_id: ConnectionId,
    },
    Input {
        player_id: PlayerId,
        seq: u64,
        intent: InputIntent,
    },
}

/// Authoritative state invariant violations. These indicate a bug and are fatal.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Player {0} already exists")]
    DuplicatePlayer(PlayerId),

    #[error("Player {player_id} escaped the world bounds at ({x}, {y})")]
    OutOfBounds { player_id: PlayerId, x: f64, y: f64 },
}
