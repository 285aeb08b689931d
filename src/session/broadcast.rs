//! Snapshot fan-out to connected sessions

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::game::snapshot::SnapshotStats;
use crate::ws::protocol::{ProtocolError, ServerMsg, Snapshot};

use super::ConnectionId;

/// Control replies queued ahead of snapshots (welcome)
const CONTROL_QUEUE_DEPTH: usize = 16;

/// One encoded snapshot, shared by every session that receives it
#[derive(Debug)]
pub struct SnapshotFrame {
    pub snapshot: Snapshot,
    /// JSON `state` message, encoded once per tick
    pub text: String,
    /// When the tick loop produced this frame; artificial latency counts from here
    pub encoded_at: Instant,
}

impl SnapshotFrame {
    pub fn encode(snapshot: Snapshot) -> Result<Self, ProtocolError> {
        let text = ServerMsg::State(snapshot.clone()).to_json()?;
        Ok(Self {
            snapshot,
            text,
            encoded_at: Instant::now(),
        })
    }
}

/// Latest undelivered snapshot for one session
pub type SnapshotSlot = Option<Arc<SnapshotFrame>>;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    #[error("Control queue for connection {0} is full")]
    Backlogged(ConnectionId),
}

/// Outbound path of one connection.
///
/// Snapshots go through a single-slot `watch` channel: a newer snapshot
/// replaces an unread one, so a slow reader only ever falls behind by one.
#[derive(Debug)]
pub struct SessionOutbox {
    pub connection_id: ConnectionId,
    control_tx: mpsc::Sender<ServerMsg>,
    snapshot_tx: watch::Sender<SnapshotSlot>,
}

/// Receiving half of an outbox, owned by the connection's writer task
pub struct OutboxReceivers {
    pub control: mpsc::Receiver<ServerMsg>,
    pub snapshots: watch::Receiver<SnapshotSlot>,
}

impl SessionOutbox {
    pub fn new(connection_id: ConnectionId) -> (Arc<Self>, OutboxReceivers) {
        let (control_tx, control) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (snapshot_tx, snapshots) = watch::channel(None);

        let outbox = Arc::new(Self {
            connection_id,
            control_tx,
            snapshot_tx,
        });
        (outbox, OutboxReceivers { control, snapshots })
    }

    /// Queue a control reply without waiting on the writer
    pub fn send_control(&self, msg: ServerMsg) -> Result<(), DeliveryError> {
        self.control_tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backlogged(self.connection_id),
            TrySendError::Closed(_) => DeliveryError::Closed(self.connection_id),
        })
    }

    /// Discard any unread snapshot. Used when the connection's player changes
    /// so nothing from before the new player's spawn reaches the writer.
    pub fn clear_snapshot(&self) {
        self.snapshot_tx.send_replace(None);
    }

    /// Offer the newest snapshot. Never blocks; overwrites any unread one.
    pub fn offer_snapshot(&self, frame: Arc<SnapshotFrame>) -> Result<(), DeliveryError> {
        self.snapshot_tx
            .send(Some(frame))
            .map_err(|_| DeliveryError::Closed(self.connection_id))
    }
}

/// Result of fanning out one snapshot
#[derive(Debug, Clone)]
pub struct BroadcastReport {
    pub tick: u64,
    pub delivered: usize,
    /// Sessions whose writer is gone; removed from the broadcaster
    pub failed: Vec<ConnectionId>,
}

/// Delivers each tick's snapshot to every joined session
pub struct SnapshotBroadcaster {
    sessions: DashMap<ConnectionId, Arc<SessionOutbox>>,
    stats: Mutex<SnapshotStats>,
}

impl SnapshotBroadcaster {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            stats: Mutex::new(SnapshotStats::default()),
        }
    }

    /// Start delivering to this session. Called by the tick loop once the
    /// session's player exists, so every snapshot it sees includes that player.
    pub fn register(&self, outbox: Arc<SessionOutbox>) {
        self.sessions.insert(outbox.connection_id, outbox);
    }

    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.sessions.remove(connection_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats.lock().clone()
    }

    /// Encode once and hand the snapshot to every session.
    /// A closed session never affects delivery to the others.
    pub fn broadcast(&self, snapshot: Snapshot) -> Result<BroadcastReport, ProtocolError> {
        let frame = Arc::new(SnapshotFrame::encode(snapshot)?);

        let mut delivered = 0;
        let mut failed = Vec::new();
        for entry in self.sessions.iter() {
            match entry.value().offer_snapshot(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(error = %e, "Snapshot delivery failed");
                    failed.push(*entry.key());
                }
            }
        }

        for connection_id in &failed {
            self.sessions.remove(connection_id);
        }

        self.stats.lock().record(&frame.snapshot, frame.text.len());

        Ok(BroadcastReport {
            tick: frame.snapshot.tick,
            delivered,
            failed,
        })
    }
}

impl Default for SnapshotBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
