//! Session registry - connection/player identity mapping and player lifecycle

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::GameConfig;
use crate::game::{GameCommand, GameLoop, InputIntent, PlayerId, World};

use super::{ConnectionId, SessionOutbox, SnapshotBroadcaster};

/// Commands buffered between connection tasks and the tick loop
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Tick loop lifecycle. There is no way back from `Running`.
enum SchedulerState {
    /// No player has joined yet; holds the queue the loop will drain
    Idle(mpsc::Receiver<GameCommand>),
    Running,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Tick loop is no longer running")]
    LoopStopped,
}

/// Maps connections to players in both directions and feeds lifecycle and
/// input commands to the tick loop
pub struct SessionRegistry {
    config: GameConfig,
    connections: DashMap<ConnectionId, PlayerId>,
    players: DashMap<PlayerId, ConnectionId>,
    broadcaster: Arc<SnapshotBroadcaster>,
    commands: mpsc::Sender<GameCommand>,
    scheduler: Mutex<SchedulerState>,
    tick: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new(config: GameConfig, broadcaster: Arc<SnapshotBroadcaster>) -> Self {
        let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Self {
            config,
            connections: DashMap::new(),
            players: DashMap::new(),
            broadcaster,
            commands,
            scheduler: Mutex::new(SchedulerState::Idle(commands_rx)),
            tick: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Allocate a player for this connection. The tick loop spawns it, sends
    /// `welcome` and only then starts including the session in broadcasts.
    /// The first join ever starts the tick loop.
    pub async fn join(&self, outbox: &Arc<SessionOutbox>, name: String) -> Result<PlayerId, SessionError> {
        let connection_id = outbox.connection_id;

        // A repeated join on one connection replaces its player
        if let Some((_, previous)) = self.connections.remove(&connection_id) {
            self.players.remove(&previous);
            self.send_command(GameCommand::Leave {
                player_id: previous,
                connection_id,
            })
            .await?;
            info!(connection_id = %connection_id, player_id = %previous, "Player replaced by rejoin");
        }

        let player_id = PlayerId::new();
        self.connections.insert(connection_id, player_id);
        self.players.insert(player_id, connection_id);

        self.ensure_running();
        self.send_command(GameCommand::Join {
            player_id,
            name: name.clone(),
            outbox: outbox.clone(),
        })
        .await?;

        info!(
            connection_id = %connection_id,
            player_id = %player_id,
            name = %name,
            "Player joined"
        );
        Ok(player_id)
    }

    /// Drop the connection's player and stop delivering to it. Safe to call
    /// any number of times.
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<PlayerId> {
        self.broadcaster.unregister(&connection_id);

        let (_, player_id) = self.connections.remove(&connection_id)?;
        self.players.remove(&player_id);

        if self
            .send_command(GameCommand::Leave {
                player_id,
                connection_id,
            })
            .await
            .is_err()
        {
            warn!(player_id = %player_id, "Tick loop gone, leave not delivered");
        }

        info!(connection_id = %connection_id, player_id = %player_id, "Player disconnected");
        Some(player_id)
    }

    /// Forward an input to the tick loop's reconciler. Before the first join
    /// no player can exist, so the input is dropped here.
    pub async fn submit_input(
        &self,
        player_id: PlayerId,
        seq: u64,
        intent: InputIntent,
    ) -> Result<(), SessionError> {
        if !self.is_running() {
            debug!(player_id = %player_id, seq, "Input received for unknown player");
            return Ok(());
        }

        self.send_command(GameCommand::Input {
            player_id,
            seq,
            intent,
        })
        .await
    }

    pub fn player_for(&self, connection_id: &ConnectionId) -> Option<PlayerId> {
        self.connections.get(connection_id).map(|r| *r)
    }

    pub fn player_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.scheduler.lock(), SchedulerState::Running)
    }

    /// Last completed tick (0 until the loop has stepped)
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    async fn send_command(&self, command: GameCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::LoopStopped)
    }

    /// Idle -> Running on first call; later calls do nothing
    fn ensure_running(&self) {
        let mut scheduler = self.scheduler.lock();
        let SchedulerState::Idle(commands) =
            std::mem::replace(&mut *scheduler, SchedulerState::Running)
        else {
            return;
        };

        let game_loop = GameLoop::new(
            World::new(self.config.clone()),
            commands,
            self.broadcaster.clone(),
            self.tick.clone(),
        );

        tokio::spawn(async move {
            if let Err(e) = game_loop.run().await {
                error!(error = %e, "Authoritative state invariant violated, shutting down");
                std::process::exit(1);
            }
        });

        info!("Tick loop started by first join");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OutboxReceivers;
    use crate::ws::protocol::{ServerMsg, Snapshot};
    use std::time::Duration;

    fn registry(config: GameConfig) -> SessionRegistry {
        SessionRegistry::new(config, Arc::new(SnapshotBroadcaster::new()))
    }

    fn roomy() -> GameConfig {
        GameConfig {
            world_width: 100_000.0,
            world_height: 100_000.0,
            player_speed: 5.0,
            seed: Some(5),
            ..GameConfig::default()
        }
    }

    /// Wait for a snapshot matching `pred` on this session
    async fn wait_for(rx: &mut OutboxReceivers, pred: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let wait = async {
            loop {
                rx.snapshots.changed().await.unwrap();
                let frame = rx.snapshots.borrow_and_update().clone();
                if let Some(frame) = frame {
                    if pred(&frame.snapshot) {
                        return frame.snapshot.clone();
                    }
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("no matching snapshot")
    }

    #[tokio::test]
    async fn loop_starts_lazily_on_first_join() {
        let registry = registry(roomy());
        assert!(!registry.is_running());

        let (outbox, mut rx) = SessionOutbox::new(ConnectionId::new());
        let player_id = registry.join(&outbox, "alice".to_string()).await.unwrap();

        assert!(registry.is_running());
        assert_eq!(registry.player_for(&outbox.connection_id), Some(player_id));
        assert_eq!(registry.players.get(&player_id).map(|r| *r), Some(outbox.connection_id));

        match rx.control.recv().await {
            Some(ServerMsg::Welcome { id, name }) => {
                assert_eq!(id, player_id);
                assert_eq!(name, "alice");
            }
            other => panic!("expected welcome, got {other:?}"),
        }

        let snapshot = wait_for(&mut rx, |s| s.players.contains_key(&player_id)).await;
        assert_eq!(snapshot.players[&player_id].name, "alice");
        assert_eq!(snapshot.coins.len(), 5);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let registry = registry(roomy());
        let (outbox, _rx) = SessionOutbox::new(ConnectionId::new());
        let player_id = registry.join(&outbox, "bob".to_string()).await.unwrap();

        assert_eq!(registry.leave(outbox.connection_id).await, Some(player_id));
        assert_eq!(registry.leave(outbox.connection_id).await, None);
        assert_eq!(registry.player_count(), 0);
        assert_eq!(registry.players.get(&player_id).map(|r| *r), None);

        // Join and leave may land in the same drain; either way the session ends unregistered
        let settled = registry.current_tick() + 3;
        while registry.current_tick() < settled {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.broadcaster.session_count(), 0);
    }

    #[tokio::test]
    async fn leave_without_join_is_a_no_op() {
        let registry = registry(roomy());
        assert_eq!(registry.leave(ConnectionId::new()).await, None);
        assert!(!registry.is_running());
    }

    #[tokio::test]
    async fn input_before_any_join_is_dropped() {
        let registry = registry(roomy());
        registry
            .submit_input(PlayerId::new(), 1, InputIntent::IDLE)
            .await
            .unwrap();
        assert!(!registry.is_running());
    }

    #[tokio::test]
    async fn rejoin_replaces_previous_player() {
        let registry = registry(roomy());
        let (outbox, mut rx) = SessionOutbox::new(ConnectionId::new());

        let first = registry.join(&outbox, "first".to_string()).await.unwrap();
        let second = registry.join(&outbox, "second".to_string()).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.player_count(), 1);
        assert_eq!(registry.players.get(&first).map(|r| *r), None);

        let snapshot = wait_for(&mut rx, |s| s.players.contains_key(&second)).await;
        assert!(!snapshot.players.contains_key(&first));
    }

    #[tokio::test]
    async fn departed_player_disappears_from_other_snapshots() {
        let registry = registry(roomy());
        let (a_outbox, _a_rx) = SessionOutbox::new(ConnectionId::new());
        let (b_outbox, mut b_rx) = SessionOutbox::new(ConnectionId::new());

        let a = registry.join(&a_outbox, "a".to_string()).await.unwrap();
        let b = registry.join(&b_outbox, "b".to_string()).await.unwrap();
        wait_for(&mut b_rx, |s| s.players.contains_key(&a) && s.players.contains_key(&b)).await;

        registry.leave(a_outbox.connection_id).await;

        let snapshot = wait_for(&mut b_rx, |s| !s.players.contains_key(&a)).await;
        assert!(snapshot.players.contains_key(&b));
    }

    #[tokio::test]
    async fn held_input_moves_player_over_real_ticks() {
        let registry = registry(roomy());
        let (a_outbox, mut a_rx) = SessionOutbox::new(ConnectionId::new());
        let (b_outbox, mut b_rx) = SessionOutbox::new(ConnectionId::new());

        let a = registry.join(&a_outbox, "a".to_string()).await.unwrap();
        let b = registry.join(&b_outbox, "b".to_string()).await.unwrap();

        let start = wait_for(&mut a_rx, |s| s.players.contains_key(&a) && s.players.contains_key(&b)).await;
        let right = InputIntent {
            right: true,
            ..InputIntent::IDLE
        };
        registry.submit_input(a, 1, right).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let end = wait_for(&mut b_rx, |s| s.tick > start.tick).await;

        let (a0, a1) = (&start.players[&a], &end.players[&a]);
        let (b0, b1) = (&start.players[&b], &end.players[&b]);

        // Each tick moves exactly speed / tick_rate regardless of timer jitter
        let ticks_moving = (end.tick - start.tick) as f64;
        let travelled = a1.x - a0.x;
        assert!(travelled > 0.0);
        assert!(travelled <= ticks_moving * 0.25 + 1e-6);
        assert!(travelled >= 3.0, "travelled only {travelled}");
        assert_eq!(a1.last_processed_input_seq, 1);
        assert_eq!((b1.x, b1.y), (b0.x, b0.y));
        assert!(end.tick > start.tick);
    }

    #[tokio::test]
    async fn snapshots_reach_each_session_in_tick_order() {
        let registry = registry(roomy());
        let (outbox, mut rx) = SessionOutbox::new(ConnectionId::new());
        registry.join(&outbox, "ordered".to_string()).await.unwrap();

        let mut last_tick = 0;
        for _ in 0..5 {
            let snapshot = wait_for(&mut rx, |_| true).await;
            assert!(snapshot.tick > last_tick);
            last_tick = snapshot.tick;
        }
        assert!(registry.current_tick() >= last_tick);
    }

    #[test]
    fn first_snapshot_after_welcome_always_has_the_player() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let registry = Arc::new(registry(GameConfig {
                tick_rate: 1000,
                ..roomy()
            }));
            let (seed, _seed_rx) = SessionOutbox::new(ConnectionId::new());
            registry.join(&seed, "seed".to_string()).await.unwrap();

            let mut missing = 0;
            for n in 0..200 {
                let (outbox, mut rx) = SessionOutbox::new(ConnectionId::new());
                let player_id = registry.join(&outbox, format!("p{n}")).await.unwrap();

                let welcomed = tokio::time::timeout(Duration::from_secs(5), rx.control.recv())
                    .await
                    .unwrap();
                assert!(matches!(welcomed, Some(ServerMsg::Welcome { id, .. }) if id == player_id));

                let first = wait_for(&mut rx, |_| true).await;
                if !first.players.contains_key(&player_id) {
                    missing += 1;
                }
                registry.leave(outbox.connection_id).await;
            }
            assert_eq!(missing, 0);
        });
    }
}
