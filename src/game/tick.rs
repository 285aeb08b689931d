//! Fixed-rate authoritative tick loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::session::SnapshotBroadcaster;
use crate::util::time::unix_secs_f64;
use crate::ws::protocol::{ServerMsg, Snapshot};

use super::physics::PhysicsSystem;
use super::scoring::ScoringSystem;
use super::snapshot::SnapshotBuilder;
use super::{GameCommand, GameError, InputOutcome, InputReconciler, World};

/// Emit a summary log line every this many ticks
const TICK_LOG_INTERVAL: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// A full period has elapsed, step now
    Fire,
    /// Sleep this long before polling again
    Wait(Duration),
}

/// Elapsed-time tick gate.
///
/// The last tick is recorded as the actual fire time, so a late tick shifts
/// the schedule instead of queueing catch-up ticks.
#[derive(Debug, Clone)]
pub struct TickClock {
    period: Duration,
    last_tick: Instant,
}

impl TickClock {
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            last_tick: start,
        }
    }

    pub fn poll(&mut self, now: Instant) -> TickDecision {
        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < self.period {
            return TickDecision::Wait(self.period - elapsed);
        }
        self.last_tick = now;
        TickDecision::Fire
    }
}

/// The authoritative simulation. Owns the world; everything else reaches it
/// through the command queue.
pub struct GameLoop {
    world: World,
    commands: mpsc::Receiver<GameCommand>,
    broadcaster: Arc<SnapshotBroadcaster>,
    tick: Arc<AtomicU64>,
}

impl GameLoop {
    pub fn new(
        world: World,
        commands: mpsc::Receiver<GameCommand>,
        broadcaster: Arc<SnapshotBroadcaster>,
        tick: Arc<AtomicU64>,
    ) -> Self {
        Self {
            world,
            commands,
            broadcaster,
            tick,
        }
    }

    /// Run the tick loop for the lifetime of the process.
    /// Only returns if an authoritative state invariant is violated.
    pub async fn run(mut self) -> Result<(), GameError> {
        info!(
            tick_rate = self.world.config.tick_rate,
            coins = self.world.coins.len(),
            "Game loop started"
        );

        let mut clock = TickClock::new(self.world.config.tick_duration(), Instant::now());

        loop {
            if let TickDecision::Wait(remaining) = clock.poll(Instant::now()) {
                sleep(remaining).await;
                continue;
            }

            let snapshot = self.step()?;

            match self.broadcaster.broadcast(snapshot) {
                Ok(report) if !report.failed.is_empty() => {
                    debug!(
                        tick = report.tick,
                        delivered = report.delivered,
                        failed = report.failed.len(),
                        "Dropped closed sessions during broadcast"
                    );
                }
                Ok(report) if report.tick % TICK_LOG_INTERVAL == 0 => {
                    let stats = self.broadcaster.stats();
                    debug!(
                        tick = report.tick,
                        sessions = report.delivered,
                        total_snapshots = stats.total_snapshots,
                        avg_frame_bytes = stats.avg_frame_bytes(),
                        largest_frame_bytes = stats.largest_frame_bytes,
                        peak_players = stats.peak_players,
                        fewest_coins = ?stats.fewest_coins,
                        "Snapshot delivery"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Failed to encode snapshot");
                }
            }
        }
    }

    /// Run one full simulation step and build its snapshot
    pub fn step(&mut self) -> Result<Snapshot, GameError> {
        self.process_commands()?;

        PhysicsSystem::step(&mut self.world);

        for pickup in ScoringSystem::step(&mut self.world) {
            debug!(
                player_id = %pickup.player_id,
                coin_id = %pickup.coin_id,
                "Coin collected"
            );
        }

        self.world.tick += 1;
        self.world.check_invariants()?;
        self.tick.store(self.world.tick, Ordering::Relaxed);

        if self.world.tick % TICK_LOG_INTERVAL == 0 {
            debug!(
                tick = self.world.tick,
                players = self.world.players.len(),
                coins = self.world.coins.len(),
                "Tick"
            );
        }

        Ok(SnapshotBuilder::build(&self.world, unix_secs_f64()))
    }

    /// Drain queued commands
    fn process_commands(&mut self) -> Result<(), GameError> {
        while let Ok(command) = self.commands.try_recv() {
            self.apply_command(command)?;
        }
        Ok(())
    }

    fn apply_command(&mut self, command: GameCommand) -> Result<(), GameError> {
        match command {
            GameCommand::Join {
                player_id,
                name,
                outbox,
            } => {
                let (x, y) = {
                    let player = self.world.spawn_player(player_id, name.clone())?;
                    (player.x, player.y)
                };

                // Welcome goes ahead of the first snapshot that contains the
                // player; nothing older may follow it
                outbox.clear_snapshot();
                if let Err(e) = outbox.send_control(ServerMsg::Welcome { id: player_id, name }) {
                    debug!(player_id = %player_id, error = %e, "Welcome not delivered");
                }
                self.broadcaster.register(outbox);

                info!(
                    player_id = %player_id,
                    x,
                    y,
                    players = self.world.players.len(),
                    "Player spawned"
                );
            }
            GameCommand::Leave {
                player_id,
                connection_id,
            } => {
                self.broadcaster.unregister(&connection_id);
                if self.world.remove_player(&player_id).is_some() {
                    info!(player_id = %player_id, "Player removed from world");
                }
            }
            GameCommand::Input {
                player_id,
                seq,
                intent,
            } => match InputReconciler::apply(&mut self.world, player_id, seq, intent) {
                InputOutcome::Applied => {}
                InputOutcome::UnknownPlayer => {
                    debug!(player_id = %player_id, seq, "Input received for unknown player");
                }
                InputOutcome::Stale { last_applied } => {
                    debug!(
                        player_id = %player_id,
                        seq,
                        last_seq = last_applied,
                        "Ignoring stale input"
                    );
                }
            },
        }
        Ok(())
    }
}
