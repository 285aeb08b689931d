//! Snapshot building

use crate::ws::protocol::{CoinSnapshot, PlayerSnapshot, Snapshot};

use super::World;

/// Builds full (never delta) snapshots for network transmission
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Build a snapshot of the externally visible world state
    pub fn build(world: &World, server_time: f64) -> Snapshot {
        let players = world
            .players
            .values()
            .map(|p| {
                (
                    p.id,
                    PlayerSnapshot {
                        id: p.id,
                        name: p.name.clone(),
                        x: p.x,
                        y: p.y,
                        vx: p.vx,
                        vy: p.vy,
                        score: p.score,
                        last_processed_input_seq: p.last_input_seq,
                    },
                )
            })
            .collect();

        let coins = world
            .coins
            .values()
            .map(|c| CoinSnapshot {
                id: c.id,
                x: c.x,
                y: c.y,
            })
            .collect();

        Snapshot {
            tick: world.tick,
            server_time,
            players,
            coins,
        }
    }
}

/// Running totals over every broadcast snapshot
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub largest_frame_bytes: usize,
    /// Most players seen in a single snapshot
    pub peak_players: usize,
    /// Smallest coin list ever sent; stays at the coin target while
    /// replenishment keeps up
    pub fewest_coins: Option<usize>,
}

impl SnapshotStats {
    pub fn record(&mut self, snapshot: &Snapshot, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;
        self.largest_frame_bytes = self.largest_frame_bytes.max(bytes);
        self.peak_players = self.peak_players.max(snapshot.players.len());
        let coins = snapshot.coins.len();
        self.fewest_coins = Some(self.fewest_coins.map_or(coins, |fewest| fewest.min(coins)));
    }

    /// Mean encoded frame size
    pub fn avg_frame_bytes(&self) -> u64 {
        self.total_bytes.checked_div(self.total_snapshots).unwrap_or(0)
    }
}
