//! Coin pickups, scoring and replenishment

use super::{CoinId, PlayerId, World};

/// A coin collected during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pickup {
    pub coin_id: CoinId,
    pub player_id: PlayerId,
}

pub struct ScoringSystem;

impl ScoringSystem {
    /// Check if a player is within pickup range of a coin
    pub fn in_pickup_range(px: f64, py: f64, cx: f64, cy: f64, radius: f64) -> bool {
        let dx = px - cx;
        let dy = py - cy;
        dx * dx + dy * dy <= radius * radius
    }

    /// Award each coin in range to exactly one player and remove it.
    ///
    /// Players are visited in ascending id order, so a contested coin goes to
    /// the lowest player id. A player may collect several distinct coins in
    /// one tick.
    pub fn resolve_pickups(world: &mut World) -> Vec<Pickup> {
        let radius = world.config.pickup_radius;
        let mut pickups = Vec::new();

        for coin in world.coins.values() {
            let winner = world
                .players
                .values()
                .find(|p| Self::in_pickup_range(p.x, p.y, coin.x, coin.y, radius));

            if let Some(player) = winner {
                pickups.push(Pickup {
                    coin_id: coin.id,
                    player_id: player.id,
                });
            }
        }

        for pickup in &pickups {
            world.coins.remove(&pickup.coin_id);
            if let Some(player) = world.players.get_mut(&pickup.player_id) {
                player.score += 1;
            }
        }

        pickups
    }

    /// Collision and scoring phase of one tick: pickups, then top the world back up
    pub fn step(world: &mut World) -> Vec<Pickup> {
        let pickups = Self::resolve_pickups(world);
        world.ensure_coins();
        pickups
    }
}
