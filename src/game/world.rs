//! World state and entities (owned by the tick loop task)

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::GameConfig;

use super::{CoinId, GameError, InputIntent, PlayerId};

/// Player state in the world (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,

    // Position and movement
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,

    pub score: u64,

    // Input tracking
    pub last_input_seq: u64,
    pub intent: InputIntent,
}

impl Player {
    pub fn new(id: PlayerId, name: String, x: f64, y: f64) -> Self {
        Self {
            id,
            name,
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            score: 0,
            last_input_seq: 0,
            intent: InputIntent::IDLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coin {
    pub id: CoinId,
    pub x: f64,
    pub y: f64,
}

/// The shared simulation: every live player and coin plus the tick counter.
///
/// Both collections are ordered by id, which makes every per-tick iteration
/// deterministic for a given world.
pub struct World {
    pub config: GameConfig,
    pub tick: u64,
    pub players: BTreeMap<PlayerId, Player>,
    pub coins: BTreeMap<CoinId, Coin>,
    pub rng: ChaCha8Rng,
}

impl World {
    /// Create a world topped up with the configured number of coins
    pub fn new(config: GameConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut world = Self {
            config,
            tick: 0,
            players: BTreeMap::new(),
            coins: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        world.ensure_coins();
        world
    }

    /// Uniformly random point inside the world rectangle
    pub fn random_position(&mut self) -> (f64, f64) {
        let x = self.rng.gen_range(0.0..=self.config.world_width);
        let y = self.rng.gen_range(0.0..=self.config.world_height);
        (x, y)
    }

    /// Insert a fresh player at a random position with zero velocity, score and sequence
    pub fn spawn_player(&mut self, id: PlayerId, name: String) -> Result<&Player, GameError> {
        if self.players.contains_key(&id) {
            return Err(GameError::DuplicatePlayer(id));
        }

        let (x, y) = self.random_position();
        Ok(self
            .players
            .entry(id)
            .or_insert_with(|| Player::new(id, name, x, y)))
    }

    pub fn remove_player(&mut self, id: &PlayerId) -> Option<Player> {
        self.players.remove(id)
    }

    /// Spawn a coin at a random position and return its id
    pub fn spawn_coin(&mut self) -> CoinId {
        let id = CoinId(uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid());
        let (x, y) = self.random_position();
        self.coins.insert(id, Coin { id, x, y });
        id
    }

    /// Top the world back up to the target coin count. Returns how many coins were spawned.
    pub fn ensure_coins(&mut self) -> usize {
        let mut spawned = 0;
        while self.coins.len() < self.config.coin_count {
            let id = self.spawn_coin();
            debug!(coin_id = %id, "Coin spawned");
            spawned += 1;
        }
        spawned
    }

    /// Verify the bounds invariant for every player
    pub fn check_invariants(&self) -> Result<(), GameError> {
        let (width, height) = (self.config.world_width, self.config.world_height);
        for player in self.players.values() {
            let in_bounds = (0.0..=width).contains(&player.x) && (0.0..=height).contains(&player.y);
            if !in_bounds {
                return Err(GameError::OutOfBounds {
                    player_id: player.id,
                    x: player.x,
                    y: player.y,
                });
            }
        }
        Ok(())
    }
}

/// Deterministic id for tests that need a known ordering
#[cfg(test)]
pub(crate) fn test_player_id(n: u128) -> PlayerId {
    PlayerId(uuid::Uuid::from_u128(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> GameConfig {
        GameConfig {
            seed: Some(seed),
            ..GameConfig::default()
        }
    }

    #[test]
    fn new_world_has_target_coin_count() {
        let world = World::new(seeded(1));
        assert_eq!(world.coins.len(), 5);
        assert!(world.players.is_empty());
        assert_eq!(world.tick, 0);

        for coin in world.coins.values() {
            assert!((0.0..=20.0).contains(&coin.x));
            assert!((0.0..=10.0).contains(&coin.y));
        }
    }

    #[test]
    fn seeded_worlds_are_reproducible() {
        let a = World::new(seeded(42));
        let b = World::new(seeded(42));
        let a_coins: Vec<_> = a.coins.values().cloned().collect();
        let b_coins: Vec<_> = b.coins.values().cloned().collect();
        assert_eq!(a_coins, b_coins);
    }

    #[test]
    fn spawn_player_starts_idle_inside_bounds() {
        let mut world = World::new(seeded(7));
        let id = test_player_id(1);
        let player = world.spawn_player(id, "alice".to_string()).unwrap();

        assert_eq!(player.name, "alice");
        assert_eq!(player.score, 0);
        assert_eq!(player.last_input_seq, 0);
        assert_eq!((player.vx, player.vy), (0.0, 0.0));
        assert_eq!(player.intent, InputIntent::IDLE);
        assert!(world.check_invariants().is_ok());
    }

    #[test]
    fn duplicate_player_is_rejected() {
        let mut world = World::new(seeded(7));
        let id = test_player_id(1);
        world.spawn_player(id, "alice".to_string()).unwrap();

        let err = world.spawn_player(id, "mallory".to_string()).unwrap_err();
        assert!(matches!(err, GameError::DuplicatePlayer(dup) if dup == id));
        assert_eq!(world.players[&id].name, "alice");
    }

    #[test]
    fn remove_player_is_idempotent() {
        let mut world = World::new(seeded(3));
        let id = test_player_id(9);
        world.spawn_player(id, "bob".to_string()).unwrap();

        assert!(world.remove_player(&id).is_some());
        assert!(world.remove_player(&id).is_none());
    }

    #[test]
    fn ensure_coins_refills_only_missing() {
        let mut world = World::new(seeded(5));
        assert_eq!(world.ensure_coins(), 0);

        let first = *world.coins.keys().next().unwrap();
        world.coins.remove(&first);
        assert_eq!(world.ensure_coins(), 1);
        assert_eq!(world.coins.len(), 5);
        assert!(!world.coins.contains_key(&first));
    }

    #[test]
    fn out_of_bounds_is_detected() {
        let mut world = World::new(seeded(5));
        let id = test_player_id(2);
        world.spawn_player(id, "carol".to_string()).unwrap();
        world.players.get_mut(&id).unwrap().x = f64::NAN;

        assert!(matches!(
            world.check_invariants(),
            Err(GameError::OutOfBounds { player_id, .. }) if player_id == id
        ));
    }
}
