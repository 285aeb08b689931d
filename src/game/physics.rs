//! Player movement: intent to velocity, fixed-step integration, wall clamping

use super::{InputIntent, World};

/// Physics system for updating player positions and velocities
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Derive velocity from intent. Opposing flags cancel to exactly zero on that axis.
    pub fn velocity(intent: &InputIntent, speed: f64) -> (f64, f64) {
        let dx = f64::from(u8::from(intent.right)) - f64::from(u8::from(intent.left));
        let dy = f64::from(u8::from(intent.down)) - f64::from(u8::from(intent.up));
        (dx * speed, dy * speed)
    }

    /// Integrate one fixed step and clamp to `[0, width] x [0, height]`.
    /// Velocity is left untouched when a wall stops the player.
    pub fn integrate(
        x: f64,
        y: f64,
        vx: f64,
        vy: f64,
        dt: f64,
        width: f64,
        height: f64,
    ) -> (f64, f64) {
        let new_x = (x + vx * dt).clamp(0.0, width);
        let new_y = (y + vy * dt).clamp(0.0, height);
        (new_x, new_y)
    }

    /// Run the physics phase of one tick for every live player
    pub fn step(world: &mut World) {
        let dt = world.config.fixed_delta();
        let speed = world.config.player_speed;
        let (width, height) = (world.config.world_width, world.config.world_height);

        for player in world.players.values_mut() {
            let (vx, vy) = Self::velocity(&player.intent, speed);
            let (x, y) = Self::integrate(player.x, player.y, vx, vy, dt, width, height);

            player.vx = vx;
            player.vy = vy;
            player.x = x;
            player.y = y;
        }
    }
}
