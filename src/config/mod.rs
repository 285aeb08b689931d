//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: LogFormat,
    /// Simulation tunables
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8765".to_string())
        };

        let defaults = GameConfig::default();
        let game = GameConfig {
            tick_rate: parse_or("TICK_RATE", defaults.tick_rate)?,
            world_width: parse_or("WORLD_WIDTH", defaults.world_width)?,
            world_height: parse_or("WORLD_HEIGHT", defaults.world_height)?,
            player_speed: parse_or("PLAYER_SPEED", defaults.player_speed)?,
            coin_count: parse_or("COIN_COUNT", defaults.coin_count)?,
            pickup_radius: parse_or("PICKUP_RADIUS", defaults.pickup_radius)?,
            seed: match env::var("WORLD_SEED") {
                Ok(raw) => Some(parse_value("WORLD_SEED", &raw)?),
                Err(_) => None,
            },
            artificial_latency_ms: parse_or("ARTIFICIAL_LATENCY_MS", defaults.artificial_latency_ms)?,
        };
        game.validate()?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            log_format: parse_or("LOG_FORMAT", LogFormat::Text)?,

            game,
        })
    }
}

/// World and simulation tunables
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// World rectangle width, positions live in `[0, world_width]`
    pub world_width: f64,
    /// World rectangle height, positions live in `[0, world_height]`
    pub world_height: f64,
    /// Player speed in units per second
    pub player_speed: f64,
    /// Number of coins kept alive in the world
    pub coin_count: usize,
    /// Distance within which a player collects a coin
    pub pickup_radius: f64,
    /// Seed for spawn positions (random when unset)
    pub seed: Option<u64>,
    /// Delay added before every outbound frame, for testing clients under lag
    pub artificial_latency_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            world_width: 20.0,
            world_height: 10.0,
            player_speed: 10.2,
            coin_count: 5,
            pickup_radius: 1.0,
            seed: None,
            artificial_latency_ms: 0,
        }
    }
}

impl GameConfig {
    /// Fixed integration step in seconds
    pub fn fixed_delta(&self) -> f64 {
        1.0 / self.tick_rate as f64
    }

    /// Fixed tick period
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(self.fixed_delta())
    }

    /// Simulated one-way server latency, `None` when disabled
    pub fn artificial_latency(&self) -> Option<Duration> {
        (self.artificial_latency_ms > 0).then(|| Duration::from_millis(self.artificial_latency_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::OutOfRange {
                field: "tick_rate",
                reason: "must be at least 1 Hz",
            });
        }
        if !(self.world_width.is_finite() && self.world_width > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "world_width",
                reason: "must be a positive finite number",
            });
        }
        if !(self.world_height.is_finite() && self.world_height > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "world_height",
                reason: "must be a positive finite number",
            });
        }
        if !(self.player_speed.is_finite() && self.player_speed >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "player_speed",
                reason: "must be a non-negative finite number",
            });
        }
        if !(self.pickup_radius.is_finite() && self.pickup_radius >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "pickup_radius",
                reason: "must be a non-negative finite number",
            });
        }
        Ok(())
    }
}

/// Output format for tracing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

fn parse_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => parse_value(var, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Configuration value {field} out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        reason: &'static str,
    },
}
