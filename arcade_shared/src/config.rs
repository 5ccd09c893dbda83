//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files (file IO left to app).
//! Every field has a default, so a partial JSON object is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::math::{Rect, Vec2};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Listen address (server) or connect address (client), e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed room simulation rate.
    pub tick_hz: u32,
    /// Worker threads for the server runtime.
    pub worker_threads: usize,
    /// Rooms the server hosts concurrently.
    pub max_rooms: usize,
    /// Capacity used when a create request asks for 0 players.
    pub default_room_capacity: u32,
    /// Upper bound for a requested room capacity.
    pub max_room_capacity: u32,
    /// Silence after which a session is considered dead.
    pub liveness_timeout_ms: u64,
    /// Client ping cadence.
    pub ping_interval_ms: u64,
    pub request_retry: RetryConfig,
    /// Player name (client only).
    pub player_name: String,
    pub arena: ArenaConfig,
}

/// Client request retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_ms: 250,
            cap_ms: 4000,
        }
    }
}

/// Playfield size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub width: f32,
    pub height: f32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

impl ArenaConfig {
    pub fn bounds(&self) -> Rect {
        Rect::new(Vec2::ZERO, Vec2::new(self.width, self.height))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 60,
            worker_threads: 4,
            max_rooms: 32,
            default_room_capacity: 4,
            max_room_capacity: 8,
            liveness_timeout_ms: 10_000,
            ping_interval_ms: 2_000,
            request_retry: RetryConfig::default(),
            player_name: "Player".to_string(),
            arena: ArenaConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Length of one simulation tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() -> anyhow::Result<()> {
        let cfg = EngineConfig::from_json_str(r#"{ "tick_hz": 30, "arena": { "width": 640.0 } }"#)?;
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.arena.width, 640.0);
        assert_eq!(cfg.arena.height, 720.0);
        assert_eq!(cfg.server_addr, "127.0.0.1:40000");
        assert_eq!(cfg.request_retry, RetryConfig::default());
        Ok(())
    }

    #[test]
    fn tick_interval_from_rate() {
        let cfg = EngineConfig {
            tick_hz: 50,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.tick_interval(), Duration::from_millis(20));
    }
}
