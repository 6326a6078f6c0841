//! Configuration module - environment variable parsing and match constants

use std::env;
use std::net::SocketAddr;

use crate::ws::protocol::{Archetype, Side};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS (comma-separated list)
    pub client_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,
}

/// Immutable per-room simulation constants.
///
/// Every room gets the same configuration; it is passed in at room
/// construction so the simulation never reads globals. The field is laid
/// out with x as the longitudinal axis (goals at +/- half_length), z as
/// the lateral axis, and y unused by the current rules.
#[derive(Clone, Debug)]
pub struct MatchConfig {
    /// Half the field length along x (end lines at +/- this value)
    pub field_half_length: f32,
    /// Half the field width along z (side walls at +/- this value)
    pub field_half_width: f32,
    /// Half the goal-mouth span along z
    pub goal_half_width: f32,

    /// Ball collision radius
    pub ball_radius: f32,
    /// Player collision radius
    pub player_radius: f32,
    /// Ball mass for impulse resolution
    pub ball_mass: f32,
    /// Player mass for impulse resolution
    pub player_mass: f32,

    /// Velocity retained on a wall bounce
    pub wall_restitution: f32,
    /// Velocity retained on a player-ball collision
    pub collision_restitution: f32,
    /// Per-tick rolling resistance applied to ball velocity
    pub ball_friction: f32,
    /// Maximum ball speed (units per second)
    pub max_ball_speed: f32,
    /// Player movement speed (units per second)
    pub player_speed: f32,

    /// Distance within which possession mechanics apply
    pub control_radius: f32,
    /// Distance within which a release is treated as a directed shot
    pub kick_radius: f32,
    /// Carry point distance ahead of a dribbling player
    pub carry_offset: f32,
    /// Lerp factor pulling the ball toward the carry point each tick
    pub carry_lerp: f32,
    /// Maximum continuous possession time in milliseconds
    pub possession_cap_ms: u64,
    /// Speed given to a deliberate shot
    pub shot_power: f32,
    /// Fraction of the holder's velocity inherited on a forced release
    pub loose_ball_carry: f32,
    /// Magnitude of the random component on a forced release
    pub loose_ball_scatter: f32,

    /// Goals required to win a match
    pub win_threshold: u32,
    /// Maximum players per roster
    pub team_capacity: usize,
    /// Lateral jitter applied to spawn positions
    pub spawn_jitter: f32,
    /// Longitudinal offset of spawn points from the center line
    pub spawn_depth: f32,

    /// Archetypes the left team may select
    pub left_archetypes: Vec<Archetype>,
    /// Archetypes the right team may select
    pub right_archetypes: Vec<Archetype>,
}

impl MatchConfig {
    pub fn allowed_archetypes(&self, side: Side) -> &[Archetype] {
        match side {
            Side::Left => &self.left_archetypes,
            Side::Right => &self.right_archetypes,
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            field_half_length: 20.0,
            field_half_width: 12.0,
            goal_half_width: 4.0,

            ball_radius: 0.5,
            player_radius: 1.0,
            ball_mass: 1.0,
            player_mass: 10.0,

            wall_restitution: 0.6,
            collision_restitution: 0.7,
            ball_friction: 0.985,
            max_ball_speed: 30.0,
            player_speed: 8.0,

            control_radius: 2.5,
            kick_radius: 1.5,
            carry_offset: 1.2,
            carry_lerp: 0.35,
            possession_cap_ms: 3_000,
            shot_power: 24.0,
            loose_ball_carry: 0.5,
            loose_ball_scatter: 3.0,

            win_threshold: 5,
            team_capacity: 3,
            spawn_jitter: 3.0,
            spawn_depth: 10.0,

            left_archetypes: Archetype::ALL.to_vec(),
            right_archetypes: Archetype::ALL.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_match_config_is_consistent() {
        let cfg = MatchConfig::default();
        assert!(cfg.kick_radius <= cfg.control_radius);
        assert!(cfg.goal_half_width < cfg.field_half_width);
        assert!(cfg.ball_friction < 1.0);
        assert!(cfg.wall_restitution < 1.0);
        assert!(cfg.collision_restitution < 1.0);
        assert!(cfg.spawn_depth < cfg.field_half_length);
        assert!(cfg.win_threshold > 0);
        assert!(cfg.team_capacity > 0);
    }
}
