//! Ball possession: the dribble-follow behavior layered over raw collisions

use rand::Rng;

use crate::config::MatchConfig;
use crate::game::physics::FieldPhysics;
use crate::game::vec3::Vec3;

/// Possession mechanics. A holder within the control radius keeps the ball
/// glued to a carry point ahead of them; holding is capped, and a release
/// inside the kick radius becomes a directed shot.
pub struct PossessionRules;

impl PossessionRules {
    /// Milliseconds a player has been holding the ball
    pub fn hold_elapsed_ms(now_ms: u64, started_ms: u64) -> u64 {
        now_ms.saturating_sub(started_ms)
    }

    /// Whether the hold has outlived the possession cap
    pub fn hold_expired(now_ms: u64, started_ms: u64, cfg: &MatchConfig) -> bool {
        Self::hold_elapsed_ms(now_ms, started_ms) > cfg.possession_cap_ms
    }

    /// The point the ball is pulled toward while dribbling: just ahead of
    /// the player along their movement direction, or their facing when
    /// standing still.
    pub fn carry_target(
        player_pos: Vec3,
        player_vel: Vec3,
        rotation: f32,
        cfg: &MatchConfig,
    ) -> Vec3 {
        let dir = {
            let moving = player_vel.normalize_or_zero();
            if moving == Vec3::ZERO {
                FieldPhysics::facing(rotation)
            } else {
                moving
            }
        };
        player_pos.add(dir.scale(cfg.carry_offset))
    }

    /// One tick of the glued-ball follow: lerp toward the carry point and
    /// cancel any residual ball velocity.
    pub fn dribble(ball_pos: &mut Vec3, ball_vel: &mut Vec3, target: Vec3, cfg: &MatchConfig) {
        *ball_pos = ball_pos.lerp(target, cfg.carry_lerp);
        *ball_vel = Vec3::ZERO;
    }

    /// Loose-ball velocity when the possession cap force-releases: a small
    /// random scatter plus a fraction of the holder's own velocity.
    pub fn forced_release_velocity<R: Rng>(
        player_vel: Vec3,
        cfg: &MatchConfig,
        rng: &mut R,
    ) -> Vec3 {
        let scatter = Vec3::new(
            rng.gen_range(-cfg.loose_ball_scatter..cfg.loose_ball_scatter),
            0.0,
            rng.gen_range(-cfg.loose_ball_scatter..cfg.loose_ball_scatter),
        );
        scatter.add(player_vel.scale(cfg.loose_ball_carry))
    }

    /// Whether an explicit release counts as a shot: within the possession
    /// cap and inside the tighter kick radius.
    pub fn is_shot(
        player_pos: Vec3,
        ball_pos: Vec3,
        now_ms: u64,
        started_ms: u64,
        cfg: &MatchConfig,
    ) -> bool {
        !Self::hold_expired(now_ms, started_ms, cfg)
            && player_pos.distance(ball_pos) <= cfg.kick_radius
    }

    /// Velocity of a deliberate shot: a clean impulse from player to ball,
    /// ignoring the player's own velocity.
    pub fn shot_velocity(player_pos: Vec3, ball_pos: Vec3, cfg: &MatchConfig) -> Vec3 {
        let dir = ball_pos.sub(player_pos).normalize_or_zero();
        if dir == Vec3::ZERO {
            // Ball exactly on the player: shoot along +x as a fallback
            return Vec3::new(cfg.shot_power, 0.0, 0.0);
        }
        dir.scale(cfg.shot_power)
    }
}
