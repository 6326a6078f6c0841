//! Ball and player physics for the fixed-tick simulation

use crate::config::MatchConfig;
use crate::game::vec3::Vec3;
use crate::game::MoveIntent;
use crate::ws::protocol::Side;

/// Physics routines operating on field coordinates.
/// x is longitudinal (goals at +/- field_half_length), z lateral.
pub struct FieldPhysics;

impl FieldPhysics {
    /// Check whether the ball has crossed an end line inside the goal
    /// mouth. Returns the side that scores.
    pub fn goal_scored(ball_pos: Vec3, cfg: &MatchConfig) -> Option<Side> {
        if ball_pos.z.abs() > cfg.goal_half_width {
            return None;
        }
        if ball_pos.x < -cfg.field_half_length {
            // Crossed the left end line: the left goal concedes
            Some(Side::Right)
        } else if ball_pos.x > cfg.field_half_length {
            Some(Side::Left)
        } else {
            None
        }
    }

    /// Advance the ball by its velocity
    pub fn integrate_ball(pos: &mut Vec3, vel: Vec3, dt: f32) {
        *pos = pos.add(vel.scale(dt));
    }

    /// Bounce the ball off the side walls and the end walls outside the
    /// goal mouths, damping the reflected component.
    pub fn wall_rebound(pos: &mut Vec3, vel: &mut Vec3, cfg: &MatchConfig) {
        let lateral_limit = cfg.field_half_width - cfg.ball_radius;
        if pos.z.abs() > lateral_limit {
            vel.z = -vel.z * cfg.wall_restitution;
            pos.z = pos.z.clamp(-lateral_limit, lateral_limit);
        }

        // End lines are solid only outside the goal-mouth span
        let longitudinal_limit = cfg.field_half_length - cfg.ball_radius;
        if pos.x.abs() > longitudinal_limit && pos.z.abs() > cfg.goal_half_width {
            vel.x = -vel.x * cfg.wall_restitution;
            pos.x = pos.x.clamp(-longitudinal_limit, longitudinal_limit);
        }
    }

    /// Per-tick rolling resistance
    pub fn apply_friction(vel: &mut Vec3, cfg: &MatchConfig) {
        *vel = vel.scale(cfg.ball_friction);
    }

    /// Cap ball speed so stacked impulses cannot run away
    pub fn clamp_ball_speed(vel: &mut Vec3, cfg: &MatchConfig) {
        let speed = vel.length();
        if speed > cfg.max_ball_speed {
            *vel = vel.scale(cfg.max_ball_speed / speed);
        }
    }

    /// Whether a player is touching the ball
    pub fn player_touches_ball(player_pos: Vec3, ball_pos: Vec3, cfg: &MatchConfig) -> bool {
        player_pos.distance(ball_pos) <= cfg.player_radius + cfg.ball_radius
    }

    /// Resolve a player-ball contact as an impulse collision. The player's
    /// larger mass means their velocity barely changes while the ball is
    /// kicked away. Both velocities are updated in place.
    pub fn resolve_player_ball_collision(
        player_pos: Vec3,
        player_vel: &mut Vec3,
        ball_pos: Vec3,
        ball_vel: &mut Vec3,
        cfg: &MatchConfig,
    ) {
        let normal = ball_pos.sub(player_pos).normalize_or_zero();
        if normal == Vec3::ZERO {
            return;
        }

        let relative = ball_vel.sub(*player_vel);
        let along_normal = relative.x * normal.x + relative.y * normal.y + relative.z * normal.z;
        if along_normal > 0.0 {
            // Already separating
            return;
        }

        let inv_mass_sum = 1.0 / cfg.ball_mass + 1.0 / cfg.player_mass;
        let impulse = -(1.0 + cfg.collision_restitution) * along_normal / inv_mass_sum;

        *ball_vel = ball_vel.add(normal.scale(impulse / cfg.ball_mass));
        *player_vel = player_vel.sub(normal.scale(impulse / cfg.player_mass));
    }

    /// Advance a player from their movement intent. Velocity is derived
    /// from the intent each tick (no momentum), position is clamped to the
    /// field, and the player turns to face their movement direction.
    pub fn step_player(
        pos: &mut Vec3,
        rotation: &mut f32,
        vel: &mut Vec3,
        intent: MoveIntent,
        cfg: &MatchConfig,
        dt: f32,
    ) {
        *vel = Vec3::new(intent.x * cfg.player_speed, 0.0, intent.z * cfg.player_speed);
        *pos = pos.add(vel.scale(dt));

        let x_limit = cfg.field_half_length - cfg.player_radius;
        let z_limit = cfg.field_half_width - cfg.player_radius;
        pos.x = pos.x.clamp(-x_limit, x_limit);
        pos.z = pos.z.clamp(-z_limit, z_limit);

        if intent.is_moving() {
            *rotation = intent.z.atan2(intent.x);
        }
    }

    /// Unit facing vector for a planar rotation
    pub fn facing(rotation: f32) -> Vec3 {
        Vec3::new(rotation.cos(), 0.0, rotation.sin())
    }
}
