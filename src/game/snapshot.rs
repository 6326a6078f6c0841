//! World snapshot building for the per-tick broadcast

use std::collections::HashMap;
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::ws::protocol::{
    BallSnapshot, ConnectedPlayer, PlayerSnapshot, ScoreBoard, ServerMsg,
};

use super::room::{BallState, PlayerState};

/// Serialize the whole world into one broadcast message. Every connected
/// client receives the same snapshot, so clients never see a partially
/// updated world.
pub fn build_world_snapshot(
    tick: u64,
    players: &HashMap<Uuid, PlayerState>,
    ball: &BallState,
    score: ScoreBoard,
    cfg: &MatchConfig,
    now_ms: u64,
) -> ServerMsg {
    let player_snapshots: Vec<PlayerSnapshot> = players
        .values()
        .map(|p| PlayerSnapshot {
            session_id: p.session_id,
            position: p.position,
            rotation: p.rotation,
            velocity: p.velocity,
            side: p.side,
            archetype: p.archetype,
            moving: p.intent.is_moving(),
            holding_ball: p.holding_ball,
            hold_remaining_ms: if p.holding_ball {
                let elapsed = now_ms.saturating_sub(p.hold_started_ms);
                Some(cfg.possession_cap_ms.saturating_sub(elapsed))
            } else {
                None
            },
        })
        .collect();

    let connected: Vec<ConnectedPlayer> = players
        .values()
        .map(|p| ConnectedPlayer {
            session_id: p.session_id,
            name: p.name.clone(),
            side: p.side,
        })
        .collect();

    ServerMsg::Snapshot {
        tick,
        players: player_snapshots,
        ball: BallSnapshot {
            position: ball.position,
            velocity: ball.velocity,
        },
        score,
        connected,
    }
}
