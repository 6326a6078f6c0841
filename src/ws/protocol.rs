//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::vec3::Vec3;

/// Team side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Parse a side from its wire spelling. Unknown values are a client
    /// error, not a deserialization failure, so this stays stringly typed.
    pub fn parse(raw: &str) -> Option<Side> {
        match raw {
            "left" => Some(Side::Left),
            "right" => Some(Side::Right),
            _ => None,
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Character archetypes a player can pick once on a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Striker,
    Playmaker,
    Defender,
    Keeper,
}

impl Archetype {
    pub const ALL: [Archetype; 4] = [
        Archetype::Striker,
        Archetype::Playmaker,
        Archetype::Defender,
        Archetype::Keeper,
    ];
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join the room with a display name
    Join {
        name: String,
    },

    /// Pick a team side ("left" or "right")
    SelectTeam {
        side: String,
    },

    /// Pick or clear a character archetype
    SelectCharacter {
        archetype: Option<Archetype>,
    },

    /// Flip the ready flag
    ToggleReady,

    /// Movement intent as four direction flags
    MoveKeys {
        up: bool,
        down: bool,
        left: bool,
        right: bool,
    },

    /// Movement intent as a normalized 2D vector
    /// (x = longitudinal, y = lateral)
    MoveVector {
        x: f32,
        y: f32,
    },

    /// Claim control of the ball
    TakeBall,

    /// Release the ball; `shooting` turns a close-range release into a shot
    ReleaseBall {
        shooting: bool,
    },

    /// Chat message for the room
    Chat {
        text: String,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the room
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        session_id: Uuid,
        server_time: u64,
    },

    /// Full roster snapshot, broadcast on any roster change
    Roster {
        left: Vec<RosterEntry>,
        right: Vec<RosterEntry>,
    },

    /// Private acknowledgment of a successful team selection
    TeamConfirmed {
        side: Side,
    },

    /// A player changed or cleared their archetype
    CharacterChanged {
        session_id: Uuid,
        archetype: Option<Archetype>,
    },

    /// Aggregated readiness, broadcast on every ready toggle
    Readiness {
        players: Vec<ReadyState>,
        all_ready: bool,
    },

    /// Per-tick world snapshot
    Snapshot {
        /// Server tick number
        tick: u64,
        players: Vec<PlayerSnapshot>,
        ball: BallSnapshot,
        score: ScoreBoard,
        /// Everyone connected to the room, rostered or not
        connected: Vec<ConnectedPlayer>,
    },

    /// A goal was scored
    GoalScored {
        side: Side,
        score: ScoreBoard,
    },

    /// Match has started
    MatchStarted {
        score: ScoreBoard,
    },

    /// Match has ended
    MatchEnded {
        reason: EndReason,
        score: ScoreBoard,
        winner: Option<Side>,
    },

    /// Chat broadcast
    Chat {
        session_id: Uuid,
        name: String,
        text: String,
    },

    /// Error acknowledgment for a rejected command
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Roster entry for lobby display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub session_id: Uuid,
    pub name: String,
    pub archetype: Option<Archetype>,
    pub ready: bool,
}

/// Per-player readiness state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyState {
    pub session_id: Uuid,
    pub ready: bool,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub session_id: Uuid,
    pub position: Vec3,
    /// Planar rotation in radians
    pub rotation: f32,
    pub velocity: Vec3,
    pub side: Option<Side>,
    pub archetype: Option<Archetype>,
    /// Player has nonzero movement intent this tick
    pub moving: bool,
    pub holding_ball: bool,
    /// Milliseconds of possession remaining before the forced release
    pub hold_remaining_ms: Option<u64>,
}

/// Ball state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Current score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBoard {
    pub left: u32,
    pub right: u32,
}

impl ScoreBoard {
    pub fn zero() -> Self {
        Self { left: 0, right: 0 }
    }

    pub fn for_side(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn add_goal(&mut self, side: Side) {
        match side {
            Side::Left => self.left += 1,
            Side::Right => self.right += 1,
        }
    }

    /// Side currently in the lead, if any
    pub fn leader(&self) -> Option<Side> {
        match self.left.cmp(&self.right) {
            std::cmp::Ordering::Greater => Some(Side::Left),
            std::cmp::Ordering::Less => Some(Side::Right),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Connected player entry (rostered or spectating)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPlayer {
    pub session_id: Uuid,
    pub name: String,
    pub side: Option<Side>,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A team reached the win threshold
    Score,
    /// A roster emptied mid-match
    TeamVacated,
    /// No rostered players remain
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parse_rejects_unknown_values() {
        assert_eq!(Side::parse("left"), Some(Side::Left));
        assert_eq!(Side::parse("right"), Some(Side::Right));
        assert_eq!(Side::parse("middle"), None);
        assert_eq!(Side::parse(""), None);
    }

    #[test]
    fn client_msg_round_trip() {
        let msgs = vec![
            ClientMsg::Join {
                name: "ada".to_string(),
            },
            ClientMsg::SelectTeam {
                side: "left".to_string(),
            },
            ClientMsg::SelectCharacter {
                archetype: Some(Archetype::Striker),
            },
            ClientMsg::MoveVector { x: 0.5, y: -0.5 },
            ClientMsg::ReleaseBall { shooting: true },
        ];
        for msg in msgs {
            let json = serde_json::to_string(&msg).unwrap();
            let back: ClientMsg = serde_json::from_str(&json).unwrap();
            assert_eq!(format!("{:?}", back), format!("{:?}", msg));
        }
    }

    #[test]
    fn move_keys_wire_format() {
        let json = r#"{"type":"move_keys","up":true,"down":false,"left":false,"right":true}"#;
        let msg: ClientMsg = serde_json::from_str(json).unwrap();
        match msg {
            ClientMsg::MoveKeys { up, right, .. } => {
                assert!(up);
                assert!(right);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn snapshot_round_trip_preserves_values() {
        let snap = ServerMsg::Snapshot {
            tick: 42,
            players: vec![PlayerSnapshot {
                session_id: Uuid::new_v4(),
                position: Vec3::new(1.25, 0.0, -3.5),
                rotation: 1.57,
                velocity: Vec3::new(0.5, 0.0, 0.0),
                side: Some(Side::Left),
                archetype: Some(Archetype::Keeper),
                moving: true,
                holding_ball: false,
                hold_remaining_ms: None,
            }],
            ball: BallSnapshot {
                position: Vec3::new(-0.25, 0.0, 0.75),
                velocity: Vec3::ZERO,
            },
            score: ScoreBoard { left: 2, right: 1 },
            connected: vec![],
        };

        let json = serde_json::to_string(&snap).unwrap();
        let back: ServerMsg = serde_json::from_str(&json).unwrap();
        match back {
            ServerMsg::Snapshot {
                tick,
                players,
                ball,
                score,
                ..
            } => {
                assert_eq!(tick, 42);
                assert_eq!(players[0].position, Vec3::new(1.25, 0.0, -3.5));
                assert_eq!(ball.position, Vec3::new(-0.25, 0.0, 0.75));
                assert_eq!(score, ScoreBoard { left: 2, right: 1 });
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn scoreboard_leader() {
        let mut score = ScoreBoard::zero();
        assert_eq!(score.leader(), None);
        score.add_goal(Side::Right);
        assert_eq!(score.leader(), Some(Side::Right));
        assert_eq!(score.for_side(Side::Right), 1);
        assert_eq!(score.for_side(Side::Left), 0);
    }
}
