//! Game simulation modules

pub mod physics;
pub mod possession;
pub mod room;
pub mod rooms;
pub mod snapshot;
pub mod vec3;

pub use room::{GameRoom, MatchPhase, PlayerState};
pub use rooms::{RoomHandle, RoomRegistry};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Inbound event funneled into a room's single execution context
#[derive(Debug)]
pub enum RoomInput {
    /// A WebSocket session attached to the room
    Connect {
        session_id: Uuid,
        tx: mpsc::UnboundedSender<ServerMsg>,
    },
    /// A parsed client command
    Command { session_id: Uuid, msg: ClientMsg },
    /// The session's socket closed
    Disconnect { session_id: Uuid },
}

/// Normalized movement intent (x longitudinal, z lateral).
/// Key flags and wire vectors both collapse into this representation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveIntent {
    pub x: f32,
    pub z: f32,
}

impl MoveIntent {
    /// Build from four direction flags; diagonals are normalized so they
    /// are not faster than axis-aligned movement.
    pub fn from_keys(up: bool, down: bool, left: bool, right: bool) -> Self {
        let x = (up as i8 - down as i8) as f32;
        let z = (right as i8 - left as i8) as f32;
        Self { x, z }.normalized()
    }

    /// Build from a wire vector. Rejects non-finite or wildly out-of-range
    /// components; anything longer than a unit vector is scaled down.
    pub fn from_vector(x: f32, y: f32) -> Option<Self> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        if x.abs() > 1.5 || y.abs() > 1.5 {
            return None;
        }
        Some(Self { x, z: y }.normalized())
    }

    fn normalized(self) -> Self {
        let mag = (self.x * self.x + self.z * self.z).sqrt();
        if mag > 1.0 {
            Self {
                x: self.x / mag,
                z: self.z / mag,
            }
        } else {
            self
        }
    }

    pub fn is_moving(&self) -> bool {
        self.x != 0.0 || self.z != 0.0
    }
}
