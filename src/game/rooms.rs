//! Room registry: one isolated simulation task per room id

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::MatchConfig;
use crate::game::{GameRoom, RoomInput};

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub input_tx: mpsc::Sender<RoomInput>,
    pub session_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Relaxed)
    }
}

/// Registry of all live rooms, keyed by room id. Rooms share nothing but
/// the match configuration; each one is an isolated aggregate behind its
/// own task.
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    config: Arc<MatchConfig>,
}

impl RoomRegistry {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    /// Fetch a room's handle, spawning its simulation task on first use
    pub fn get_or_create(&self, room_id: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.get(room_id) {
            return handle.clone();
        }

        let entry = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| self.spawn_room(room_id));
        entry.value().clone()
    }

    fn spawn_room(&self, room_id: &str) -> RoomHandle {
        let seed = rand::random::<u64>();
        let (room, handle) = GameRoom::new(room_id.to_string(), self.config.clone(), seed);

        info!(room = %room_id, "Created room");

        let rooms = self.rooms.clone();
        let id = room_id.to_string();
        tokio::spawn(async move {
            room.run().await;
            rooms.remove(&id);
            info!(room = %id, "Room removed from registry");
        });

        handle
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_sessions(&self) -> usize {
        self.rooms.iter().map(|r| r.value().session_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn registry_reuses_live_room_handles() {
        tokio_test::block_on(async {
            let registry = RoomRegistry::new(MatchConfig::default());
            let first = registry.get_or_create("alpha");
            let second = registry.get_or_create("alpha");

            assert_eq!(first.id, second.id);
            assert_eq!(registry.active_rooms(), 1);

            // Both handles feed the same room task
            let (tx, _rx) = mpsc::unbounded_channel();
            first
                .input_tx
                .send(RoomInput::Connect {
                    session_id: Uuid::new_v4(),
                    tx,
                })
                .await
                .expect("room task accepts input");
        });
    }
}
