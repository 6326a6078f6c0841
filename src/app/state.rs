//! Application state shared across routes

use std::sync::Arc;

use crate::config::{Config, MatchConfig};
use crate::game::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Every room runs with the same immutable match constants
        let rooms = Arc::new(RoomRegistry::new(MatchConfig::default()));

        Self { config, rooms }
    }
}
