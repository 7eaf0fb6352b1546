//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::SessionRegistry;
use crate::lobby::Lobby;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lobby: Arc<Lobby>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let sessions = Arc::new(SessionRegistry::new());
        let lobby = Arc::new(Lobby::new(sessions.clone()));

        Self {
            config,
            lobby,
            sessions,
        }
    }
}
