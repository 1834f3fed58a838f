//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::relay::Relay;
use crate::ws::handler::SessionCounter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
    pub sessions: Arc<SessionCounter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let relay = Arc::new(Relay::new(config.relay.clone()));

        Self {
            config: Arc::new(config),
            relay,
            sessions: Arc::new(SessionCounter::default()),
        }
    }
}
