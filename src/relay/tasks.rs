//! Lifecycle of the relay's periodic tasks

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::broadcaster::ProximityBroadcaster;
use super::{reaper, Relay};

/// The broadcaster and reaper, stoppable as a unit
pub struct RelayTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl RelayTasks {
    /// Spawn both periodic tasks on the current runtime
    pub fn spawn(relay: Arc<Relay>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let broadcaster = tokio::spawn(
            ProximityBroadcaster::new(relay.clone()).run(shutdown_rx.clone()),
        );
        let reaper = tokio::spawn(reaper::run(relay, shutdown_rx));

        Self {
            shutdown,
            handles: vec![("broadcaster", broadcaster), ("reaper", reaper)],
        }
    }

    /// Signal both tasks and wait until they have exited. No tick runs after
    /// this returns.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);

        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Relay task ended abnormally");
            }
        }

        info!("Relay tasks stopped");
    }
}
