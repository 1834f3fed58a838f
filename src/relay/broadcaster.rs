//! Proximity broadcaster - periodic per-player snapshots

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::ws::protocol::ServerMsg;

use super::Relay;

/// Counters kept across ticks, for debugging
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BroadcastStats {
    pub ticks: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

/// Sends every joined player the players within visibility range, once per
/// tick. Each tick fully supersedes the previous one.
pub struct ProximityBroadcaster {
    relay: Arc<Relay>,
    stats: BroadcastStats,
}

impl ProximityBroadcaster {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self {
            relay,
            stats: BroadcastStats::default(),
        }
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    /// Run a single tick. Returns how many snapshots were queued.
    pub fn tick(&mut self) -> usize {
        self.stats.ticks += 1;
        if self.relay.registry().is_empty() {
            return 0;
        }

        let radius = self.relay.config().visibility_radius;
        let snapshot = self.relay.registry().proximity_snapshot(radius);

        let mut sent = 0;
        for (id, players) in snapshot {
            if self
                .relay
                .connections()
                .send_to(id, &ServerMsg::Players { players })
            {
                sent += 1;
            } else {
                self.stats.frames_dropped += 1;
            }
        }

        self.stats.frames_sent += sent as u64;
        sent
    }

    /// Tick on the configured interval until `shutdown` flips or its sender
    /// goes away
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.relay.config().broadcast_interval;
        info!(interval_ms = period.as_millis() as u64, "Proximity broadcaster started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!(
            ticks = self.stats.ticks,
            frames_sent = self.stats.frames_sent,
            frames_dropped = self.stats.frames_dropped,
            "Proximity broadcaster stopped"
        );
    }
}
