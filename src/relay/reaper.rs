//! Staleness reaper - evicts players that stopped sending updates

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::{millis_since, unix_millis};

use super::Relay;

/// Evict every player idle for longer than the stale timeout as of `now`.
///
/// The socket is closed first, then the player goes through the normal leave
/// path so the rest of the room sees exactly one `playerLeft`.
pub fn sweep(relay: &Relay, now: u64) -> Vec<Uuid> {
    let timeout_ms = relay.config().stale_timeout.as_millis() as u64;
    let mut reaped = Vec::new();

    for id in relay.registry().stale_ids(now, timeout_ms) {
        // An update may have landed since the scan
        match relay.registry().get(id) {
            Some(player) if millis_since(player.last_update, now) > timeout_ms => {}
            _ => continue,
        }

        relay.connections().close_and_forget(id);
        if relay.leave(id) {
            info!(player_id = %id, timeout_ms, "Reaped stale player");
            reaped.push(id);
        }
    }

    reaped
}

/// Sweep on the configured interval until `shutdown` flips
pub async fn run(relay: Arc<Relay>, mut shutdown: watch::Receiver<bool>) {
    let period = relay.config().reaper_interval;
    info!(interval_ms = period.as_millis() as u64, "Staleness reaper started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = sweep(&relay, unix_millis());
                if !reaped.is_empty() {
                    debug!(reaped = reaped.len(), players = relay.player_count(), "Sweep finished");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("Staleness reaper stopped");
}
