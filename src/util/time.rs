//! Time utilities for the relay

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Snapshot rate and sweep cadence defaults
pub const BROADCAST_HZ: u64 = 20;
pub const BROADCAST_INTERVAL_MS: u64 = 1_000 / BROADCAST_HZ;
pub const REAPER_INTERVAL_MS: u64 = 5_000;
pub const STALE_TIMEOUT_MS: u64 = 10_000;

/// Milliseconds elapsed between two wall-clock stamps, saturating at zero
/// when the clock stepped backwards.
pub fn millis_since(earlier: u64, now: u64) -> u64 {
    now.saturating_sub(earlier)
}
