//! Player registry - who is online and where

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::time::millis_since;
use crate::ws::protocol::PlayerUpdate;

use super::geometry::{within_radius, Quat, Vec3};

/// Name given to pilots that join without one
pub const DEFAULT_NAME: &str = "Pilot";

/// Color given to pilots that join without one
pub const DEFAULT_COLOR: &str = "#ffffff";

/// Where every aircraft appears on join
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 200.0, 0.0);

/// One connected client's aircraft, as relayed to the others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub position: Vec3,
    pub quaternion: Quat,
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
    pub speed: f64,
    /// Unix millis of the latest join or update
    pub last_update: u64,
}

impl Player {
    /// A fresh aircraft at the spawn point
    pub fn spawn(id: Uuid, name: String, color: String, now: u64) -> Self {
        Self {
            id,
            name,
            color,
            position: SPAWN_POSITION,
            quaternion: Quat::IDENTITY,
            heading: 0.0,
            pitch: 0.0,
            roll: 0.0,
            speed: 0.0,
            last_update: now,
        }
    }

    /// Merge the fields present in `update` and refresh the timestamp.
    /// Identity fields are never touched.
    fn merge(&mut self, update: &PlayerUpdate, now: u64) {
        if let Some(position) = update.position {
            self.position = position;
        }
        if let Some(quaternion) = update.quaternion {
            self.quaternion = quaternion;
        }
        if let Some(heading) = update.heading {
            self.heading = heading;
        }
        if let Some(pitch) = update.pitch {
            self.pitch = pitch;
        }
        if let Some(roll) = update.roll {
            self.roll = roll;
        }
        if let Some(speed) = update.speed {
            self.speed = speed;
        }
        self.last_update = self.last_update.max(now);
    }
}

fn or_default(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

/// Authoritative set of joined players.
///
/// Every operation takes the lock briefly and never awaits while holding it.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: RwLock<HashMap<Uuid, Player>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for `id` at the spawn point. A duplicate join
    /// replaces the previous entry.
    pub fn upsert_on_join(
        &self,
        id: Uuid,
        name: Option<String>,
        color: Option<String>,
        now: u64,
    ) -> Player {
        let player = Player::spawn(
            id,
            or_default(name, DEFAULT_NAME),
            or_default(color, DEFAULT_COLOR),
            now,
        );
        self.players.write().insert(id, player.clone());
        player
    }

    /// Merge an update into `id`'s entry. Returns false (and does nothing)
    /// when `id` has not joined.
    pub fn apply_update(&self, id: Uuid, update: &PlayerUpdate, now: u64) -> bool {
        match self.players.write().get_mut(&id) {
            Some(player) => {
                player.merge(update, now);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: Uuid) -> Option<Player> {
        self.players.write().remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<Player> {
        self.players.read().get(&id).cloned()
    }

    /// Every other player within `radius` of `id` (inclusive), unordered.
    /// Empty when `id` is not registered.
    pub fn neighbors_of(&self, id: Uuid, radius: f64) -> Vec<Player> {
        let players = self.players.read();
        match players.get(&id) {
            Some(me) => neighbors_in(&players, me, radius),
            None => Vec::new(),
        }
    }

    /// Neighbor lists for every registered player, computed against one
    /// consistent view of the registry. O(n²) in the number of players.
    pub fn proximity_snapshot(&self, radius: f64) -> Vec<(Uuid, Vec<Player>)> {
        let players = self.players.read();
        players
            .values()
            .map(|me| (me.id, neighbors_in(&players, me, radius)))
            .collect()
    }

    /// Ids whose last update is more than `timeout_ms` older than `now`
    pub fn stale_ids(&self, now: u64, timeout_ms: u64) -> Vec<Uuid> {
        self.players
            .read()
            .values()
            .filter(|p| millis_since(p.last_update, now) > timeout_ms)
            .map(|p| p.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }

    pub fn clear(&self) {
        self.players.write().clear();
    }
}

fn neighbors_in(players: &HashMap<Uuid, Player>, me: &Player, radius: f64) -> Vec<Player> {
    players
        .values()
        .filter(|other| other.id != me.id)
        .filter(|other| within_radius(&me.position, &other.position, radius))
        .cloned()
        .collect()
}
