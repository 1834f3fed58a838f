//! Multiplayer position relay
//!
//! `Relay` owns the player registry and the connection map for one server
//! instance and implements the join/update/leave state transitions. The
//! broadcaster and reaper drive it on their own timers.

pub mod broadcaster;
pub mod connections;
pub mod geometry;
pub mod reaper;
pub mod registry;
pub mod tasks;

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, PlayerUpdate, ServerMsg};

use connections::{ConnectionHandle, ConnectionManager};
use registry::PlayerRegistry;

pub use tasks::RelayTasks;

/// One relay instance: the registry, the live connections and the tuning
/// they are driven with
#[derive(Debug)]
pub struct Relay {
    config: RelayConfig,
    registry: PlayerRegistry,
    connections: ConnectionManager,
    accepting: AtomicBool,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: PlayerRegistry::new(),
            connections: ConnectionManager::new(),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Accept a new connection and assign its player id. After `shutdown`
    /// the connection is closed straight away.
    pub fn connect(&self, handle: ConnectionHandle) -> Uuid {
        let id = Uuid::new_v4();
        // Register before checking so a concurrent shutdown either sees this
        // entry in `close_all` or has already cleared the flag
        self.connections.register(id, handle);
        if !self.accepting.load(Ordering::SeqCst) {
            warn!(player_id = %id, "Connection arrived during shutdown, closing");
            self.connections.close_and_forget(id);
            return id;
        }
        debug!(player_id = %id, connections = self.connections.len(), "Connection registered");
        id
    }

    pub fn handle_message(&self, id: Uuid, msg: ClientMsg) {
        self.handle_message_at(id, msg, unix_millis());
    }

    /// Apply one client message as of `now` (Unix millis)
    pub fn handle_message_at(&self, id: Uuid, msg: ClientMsg, now: u64) {
        match msg {
            ClientMsg::Join { name, color } => self.join(id, name, color, now),
            ClientMsg::Update(update) => self.update(id, &update, now),
            ClientMsg::Leave => {
                self.leave(id);
            }
        }
    }

    fn join(&self, id: Uuid, name: Option<String>, color: Option<String>, now: u64) {
        let player = self.registry.upsert_on_join(id, name, color, now);
        self.connections.send_to(id, &ServerMsg::Welcome { id });

        // Proximity is evaluated once, at join time
        let nearby = self.registry.neighbors_of(id, self.config.visibility_radius);
        let announcement = ServerMsg::PlayerJoined {
            player: player.clone(),
        };
        for other in &nearby {
            self.connections.send_to(other.id, &announcement);
        }

        info!(
            player_id = %id,
            name = %player.name,
            nearby = nearby.len(),
            players = self.registry.len(),
            "Player joined"
        );
    }

    fn update(&self, id: Uuid, update: &PlayerUpdate, now: u64) {
        if !self.registry.apply_update(id, update, now) {
            debug!(player_id = %id, "Ignoring update before join");
        }
    }

    /// Remove `id` from the registry and tell everyone else. Returns false
    /// when `id` had not joined; nothing is broadcast in that case.
    pub fn leave(&self, id: Uuid) -> bool {
        if self.registry.remove(id).is_none() {
            debug!(player_id = %id, "Ignoring leave before join");
            return false;
        }

        let notified = self
            .connections
            .broadcast_except(id, &ServerMsg::PlayerLeft { id });
        info!(
            player_id = %id,
            notified,
            players = self.registry.len(),
            "Player left"
        );
        true
    }

    /// Socket closed or errored: leave (if joined) and forget the handle
    pub fn disconnect(&self, id: Uuid) {
        self.leave(id);
        self.connections.unregister(id);
        debug!(player_id = %id, connections = self.connections.len(), "Connection closed");
    }

    /// Close every connection and drop all state. Call after the periodic
    /// tasks have been stopped. Connections that arrive later are refused.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let closed = self.connections.close_all();
        let players = self.registry.len();
        self.registry.clear();
        info!(closed, players, "Relay shut down");
    }

    pub fn player_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::connections::Outbox;
    use super::*;

    /// A connected client whose outbound frames can be inspected
    pub struct TestClient {
        pub id: Uuid,
        pub outbox: Outbox,
    }

    impl TestClient {
        pub fn connect(relay: &Relay) -> Self {
            let (handle, outbox) = ConnectionHandle::channel(256);
            let id = relay.connect(handle);
            Self { id, outbox }
        }

        pub fn join(relay: &Relay, name: &str, now: u64) -> Self {
            let client = Self::connect(relay);
            relay.handle_message_at(
                client.id,
                ClientMsg::Join {
                    name: Some(name.to_string()),
                    color: None,
                },
                now,
            );
            client
        }

        /// Drain and decode every queued frame
        pub fn drain(&mut self) -> Vec<ServerMsg> {
            let mut messages = Vec::new();
            while let Ok(frame) = self.outbox.frames.try_recv() {
                messages.push(serde_json::from_str(&frame).expect("server sent invalid JSON"));
            }
            messages
        }
    }

    pub fn move_to(relay: &Relay, id: Uuid, x: f64, y: f64, z: f64, now: u64) {
        relay.handle_message_at(
            id,
            ClientMsg::Update(PlayerUpdate {
                position: Some(geometry::Vec3::new(x, y, z)),
                ..Default::default()
            }),
            now,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::geometry::Vec3;
    use super::test_support::{move_to, TestClient};
    use super::*;

    #[test]
    fn join_sends_welcome_to_sender() {
        let relay = Relay::default();
        let mut client = TestClient::join(&relay, "Iceman", 1_000);

        assert_eq!(client.drain(), vec![ServerMsg::Welcome { id: client.id }]);
        assert_eq!(relay.player_count(), 1);
    }

    #[test]
    fn join_announces_only_to_nearby_players() {
        let relay = Relay::default();
        let mut near = TestClient::join(&relay, "Near", 1_000);
        let mut far = TestClient::join(&relay, "Far", 1_000);
        move_to(&relay, far.id, 5_000.0, 200.0, 0.0, 1_000);
        near.drain();
        far.drain();

        let newcomer = TestClient::join(&relay, "New", 2_000);

        let near_msgs = near.drain();
        assert_eq!(near_msgs.len(), 1);
        let ServerMsg::PlayerJoined { player } = &near_msgs[0] else {
            panic!("expected playerJoined");
        };
        assert_eq!(player.id, newcomer.id);
        assert_eq!(player.name, "New");
        assert!(far.drain().is_empty());
    }

    #[test]
    fn update_before_join_is_ignored() {
        let relay = Relay::default();
        let mut lurker = TestClient::connect(&relay);

        move_to(&relay, lurker.id, 1.0, 2.0, 3.0, 1_000);
        assert_eq!(relay.player_count(), 0);
        assert!(lurker.drain().is_empty());
    }

    #[test]
    fn update_moves_only_the_sender() {
        let relay = Relay::default();
        let a = TestClient::join(&relay, "A", 1_000);
        let b = TestClient::join(&relay, "B", 1_000);

        move_to(&relay, a.id, 10.0, 210.0, 20.0, 1_500);

        assert_eq!(relay.registry().get(a.id).unwrap().position, Vec3::new(10.0, 210.0, 20.0));
        assert_eq!(relay.registry().get(a.id).unwrap().last_update, 1_500);
        assert_eq!(relay.registry().get(b.id).unwrap().position, registry::SPAWN_POSITION);
    }

    #[test]
    fn leave_notifies_every_remaining_connection_once() {
        let relay = Relay::default();
        let leaver = TestClient::join(&relay, "Leaver", 1_000);
        let mut far = TestClient::join(&relay, "Far", 1_000);
        move_to(&relay, far.id, 9_000.0, 200.0, 0.0, 1_000);
        let mut lurker = TestClient::connect(&relay);
        far.drain();

        relay.handle_message_at(leaver.id, ClientMsg::Leave, 2_000);
        relay.disconnect(leaver.id);

        let expected = vec![ServerMsg::PlayerLeft { id: leaver.id }];
        assert_eq!(far.drain(), expected);
        assert_eq!(lurker.drain(), expected);
        assert_eq!(relay.player_count(), 1);
        assert_eq!(relay.connection_count(), 2);
    }

    #[test]
    fn leave_before_join_broadcasts_nothing() {
        let relay = Relay::default();
        let lurker = TestClient::connect(&relay);
        let mut other = TestClient::join(&relay, "Other", 1_000);
        other.drain();

        assert!(!relay.leave(lurker.id));
        relay.disconnect(lurker.id);
        assert!(other.drain().is_empty());
        assert_eq!(relay.connection_count(), 1);
    }

    #[test]
    fn shutdown_closes_connections_and_clears_registry() {
        let relay = Relay::default();
        let a = TestClient::join(&relay, "A", 1_000);
        let lurker = TestClient::connect(&relay);

        relay.shutdown();

        assert_eq!(relay.player_count(), 0);
        assert_eq!(relay.connection_count(), 0);
        assert!(*a.outbox.close.borrow());
        assert!(*lurker.outbox.close.borrow());
    }

    #[test]
    fn connection_after_shutdown_is_closed_at_once() {
        let relay = Relay::default();
        relay.shutdown();

        let late = TestClient::connect(&relay);
        assert!(*late.outbox.close.borrow());
        assert_eq!(relay.connection_count(), 0);

        relay.disconnect(late.id);
        assert_eq!(relay.player_count(), 0);
    }

    #[test]
    fn relays_are_independent() {
        let first = Relay::default();
        let second = Relay::default();
        TestClient::join(&first, "Solo", 1_000);

        assert_eq!(first.player_count(), 1);
        assert_eq!(second.player_count(), 0);
    }
}
