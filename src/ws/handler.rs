//! WebSocket upgrade handler

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::relay::connections::{ConnectionHandle, Outbox};
use crate::relay::Relay;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{decode_client, ClientMsg, ProtocolError};

/// How long the writer gets to finish once the reader is done
const WRITER_GRACE: Duration = Duration::from_secs(2);

/// How long a peer gets to take the closing frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Live socket sessions, counted from upgrade until the session task ends
#[derive(Debug, Default)]
pub struct SessionCounter {
    active: AtomicUsize,
}

impl SessionCounter {
    pub fn enter(self: &Arc<Self>) -> SessionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        SessionGuard(self.clone())
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// Counts one session until dropped
#[derive(Debug)]
pub struct SessionGuard(Arc<SessionCounter>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay, state.sessions))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, relay: Arc<Relay>, sessions: Arc<SessionCounter>) {
    let _session = sessions.enter();
    let (handle, outbox) = ConnectionHandle::channel(relay.config().outbound_buffer);
    let player_id = relay.connect(handle);
    info!(player_id = %player_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let Outbox { frames, close } = outbox;

    // Writer task: outbound queue -> WebSocket
    let mut writer_handle = tokio::spawn(run_writer(player_id, ws_sink, frames, close.clone()));

    run_reader(player_id, &relay, ws_stream, close).await;

    // Cleanup on disconnect, reaped or not
    relay.disconnect(player_id);
    match tokio::time::timeout(WRITER_GRACE, &mut writer_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!(player_id = %player_id, error = %e, "Writer task ended abnormally");
        }
        Err(_) => {
            warn!(player_id = %player_id, "Writer task stuck, aborting");
            writer_handle.abort();
        }
    }

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Forward queued frames to the socket until the queue closes, a close is
/// requested or the socket fails
async fn run_writer(
    player_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<String>,
    mut close: watch::Receiver<bool>,
) {
    loop {
        let text = tokio::select! {
            frame = frames.recv() => match frame {
                Some(text) => text,
                None => break,
            },
            _ = wait_for_close(&mut close) => {
                debug!(player_id = %player_id, "Closing socket on request");
                break;
            }
        };

        // A peer that stopped reading can block the send indefinitely
        tokio::select! {
            sent = ws_sink.send(Message::Text(text)) => {
                if let Err(e) = sent {
                    debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                    return;
                }
            }
            _ = wait_for_close(&mut close) => {
                debug!(player_id = %player_id, "Abandoning send to stalled peer");
                return;
            }
        }
    }

    let goodbye = async {
        let _ = ws_sink.send(Message::Close(None)).await;
        let _ = ws_sink.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, goodbye).await.is_err() {
        debug!(player_id = %player_id, "Peer did not take the close frame");
    }
}

/// Feed inbound frames to the relay until the peer leaves, the socket fails
/// or a close is requested
async fn run_reader(
    player_id: Uuid,
    relay: &Relay,
    mut ws_stream: SplitStream<WebSocket>,
    mut close: watch::Receiver<bool>,
) {
    let rate_limiter = ConnectionRateLimiter::new(relay.config().max_messages_per_second);

    loop {
        let result = tokio::select! {
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = wait_for_close(&mut close) => break,
        };

        match result {
            Ok(Message::Text(text)) => {
                dispatch_text(relay, &rate_limiter, player_id, &text);
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, error = %ProtocolError::BinaryFrame, "Ignoring frame");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Decode one text frame and hand it to the relay if the budget allows.
/// Malformed frames are logged and dropped.
fn dispatch_text(
    relay: &Relay,
    rate_limiter: &ConnectionRateLimiter,
    player_id: Uuid,
    text: &str,
) {
    let msg = match decode_client(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(player_id = %player_id, error = %e, "Failed to parse client message");
            return;
        }
    };

    if !within_budget(&msg, rate_limiter) {
        warn!(player_id = %player_id, "Rate limited inbound message");
        return;
    }
    relay.handle_message(player_id, msg);
}

/// `leave` never spends budget; dropping it would leave a ghost until reaped
fn within_budget(msg: &ClientMsg, rate_limiter: &ConnectionRateLimiter) -> bool {
    matches!(msg, ClientMsg::Leave) || rate_limiter.check_inbound()
}

/// Resolve once a close has been requested (or the requester is gone)
async fn wait_for_close(close: &mut watch::Receiver<bool>) {
    while !*close.borrow_and_update() {
        if close.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::SPAWN_POSITION;
    use crate::relay::test_support::TestClient;
    use crate::ws::protocol::ServerMsg;

    #[tokio::test]
    async fn wait_for_close_sees_earlier_request() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), wait_for_close(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_close_returns_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_close(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_close_pends_while_open() {
        let (_tx, mut rx) = watch::channel(false);
        let waited = tokio::time::timeout(Duration::from_secs(5), wait_for_close(&mut rx)).await;
        assert!(waited.is_err());
    }

    #[test]
    fn dispatch_applies_valid_frames() {
        let relay = Relay::default();
        let limiter = ConnectionRateLimiter::default();
        let mut client = TestClient::connect(&relay);

        let join = r##"{"type":"join","name":"Viper","color":"#abcdef"}"##;
        dispatch_text(&relay, &limiter, client.id, join);
        assert_eq!(client.drain(), vec![ServerMsg::Welcome { id: client.id }]);

        let player = relay.registry().get(client.id).unwrap();
        assert_eq!(player.name, "Viper");
        assert_eq!(player.color, "#abcdef");
    }

    #[test]
    fn malformed_frames_keep_state_intact() {
        let relay = Relay::default();
        let limiter = ConnectionRateLimiter::default();
        let mut client = TestClient::join(&relay, "Goose", 1_000);
        client.drain();

        dispatch_text(&relay, &limiter, client.id, "{not json");
        dispatch_text(&relay, &limiter, client.id, r#"{"type":"barrelRoll"}"#);
        dispatch_text(&relay, &limiter, client.id, r#"{"position":{"x":1,"y":2,"z":3}}"#);

        assert_eq!(relay.player_count(), 1);
        assert!(client.drain().is_empty());
        assert_eq!(relay.registry().get(client.id).unwrap().position, SPAWN_POSITION);
    }

    #[test]
    fn leave_gets_through_an_exhausted_budget() {
        let relay = Relay::default();
        let limiter = ConnectionRateLimiter::new(1);
        let mut client = TestClient::connect(&relay);
        let mut watcher = TestClient::join(&relay, "Watcher", 1_000);

        dispatch_text(&relay, &limiter, client.id, r#"{"type":"join","name":"Maverick"}"#);
        assert_eq!(client.drain(), vec![ServerMsg::Welcome { id: client.id }]);
        watcher.drain();

        // Budget spent: the update is dropped
        dispatch_text(
            &relay,
            &limiter,
            client.id,
            r#"{"type":"update","position":{"x":1,"y":2,"z":3}}"#,
        );
        assert_eq!(relay.registry().get(client.id).unwrap().position, SPAWN_POSITION);

        dispatch_text(&relay, &limiter, client.id, r#"{"type":"leave"}"#);
        assert!(relay.registry().get(client.id).is_none());
        assert_eq!(watcher.drain(), vec![ServerMsg::PlayerLeft { id: client.id }]);
    }

    #[test]
    fn only_leave_skips_the_budget() {
        let limiter = ConnectionRateLimiter::new(1);
        assert!(within_budget(&ClientMsg::Update(Default::default()), &limiter));
        assert!(!within_budget(&ClientMsg::Update(Default::default()), &limiter));
        assert!(!within_budget(
            &ClientMsg::Join {
                name: None,
                color: None
            },
            &limiter
        ));
        assert!(within_budget(&ClientMsg::Leave, &limiter));
        assert!(within_budget(&ClientMsg::Leave, &limiter));
    }

    #[test]
    fn session_counter_tracks_guards() {
        let sessions = Arc::new(SessionCounter::default());
        let first = sessions.enter();
        let second = sessions.enter();
        assert_eq!(sessions.active(), 2);

        drop(first);
        assert_eq!(sessions.active(), 1);
        drop(second);
        assert_eq!(sessions.active(), 0);
    }
}
