//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::relay::geometry::{Quat, Vec3};
use crate::relay::registry::Player;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Enter the shared airspace
    Join {
        /// Display name (defaulted when empty or missing)
        #[serde(default)]
        name: Option<String>,
        /// Display color token (defaulted when empty or missing)
        #[serde(default)]
        color: Option<String>,
    },

    /// Latest client-authoritative flight state
    Update(PlayerUpdate),

    /// Leave the airspace but keep the socket open
    Leave,
}

/// Flight state carried by an `update`. Absent fields keep their last value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerUpdate {
    pub position: Option<Vec3>,
    pub quaternion: Option<Quat>,
    pub heading: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub speed: Option<f64>,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Acknowledges a join with the server-assigned id
    Welcome { id: Uuid },

    /// Every other player within visibility range (sent each broadcast tick)
    Players { players: Vec<Player> },

    /// A player joined within visibility range
    PlayerJoined { player: Player },

    /// A player left, disconnected or was reaped
    PlayerLeft { id: Uuid },
}

impl ServerMsg {
    /// Wire name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::Welcome { .. } => "welcome",
            ServerMsg::Players { .. } => "players",
            ServerMsg::PlayerJoined { .. } => "playerJoined",
            ServerMsg::PlayerLeft { .. } => "playerLeft",
        }
    }
}

/// Inbound/outbound framing failures
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed client message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to encode server message: {0}")]
    Encode(serde_json::Error),

    #[error("Binary frames are not supported")]
    BinaryFrame,
}

/// Parse one text frame into a client message
pub fn decode_client(text: &str) -> Result<ClientMsg, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Serialize a server message into a text frame
pub fn encode_server(msg: &ServerMsg) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}
