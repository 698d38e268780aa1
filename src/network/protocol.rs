//! Wire Protocol
//!
//! Every frame on the wire is a UTF-8 JSON object with exactly two fields:
//! `type` (one of the closed [`MessageKind`] set) and `payload` (an
//! arbitrary nested object, null for control messages). Decoding tolerates
//! unknown `type` values so newer clients and older servers can coexist,
//! but a frame missing `type` is a protocol violation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::id::{ClientId, GameId};

/// Closed set of frame types exchanged with clients.
///
/// Unknown types decode to [`MessageKind::Unknown`] and are dropped at the
/// router rather than failing the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Server -> client: sent once after connect.
    Welcome,
    /// Server -> client: lobby roster snapshot.
    UpdateLobby,
    /// Server -> client: a vote round closed, a game is starting.
    GameSelected,
    /// Server -> client: the player's game ended, they are back in the lobby.
    BackToLobby,
    /// Server -> client: a protocol-level error the client should surface.
    Error,
    /// Client -> server: cast a vote for a game by name.
    SelectGame,
    /// Client -> server: Pong paddle input.
    PongInput,
    /// Server -> client: Pong state snapshot, sent every tick.
    PongState,
    /// Server -> client: Pong finished.
    PongGameOver,
    /// Client -> server: Asteroids button state.
    AsteroidsInput,
    /// Server -> client: Asteroids state snapshot, sent every tick.
    AsteroidsState,
    /// Server -> client: Asteroids finished.
    AsteroidsGameOver,
    /// Any type this server does not know. Logged and dropped.
    Unknown,
}

impl MessageKind {
    /// The wire name of this frame type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::UpdateLobby => "update_lobby",
            Self::GameSelected => "game_selected",
            Self::BackToLobby => "back_to_lobby",
            Self::Error => "error",
            Self::SelectGame => "select_game",
            Self::PongInput => "pong_input",
            Self::PongState => "pong_state",
            Self::PongGameOver => "pong_game_over",
            Self::AsteroidsInput => "asteroids_input",
            Self::AsteroidsState => "asteroids_state",
            Self::AsteroidsGameOver => "asteroids_game_over",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire name; anything unrecognized maps to `Unknown`.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "welcome" => Self::Welcome,
            "update_lobby" => Self::UpdateLobby,
            "game_selected" => Self::GameSelected,
            "back_to_lobby" => Self::BackToLobby,
            "error" => Self::Error,
            "select_game" => Self::SelectGame,
            "pong_input" => Self::PongInput,
            "pong_state" => Self::PongState,
            "pong_game_over" => Self::PongGameOver,
            "asteroids_input" => Self::AsteroidsInput,
            "asteroids_state" => Self::AsteroidsState,
            "asteroids_game_over" => Self::AsteroidsGameOver,
            _ => Self::Unknown,
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&name))
    }
}

/// A single wire frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame type.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Frame payload; null when the message carries no data.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope from a serializable payload.
    pub fn new<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Build a payload-less control envelope.
    pub fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Value::Null,
        }
    }

    /// Encode to the wire representation.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the wire representation.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not a well-formed envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

// =============================================================================
// LOBBY PAYLOADS
// =============================================================================

/// One entry of the game catalog, as listed in `welcome`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameListing {
    /// Game name, the value clients vote with.
    pub name: String,
    /// Short human-readable description.
    pub description: String,
}

/// Payload of `welcome`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    /// The id assigned to this client.
    pub client_id: ClientId,
    /// Games available for voting.
    pub current_games: Vec<GameListing>,
}

/// Per-player entry of `update_lobby`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Cumulative score across games.
    pub score: i64,
    /// Whether the player is currently inside a game.
    pub in_game: bool,
    /// The player's pending vote; empty string when none.
    pub selected_game: String,
    /// Display name.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
}

/// Payload of `update_lobby`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LobbyUpdatePayload {
    /// All connected players, keyed by client id.
    pub players: HashMap<ClientId, PlayerInfo>,
}

/// Payload of `select_game` (client -> server).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectGamePayload {
    /// Name of the game being voted for.
    pub game: String,
}

/// Payload of `game_selected`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSelectedPayload {
    /// Name of the game that won the vote.
    pub selected_game: String,
    /// Id of the freshly created game instance.
    pub game_id: GameId,
}

/// Payload of `error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Short human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::new(
            MessageKind::SelectGame,
            &SelectGamePayload {
                game: "Pong".to_string(),
            },
        )
        .unwrap();

        let json = env.to_json().unwrap();
        let back = Envelope::from_json(&json).unwrap();

        assert_eq!(back.kind, MessageKind::SelectGame);
        assert_eq!(back.payload, env.payload);
    }

    #[test]
    fn test_kind_wire_names() {
        let json = Envelope::empty(MessageKind::UpdateLobby).to_json().unwrap();
        assert!(json.contains("\"update_lobby\""));

        let json = Envelope::empty(MessageKind::PongGameOver).to_json().unwrap();
        assert!(json.contains("\"pong_game_over\""));
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let env = Envelope::from_json(r#"{"type":"telemetry","payload":{"x":1}}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Unknown);
    }

    #[test]
    fn test_missing_type_is_rejected() {
        assert!(Envelope::from_json(r#"{"payload":{}}"#).is_err());
        assert!(Envelope::from_json("not json").is_err());
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let env = Envelope::from_json(r#"{"type":"back_to_lobby"}"#).unwrap();
        assert_eq!(env.kind, MessageKind::BackToLobby);
        assert!(env.payload.is_null());
    }

    #[test]
    fn test_welcome_payload_field_names() {
        let payload = WelcomePayload {
            client_id: ClientId::new(),
            current_games: vec![GameListing {
                name: "Pong".to_string(),
                description: "paddles".to_string(),
            }],
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"clientId\""));
        assert!(json.contains("\"currentGames\""));
    }

    #[test]
    fn test_player_info_field_names() {
        let info = PlayerInfo {
            score: 0,
            in_game: false,
            selected_game: String::new(),
            name: "Adrian".to_string(),
            avatar_url: "https://example.invalid/a.svg".to_string(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"inGame\""));
        assert!(json.contains("\"selectedGame\""));
        assert!(json.contains("\"avatarUrl\""));
    }
}
