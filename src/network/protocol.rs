//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON text frame tagged by `type`.

use serde::{Serialize, Deserialize};

use crate::game::board::Grid;
use crate::game::events::Update;
use crate::game::state::PlayerId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Generate a puzzle without joining a game.
    GenerateBoard {
        /// Board side: 4, 9 or 16.
        size: i64,
    },

    /// Join matchmaking. Omitting `size` uses the server default.
    Join {
        /// Board side: 4, 9 or 16.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<i64>,
    },

    /// Place a value.
    MakeMove {
        /// Row, zero-based.
        row: i64,
        /// Column, zero-based.
        col: i64,
        /// Value in 1..=N.
        value: i64,
    },

    /// Ask for this connection's game status.
    Status,

    /// Leave the current game.
    Leave,

    /// Ask how many games have a free seat.
    AvailableGames,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Generated puzzle.
    Board {
        /// Board side.
        size: u32,
        /// Rows of cells, 0 for empty.
        board: Grid,
    },

    /// Join accepted; this connection now plays as `player_id`.
    Joined {
        /// Allocated player id.
        player_id: PlayerId,
    },

    /// Outcome of a move.
    MoveResult {
        /// Whether the move was applied.
        accepted: bool,
    },

    /// Game status, as in "your turn".
    Status {
        /// Human-readable status.
        status: String,
    },

    /// Game update forwarded from the player's queue.
    Update {
        /// The update.
        update: Update,
    },

    /// Open game count.
    AvailableGames {
        /// Games with a free seat.
        count: usize,
    },

    /// Pong response.
    Pong {
        /// Client timestamp from the ping.
        timestamp: u64,
        /// Server clock, milliseconds since the epoch.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be parsed.
    InvalidMessage,
    /// Board size is not 4, 9 or 16.
    InvalidBoardSize,
    /// Request needs a joined game.
    NotInGame,
    /// Connection already joined.
    AlreadyInGame,
    /// No game is in progress.
    NoGameInProgress,
    /// Connection limit reached.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::{Board, BoardSize};
    use crate::game::events::UpdateKind;

    #[test]
    fn test_client_messages_parse() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"make_move","row":1,"col":2,"value":3}"#).unwrap(),
            ClientMessage::MakeMove { row: 1, col: 2, value: 3 }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"join"}"#).unwrap(),
            ClientMessage::Join { size: None }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"join","size":16}"#).unwrap(),
            ClientMessage::Join { size: Some(16) }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"available_games"}"#).unwrap(),
            ClientMessage::AvailableGames
        );
    }

    #[test]
    fn test_negative_coordinates_parse() {
        // Range checks belong to the service, not the codec
        let json = r#"{"type":"make_move","row":-1,"col":0,"value":99}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(msg, ClientMessage::MakeMove { row: -1, col: 0, value: 99 });
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_update_message_shape() {
        let board = Board::empty(BoardSize::Four);
        let update = Update::game_start(&board)
            .personalized(PlayerId::new(1), Some(PlayerId::new(1)));
        let json = ServerMessage::Update { update }.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "update");
        assert_eq!(value["update"]["type"], "GAME_START");
        assert_eq!(value["update"]["isMyTurn"], true);

        match ServerMessage::from_json(&json).unwrap() {
            ServerMessage::Update { update } => assert_eq!(update.kind, UpdateKind::GameStart),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_joined_carries_numeric_id() {
        let json = ServerMessage::Joined { player_id: PlayerId::new(3) }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"joined","player_id":3}"#);
    }

    #[test]
    fn test_error_message() {
        let json = ServerMessage::error(ErrorCode::InvalidBoardSize, "size 5").to_json().unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("invalid_board_size"));
    }
}
