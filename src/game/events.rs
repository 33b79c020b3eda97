//! Game Updates
//!
//! Events pushed to players when a session changes. Each player drains
//! their own queue, so every update is consumed once per recipient.

use serde::{Serialize, Deserialize};

use crate::game::board::{Board, Grid};
use crate::game::state::PlayerId;

/// Update kind. Serialized as the wire enum (`GAME_START`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateKind {
    /// Second player joined; a fresh board is in play.
    GameStart,
    /// A move was accepted.
    MoveMade,
    /// The board was completed.
    GameOver,
    /// The opponent left the session.
    PlayerDisconnected,
    /// Nothing arrived before the poll timeout.
    NoUpdate,
    /// Server-side failure the player should know about.
    Error,
}

/// One event as delivered to one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: UpdateKind,

    /// Board snapshot at publication time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<Grid>,

    /// Winner, on `GAME_OVER`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<PlayerId>,

    /// Whether the recipient holds the turn. Set per recipient on delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_my_turn: Option<bool>,

    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Update {
    fn bare(kind: UpdateKind) -> Self {
        Self {
            kind,
            board: None,
            winner_id: None,
            is_my_turn: None,
            message: None,
        }
    }

    /// Game started on `board`.
    pub fn game_start(board: &Board) -> Self {
        Self {
            board: Some(board.to_grid()),
            ..Self::bare(UpdateKind::GameStart)
        }
    }

    /// A move landed; `board` is the position after it.
    pub fn move_made(board: &Board) -> Self {
        Self {
            board: Some(board.to_grid()),
            ..Self::bare(UpdateKind::MoveMade)
        }
    }

    /// `winner` filled the last cell.
    pub fn game_over(board: &Board, winner: PlayerId) -> Self {
        Self {
            board: Some(board.to_grid()),
            winner_id: Some(winner),
            message: Some(format!("player {winner} wins")),
            ..Self::bare(UpdateKind::GameOver)
        }
    }

    /// `departed` left the session.
    pub fn player_disconnected(departed: PlayerId) -> Self {
        Self {
            message: Some(format!("player {departed} left the game")),
            ..Self::bare(UpdateKind::PlayerDisconnected)
        }
    }

    /// Poll timeout sentinel.
    pub fn no_update() -> Self {
        Self::bare(UpdateKind::NoUpdate)
    }

    /// Server-side failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(UpdateKind::Error)
        }
    }

    /// True for the poll timeout sentinel.
    pub fn is_no_update(&self) -> bool {
        self.kind == UpdateKind::NoUpdate
    }

    /// Copy addressed to `recipient`, with `is_my_turn` filled in when a turn
    /// holder is known.
    pub fn personalized(&self, recipient: PlayerId, turn_holder: Option<PlayerId>) -> Self {
        Self {
            is_my_turn: turn_holder.map(|holder| holder == recipient),
            ..self.clone()
        }
    }
}
