//! Session State Machine
//!
//! One two-player match: the board, the two seats in join order, the turn
//! pointer and the lifecycle phase.
//!
//! ```text
//! Waiting ──begin──▶ InProgress ──last cell──▶ Complete
//!    ▲                   │                        │
//!    │               player left              player left
//!    │                   ▼                        ▼
//!    └────add_player── Abandoned ◀────────────────┘
//! ```
//!
//! The session never locks or publishes anything itself. Callers own the lock
//! around it and turn the returned outcomes into updates.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::game::board::{Board, BoardSize};

/// Seats per session.
pub const MAX_PLAYERS: usize = 2;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Numeric player handle, allocated by the registry starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// Wrap a raw id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier. Allocated in creation order, so ordering a map by it
/// iterates sessions oldest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    /// Fewer than two players, or two seated but the board not yet installed.
    Waiting,
    /// Both players present, turns running.
    InProgress,
    /// Board filled; winner recorded.
    Complete,
    /// A player left a started game while the other stayed.
    Abandoned,
}

/// Result of seating a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seating {
    /// First seat taken; waiting for an opponent.
    Waiting,
    /// Second seat taken; the session can begin once a board is ready.
    Ready,
}

/// Accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Turn passed to the other seat.
    TurnPassed {
        /// New turn holder.
        next: PlayerId,
    },
    /// The move filled the last empty cell.
    Won {
        /// The mover.
        winner: PlayerId,
    },
}

/// Why a move was refused. All variants look the same to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MoveRejection {
    /// Session is not running.
    #[error("Session is {0:?}, not in progress")]
    NotInProgress(SessionPhase),

    /// Mover does not hold the turn, or is not seated here.
    #[error("Player does not hold the turn")]
    NotYourTurn,

    /// Board refused the placement.
    #[error("Illegal placement")]
    IllegalPlacement,
}

/// Result of removing a seated player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Departure {
    /// Player left behind, if any.
    pub remaining: Option<PlayerId>,
    /// Phase after the removal.
    pub phase: SessionPhase,
}

/// Per-player view of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Player has no session.
    NotInGame,
    /// Waiting for an opponent or for the board.
    Waiting,
    /// Player holds the turn.
    YourTurn,
    /// Opponent holds the turn.
    OpponentsTurn,
    /// Board complete.
    GameOver {
        /// Winner, if recorded.
        winner: Option<PlayerId>,
    },
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameStatus::NotInGame => f.write_str("not in a game"),
            GameStatus::Waiting => f.write_str("waiting"),
            GameStatus::YourTurn => f.write_str("your turn"),
            GameStatus::OpponentsTurn => f.write_str("opponent's turn"),
            GameStatus::GameOver { .. } => f.write_str("game over"),
        }
    }
}

/// Session transition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Both seats taken.
    #[error("Session is full")]
    SessionFull,

    /// Player already seated here.
    #[error("Already in session")]
    AlreadyInSession,

    /// Transition not valid from the current phase.
    #[error("Invalid session state {0:?}")]
    InvalidState(SessionPhase),

    /// Begin requested without two seated players.
    #[error("Session needs 2 players to begin, has {0}")]
    NotEnoughPlayers(usize),

    /// Board size differs from the session's.
    #[error("Board is {actual}, session plays {expected}")]
    SizeMismatch {
        /// Session board size.
        expected: BoardSize,
        /// Size of the supplied board.
        actual: BoardSize,
    },
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// One match.
#[derive(Debug, Clone)]
pub struct GameSession {
    id: SessionId,
    size: BoardSize,
    board: Board,
    /// Seats in join order. Seat 0 opens every game.
    players: Vec<PlayerId>,
    current: Option<PlayerId>,
    phase: SessionPhase,
    winner: Option<PlayerId>,
}

impl GameSession {
    /// Create an empty session.
    pub fn new(id: SessionId, size: BoardSize) -> Self {
        Self {
            id,
            size,
            board: Board::empty(size),
            players: Vec::with_capacity(MAX_PLAYERS),
            current: None,
            phase: SessionPhase::Waiting,
            winner: None,
        }
    }

    /// Seat a player.
    ///
    /// The first seated player holds the turn. Joining a session whose game
    /// ended (opponent gone) resets it to `Waiting` for a new game.
    pub fn add_player(&mut self, player: PlayerId) -> Result<Seating, SessionError> {
        if self.players.contains(&player) {
            return Err(SessionError::AlreadyInSession);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(SessionError::SessionFull);
        }

        if self.phase != SessionPhase::Waiting {
            debug!(
                session_id = %self.id,
                phase = ?self.phase,
                "Resetting session for a new opponent"
            );
            self.phase = SessionPhase::Waiting;
            self.winner = None;
        }

        self.players.push(player);
        if self.players.len() == 1 {
            self.current = Some(player);
        }

        info!(
            session_id = %self.id,
            player_id = %player,
            seated = self.players.len(),
            "Player seated"
        );

        Ok(if self.players.len() == MAX_PLAYERS {
            Seating::Ready
        } else {
            Seating::Waiting
        })
    }

    /// Start the game on a freshly generated board.
    ///
    /// Requires both seats taken and `Waiting`. The first-joined player moves
    /// first.
    pub fn begin(&mut self, board: Board) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Waiting {
            return Err(SessionError::InvalidState(self.phase));
        }
        if self.players.len() != MAX_PLAYERS {
            return Err(SessionError::NotEnoughPlayers(self.players.len()));
        }
        if board.size() != self.size {
            return Err(SessionError::SizeMismatch {
                expected: self.size,
                actual: board.size(),
            });
        }

        self.board = board;
        self.current = Some(self.players[0]);
        self.winner = None;
        self.phase = SessionPhase::InProgress;

        info!(session_id = %self.id, size = %self.size, "Game started");
        Ok(())
    }

    /// Apply a move by `player`.
    ///
    /// Refused without any state change unless the game is running, `player`
    /// holds the turn and the board accepts the placement.
    pub fn make_move(
        &mut self,
        player: PlayerId,
        row: usize,
        col: usize,
        value: u8,
    ) -> Result<MoveOutcome, MoveRejection> {
        if self.phase != SessionPhase::InProgress {
            return Err(MoveRejection::NotInProgress(self.phase));
        }
        if self.current != Some(player) {
            return Err(MoveRejection::NotYourTurn);
        }
        if !self.board.place(row, col, value) {
            return Err(MoveRejection::IllegalPlacement);
        }

        if self.board.is_complete() {
            self.phase = SessionPhase::Complete;
            self.winner = Some(player);
            self.current = None;
            info!(session_id = %self.id, winner = %player, "Board complete");
            return Ok(MoveOutcome::Won { winner: player });
        }

        let next = self.opponent_of(player).unwrap_or(player);
        self.current = Some(next);
        Ok(MoveOutcome::TurnPassed { next })
    }

    /// Remove a player. `None` if they were not seated.
    ///
    /// A started or finished game with one player left becomes `Abandoned`;
    /// a game that never began stays `Waiting`.
    pub fn remove_player(&mut self, player: PlayerId) -> Option<Departure> {
        let seat = self.players.iter().position(|&p| p == player)?;
        self.players.remove(seat);

        let remaining = self.players.first().copied();
        match remaining {
            None => {
                self.phase = SessionPhase::Waiting;
                self.current = None;
                self.winner = None;
            }
            Some(other) => {
                if self.phase != SessionPhase::Waiting {
                    self.phase = SessionPhase::Abandoned;
                }
                self.current = Some(other);
            }
        }

        info!(session_id = %self.id, player_id = %player, phase = ?self.phase, "Player removed");
        Some(Departure {
            remaining,
            phase: self.phase,
        })
    }

    /// How the session looks to `player`.
    pub fn status_for(&self, player: PlayerId) -> GameStatus {
        if !self.players.contains(&player) {
            return GameStatus::NotInGame;
        }
        match self.phase {
            SessionPhase::Waiting | SessionPhase::Abandoned => GameStatus::Waiting,
            SessionPhase::InProgress if self.current == Some(player) => GameStatus::YourTurn,
            SessionPhase::InProgress => GameStatus::OpponentsTurn,
            SessionPhase::Complete => GameStatus::GameOver { winner: self.winner },
        }
    }

    /// The other seated player.
    pub fn opponent_of(&self, player: PlayerId) -> Option<PlayerId> {
        if !self.players.contains(&player) {
            return None;
        }
        self.players.iter().copied().find(|&p| p != player)
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Board size played here.
    pub fn size(&self) -> BoardSize {
        self.size
    }

    /// Current board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Seated players in join order.
    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    /// Turn holder.
    pub fn current_player(&self) -> Option<PlayerId> {
        self.current
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Winner once complete.
    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    /// Whether both seats are taken.
    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Whether nobody is seated.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Seated player count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Whether turns are running.
    pub fn is_in_progress(&self) -> bool {
        self.phase == SessionPhase::InProgress
    }
}

// =============================================================================
// TESTS
// =============================================================================
