//! Game Logic Module
//!
//! Everything about a single match. No locking and no I/O; the network layer
//! owns concurrency.
//!
//! ## Module Structure
//!
//! - `board`: Grid, size, placement rules
//! - `generator`: Puzzle generation by constraint backtracking
//! - `state`: Two-player session state machine
//! - `events`: Updates delivered to players

pub mod board;
pub mod generator;
pub mod state;
pub mod events;

// Re-export key types
pub use board::{Board, BoardError, BoardSize, Grid};
pub use generator::{BoardGenerator, GenerationError, GeneratorConfig};
pub use state::{GameSession, GameStatus, PlayerId, SessionId, SessionPhase};
pub use events::{Update, UpdateKind};
