//! # Sudoku Duel Server
//!
//! Two-player, turn-based Sudoku. Players are paired into sessions, take
//! turns filling cells of a generated puzzle, and whoever fills the last cell
//! wins. Clients pull state changes from a per-player update queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SUDOKU DUEL SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - Single-match logic (no locks, no I/O)     │
//! │  ├── board.rs    - Grid and placement rules                  │
//! │  ├── generator.rs- Backtracking puzzle generator             │
//! │  ├── state.rs    - Session state machine                     │
//! │  └── events.rs   - Updates pushed to players                 │
//! │                                                              │
//! │  network/        - Concurrency and transport                 │
//! │  ├── session.rs  - Matchmaking registry                      │
//! │  ├── updates.rs  - Per-player update queues                  │
//! │  ├── service.rs  - Transport-agnostic entry point            │
//! │  ├── protocol.rs - WebSocket message types                   │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Each session has its own lock and the registry lock is held only for
//! allocation and lookup, so unrelated games never wait on each other. Board
//! generation runs on the blocking pool outside every lock. Publishing an
//! update never waits on a consumer, and polling always returns within its
//! timeout.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use game::board::{Board, BoardSize, Grid};
pub use game::events::{Update, UpdateKind};
pub use game::state::{GameStatus, PlayerId};
pub use network::service::{ServiceConfig, ServiceError, SudokuService, DEFAULT_POLL_TIMEOUT};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
