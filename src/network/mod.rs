//! Network Layer
//!
//! Concurrency and transport. `service` is the entry point every transport
//! calls; `server` is the WebSocket transport built on it.

pub mod protocol;
pub mod session;
pub mod updates;
pub mod service;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode};
pub use session::{RegistryError, Seated, SessionHandle, SessionRegistry};
pub use updates::{QueuePolicy, UpdateDistributor};
pub use service::{ConfigError, ServiceConfig, ServiceError, SudokuService, DEFAULT_POLL_TIMEOUT};
pub use server::{GameServer, ServerConfig, GameServerError};
