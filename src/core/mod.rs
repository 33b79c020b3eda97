//! Core deterministic primitives.
//!
//! Every random decision the server makes goes through [`DeterministicRng`],
//! so a fixed seed reproduces every generated board.

pub mod rng;

// Re-export core types
pub use rng::{derive_board_seed, entropy_seed, DeterministicRng};
