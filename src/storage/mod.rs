//! Persistence seams of the matchmaker
//!
//! This module defines the interfaces the engine writes through after releasing
//! the queue lock, along with in-memory implementations.

pub mod games;
pub mod mirror;

// Re-export commonly used types
pub use games::{GameRecord, GameRepository, GameStatus, InMemoryGameRepository, PlayerSeat};
pub use mirror::{InMemoryQueueMirror, MirrorRecord, QueueMirror};
