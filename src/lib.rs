//! Chess Matchmaker - real-time matchmaking for rated chess games
//!
//! Players join a pool per time control with a rating window that widens on
//! a timer. Compatible pairs are committed as games, announced to both
//! players, and aborted when nobody moves within the grace period. Client
//! events arrive over AMQP and replies are published back the same way.

pub mod amqp;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{error_code, MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use queue::{MatchmakingEngine, MoveOutcome};
pub use storage::{GameRepository, QueueMirror};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
