//! Waiting pools and the matchmaking engine
//!
//! This module holds the queue store, the expansion timers, pair selection,
//! and the finalizer that turns pairs into games.

pub mod engine;
pub mod entry;
pub mod finalizer;
pub mod matching;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use engine::{EngineStats, MatchmakingEngine};
pub use entry::QueueEntry;
pub use finalizer::{MatchFinalizer, MoveOutcome};
pub use matching::{MatchCandidatePair, PairMatcher, PairingRules, WindowedPairMatcher};
pub use scheduler::ExpansionScheduler;
pub use store::QueueStore;
