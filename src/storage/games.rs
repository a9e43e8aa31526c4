//! Game record persistence
//!
//! The matchmaker only ever creates games and moves them out of
//! `WAITING_FOR_START`; everything after the first move belongs to other
//! services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{MatchmakingError, Result};
use crate::queue::entry::QueueEntry;
use crate::types::{GameId, TimeControl, UserId};
use crate::utils::current_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    WaitingForStart,
    InProgress,
    Aborted,
}

/// Snapshot of one player as seated in a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSeat {
    pub user_id: UserId,
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

impl From<&QueueEntry> for PlayerSeat {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            rating: entry.rating,
            deviation: entry.deviation,
            volatility: entry.volatility,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: GameId,
    pub time_control: TimeControl,
    pub white: PlayerSeat,
    pub black: PlayerSeat,
    pub initial_fen: String,
    pub status: GameStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub aborted_at: Option<DateTime<Utc>>,
}

impl GameRecord {
    pub fn new(
        game_id: GameId,
        time_control: TimeControl,
        white: PlayerSeat,
        black: PlayerSeat,
        initial_fen: String,
    ) -> Self {
        Self {
            game_id,
            time_control,
            white,
            black,
            initial_fen,
            status: GameStatus::WaitingForStart,
            created_at: current_timestamp(),
            started_at: None,
            aborted_at: None,
        }
    }
}

/// Trait for game record storage operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameRepository: Send + Sync {
    /// Persist a new game record
    async fn create_game(&self, game: GameRecord) -> Result<()>;

    /// Move a game from `from` to `to` if it is currently in `from`.
    ///
    /// Returns whether the transition happened. Unknown games are an error.
    async fn transition_status(&self, game_id: GameId, from: GameStatus, to: GameStatus)
        -> Result<bool>;

    async fn get_game(&self, game_id: GameId) -> Result<Option<GameRecord>>;
}

/// In-memory game repository implementation
#[derive(Debug, Default)]
pub struct InMemoryGameRepository {
    games: RwLock<HashMap<GameId, GameRecord>>,
}

impl InMemoryGameRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game_count(&self) -> Result<usize> {
        let games = self
            .games
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire games read lock".to_string(),
            })?;
        Ok(games.len())
    }
}

#[async_trait]
impl GameRepository for InMemoryGameRepository {
    async fn create_game(&self, game: GameRecord) -> Result<()> {
        let mut games = self
            .games
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire games write lock".to_string(),
            })?;
        if games.contains_key(&game.game_id) {
            return Err(MatchmakingError::PersistenceFailed {
                message: format!("Game {} already exists", game.game_id),
            }
            .into());
        }
        games.insert(game.game_id, game);
        Ok(())
    }

    async fn transition_status(
        &self,
        game_id: GameId,
        from: GameStatus,
        to: GameStatus,
    ) -> Result<bool> {
        let mut games = self
            .games
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire games write lock".to_string(),
            })?;
        let game = games
            .get_mut(&game_id)
            .ok_or(MatchmakingError::GameNotFound { game_id })?;

        if game.status != from {
            return Ok(false);
        }

        game.status = to;
        let now = current_timestamp();
        match to {
            GameStatus::InProgress => game.started_at = Some(now),
            GameStatus::Aborted => game.aborted_at = Some(now),
            GameStatus::WaitingForStart => {}
        }
        Ok(true)
    }

    async fn get_game(&self, game_id: GameId) -> Result<Option<GameRecord>> {
        let games = self
            .games
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire games read lock".to_string(),
            })?;
        Ok(games.get(&game_id).cloned())
    }
}
