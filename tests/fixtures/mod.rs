//! Test fixtures for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use chess_matchmaker::amqp::publisher::MockEventPublisher;
use chess_matchmaker::config::MatchmakingSettings;
use chess_matchmaker::error::{MatchmakingError, Result};
use chess_matchmaker::queue::{MatchmakingEngine, QueueEntry};
use chess_matchmaker::storage::{
    GameRecord, GameRepository, GameStatus, InMemoryGameRepository, InMemoryQueueMirror,
    QueueMirror,
};
use chess_matchmaker::types::{
    ConnectionContext, GameId, JoinRequest, MatchFound, QueuedAck, RatingSnapshot, ServerEvent,
};
use std::sync::Arc;
use std::time::Duration;

/// A complete engine wired to in-memory storage and a recording publisher
pub struct TestSystem {
    pub engine: MatchmakingEngine,
    pub publisher: Arc<MockEventPublisher>,
    pub mirror: Arc<InMemoryQueueMirror>,
    pub games: Arc<InMemoryGameRepository>,
}

impl TestSystem {
    pub fn new(settings: MatchmakingSettings) -> Self {
        let publisher = Arc::new(MockEventPublisher::new());
        let mirror = Arc::new(InMemoryQueueMirror::new());
        let games = Arc::new(InMemoryGameRepository::new());
        let engine = MatchmakingEngine::new(
            settings,
            games.clone(),
            mirror.clone(),
            publisher.clone(),
        );

        Self {
            engine,
            publisher,
            mirror,
            games,
        }
    }

    /// Default production settings
    pub fn standard() -> Self {
        Self::new(MatchmakingSettings::default())
    }

    /// Default settings with a mirror whose entry writes take `delay`
    pub fn with_slow_mirror(delay: Duration) -> Self {
        let publisher = Arc::new(MockEventPublisher::new());
        let mirror = Arc::new(InMemoryQueueMirror::new());
        let games = Arc::new(InMemoryGameRepository::new());
        let engine = MatchmakingEngine::new(
            MatchmakingSettings::default(),
            games.clone(),
            Arc::new(SlowQueueMirror {
                inner: mirror.clone(),
                delay,
            }),
            publisher.clone(),
        );

        Self {
            engine,
            publisher,
            mirror,
            games,
        }
    }

    pub fn matches_for(&self, socket_id: &str) -> Vec<MatchFound> {
        self.publisher
            .events_for(socket_id)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::MatchFound(found) => Some(found),
                _ => None,
            })
            .collect()
    }

    pub fn acks_for(&self, socket_id: &str) -> Vec<QueuedAck> {
        self.publisher
            .events_for(socket_id)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::Joined(ack) => Some(ack),
                _ => None,
            })
            .collect()
    }

    pub fn error_codes_for(&self, socket_id: &str) -> Vec<String> {
        self.publisher
            .events_for(socket_id)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::GameError(report) => Some(report.code),
                _ => None,
            })
            .collect()
    }

    pub async fn game_status(&self, game_id: GameId) -> Option<GameStatus> {
        self.games
            .get_game(game_id)
            .await
            .ok()
            .flatten()
            .map(|game| game.status)
    }
}

pub fn join_request(user_id: &str, time_control: &str, rating: f64) -> JoinRequest {
    JoinRequest {
        user_id: user_id.to_string(),
        time_control: time_control.to_string(),
        rating: RatingSnapshot {
            rating,
            deviation: 60.0,
            volatility: 0.06,
        },
        latency_ms: 45.0,
        preferred_range: None,
        device_fingerprint: format!("device-{}", user_id),
    }
}

/// Socket id conventionally used for a test user
pub fn socket_of(user_id: &str) -> String {
    format!("sock-{}", user_id)
}

pub fn context_for(user_id: &str) -> ConnectionContext {
    ConnectionContext::authenticated(socket_of(user_id), user_id)
}

/// Game repository whose writes always fail
#[derive(Debug, Default)]
pub struct UnavailableGameRepository;

#[async_trait]
impl GameRepository for UnavailableGameRepository {
    async fn create_game(&self, game: GameRecord) -> Result<()> {
        Err(MatchmakingError::PersistenceFailed {
            message: format!("game store unavailable for {}", game.game_id),
        }
        .into())
    }

    async fn transition_status(
        &self,
        game_id: GameId,
        _from: GameStatus,
        _to: GameStatus,
    ) -> Result<bool> {
        Err(MatchmakingError::GameNotFound { game_id }.into())
    }

    async fn get_game(&self, _game_id: GameId) -> Result<Option<GameRecord>> {
        Ok(None)
    }
}

/// Mirror that stalls before persisting new entries
pub struct SlowQueueMirror {
    inner: Arc<InMemoryQueueMirror>,
    delay: Duration,
}

#[async_trait]
impl QueueMirror for SlowQueueMirror {
    async fn persist_entry(&self, entry: &QueueEntry) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.persist_entry(entry).await
    }

    async fn update_window(&self, entry: &QueueEntry) -> Result<()> {
        self.inner.update_window(entry).await
    }

    async fn remove_entries(&self, entries: &[QueueEntry]) -> Result<()> {
        self.inner.remove_entries(entries).await
    }

    async fn add_active_game(&self, game_id: GameId) -> Result<()> {
        self.inner.add_active_game(game_id).await
    }

    async fn remove_active_game(&self, game_id: GameId) -> Result<()> {
        self.inner.remove_active_game(game_id).await
    }
}
