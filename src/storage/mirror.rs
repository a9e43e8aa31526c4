//! Durable side-store mirror of the waiting pools
//!
//! This module defines the interface for mirroring queue state outside the
//! process, with an in-memory implementation laid out the way the durable
//! store is: a per-time-control index sorted by join time, one record per
//! queue id, and the set of active game ids.
//!
//! The mirror is written after the store mutex is released and is only
//! eventually consistent with memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{MatchmakingError, Result};
use crate::queue::entry::QueueEntry;
use crate::types::{GameId, QueueId, TimeControl, UserId};

/// Mirrored state of one queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub user_id: UserId,
    pub time_control: TimeControl,
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
    pub latency_ms: f64,
    pub joined_at: DateTime<Utc>,
    pub base_window: f64,
    pub current_window: f64,
    pub expansion_step: u32,
}

impl From<&QueueEntry> for MirrorRecord {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            time_control: entry.time_control,
            rating: entry.rating,
            deviation: entry.deviation,
            volatility: entry.volatility,
            latency_ms: entry.latency_ms,
            joined_at: entry.joined_at,
            base_window: entry.base_window,
            current_window: entry.current_window,
            expansion_step: entry.expansion_step,
        }
    }
}

/// Trait for durable queue mirror operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueMirror: Send + Sync {
    /// Write a freshly added entry and index it by join time
    async fn persist_entry(&self, entry: &QueueEntry) -> Result<()>;

    /// Overwrite the window state of an existing entry
    async fn update_window(&self, entry: &QueueEntry) -> Result<()>;

    /// Drop entries from the index and delete their records
    async fn remove_entries(&self, entries: &[QueueEntry]) -> Result<()>;

    async fn add_active_game(&self, game_id: GameId) -> Result<()>;

    async fn remove_active_game(&self, game_id: GameId) -> Result<()>;
}

#[derive(Debug, Default)]
struct MirrorState {
    indexes: HashMap<TimeControl, BTreeSet<(i64, QueueId)>>,
    records: HashMap<QueueId, MirrorRecord>,
    active_games: HashSet<GameId>,
}

/// In-memory queue mirror implementation
#[derive(Debug, Default)]
pub struct InMemoryQueueMirror {
    state: RwLock<MirrorState>,
}

impl InMemoryQueueMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MirrorState>> {
        self.state.write().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire mirror write lock".to_string(),
            }
            .into()
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MirrorState>> {
        self.state.read().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire mirror read lock".to_string(),
            }
            .into()
        })
    }

    pub fn record(&self, queue_id: QueueId) -> Result<Option<MirrorRecord>> {
        Ok(self.read()?.records.get(&queue_id).cloned())
    }

    /// Queue ids of a time control, oldest join first
    pub fn indexed(&self, time_control: TimeControl) -> Result<Vec<QueueId>> {
        Ok(self
            .read()?
            .indexes
            .get(&time_control)
            .map(|index| index.iter().map(|(_, id)| *id).collect())
            .unwrap_or_default())
    }

    pub fn active_games(&self) -> Result<HashSet<GameId>> {
        Ok(self.read()?.active_games.clone())
    }

    pub fn record_count(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }
}

#[async_trait]
impl QueueMirror for InMemoryQueueMirror {
    async fn persist_entry(&self, entry: &QueueEntry) -> Result<()> {
        let mut state = self.write()?;
        state
            .indexes
            .entry(entry.time_control)
            .or_default()
            .insert((entry.joined_at.timestamp_millis(), entry.queue_id));
        state.records.insert(entry.queue_id, MirrorRecord::from(entry));
        Ok(())
    }

    async fn update_window(&self, entry: &QueueEntry) -> Result<()> {
        let mut state = self.write()?;
        match state.records.get_mut(&entry.queue_id) {
            Some(record) => {
                record.current_window = entry.current_window;
                record.expansion_step = entry.expansion_step;
                Ok(())
            }
            None => Err(MatchmakingError::QueueNotFound {
                queue_id: entry.queue_id,
            }
            .into()),
        }
    }

    async fn remove_entries(&self, entries: &[QueueEntry]) -> Result<()> {
        let mut state = self.write()?;
        for entry in entries {
            if let Some(index) = state.indexes.get_mut(&entry.time_control) {
                index.remove(&(entry.joined_at.timestamp_millis(), entry.queue_id));
            }
            state.records.remove(&entry.queue_id);
        }
        Ok(())
    }

    async fn add_active_game(&self, game_id: GameId) -> Result<()> {
        self.write()?.active_games.insert(game_id);
        Ok(())
    }

    async fn remove_active_game(&self, game_id: GameId) -> Result<()> {
        self.write()?.active_games.remove(&game_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JoinRequest, RatingSnapshot};

    fn entry(user: &str, tc: TimeControl) -> QueueEntry {
        let request = JoinRequest {
            user_id: user.to_string(),
            time_control: tc.to_string(),
            rating: RatingSnapshot {
                rating: 1500.0,
                deviation: 50.0,
                volatility: 0.06,
            },
            latency_ms: 30.0,
            preferred_range: None,
            device_fingerprint: String::new(),
        };
        QueueEntry::new(&request, tc, "s".to_string(), 75.0)
    }

    #[tokio::test]
    async fn test_persist_update_remove() {
        let mirror = InMemoryQueueMirror::new();
        let mut first = entry("alice", TimeControl::Blitz);
        let second = entry("bob", TimeControl::Blitz);
        first.joined_at = second.joined_at - chrono::Duration::seconds(3);

        mirror.persist_entry(&second).await.unwrap();
        mirror.persist_entry(&first).await.unwrap();
        assert_eq!(
            mirror.indexed(TimeControl::Blitz).unwrap(),
            vec![first.queue_id, second.queue_id]
        );

        first.expand(25.0);
        mirror.update_window(&first).await.unwrap();
        let record = mirror.record(first.queue_id).unwrap().unwrap();
        assert_eq!(record.current_window, 100.0);
        assert_eq!(record.expansion_step, 1);

        mirror
            .remove_entries(&[first.clone(), second.clone()])
            .await
            .unwrap();
        assert!(mirror.indexed(TimeControl::Blitz).unwrap().is_empty());
        assert_eq!(mirror.record_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_unknown_entry_fails() {
        let mirror = InMemoryQueueMirror::new();
        let missing = entry("ghost", TimeControl::Rapid);
        assert!(mirror.update_window(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_active_games() {
        let mirror = InMemoryQueueMirror::new();
        let game_id = uuid::Uuid::new_v4();
        mirror.add_active_game(game_id).await.unwrap();
        assert!(mirror.active_games().unwrap().contains(&game_id));
        mirror.remove_active_game(game_id).await.unwrap();
        assert!(mirror.active_games().unwrap().is_empty());
    }
}
