//! A single player's active search

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JoinRequest, OpponentInfo, QueueId, RatingRange, SocketId, TimeControl, UserId};
use crate::utils::{current_timestamp, elapsed_ms_since, generate_queue_id};

/// One waiting player in a time-control pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: QueueId,
    pub user_id: UserId,
    pub socket_id: SocketId,
    pub time_control: TimeControl,
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
    pub latency_ms: f64,
    pub joined_at: DateTime<Utc>,
    pub base_window: f64,
    pub current_window: f64,
    pub expansion_step: u32,
    /// Set by anti-cheat tooling; the engine only reads it
    pub anti_cheat_on_cooldown: bool,
}

impl QueueEntry {
    /// Build an entry from an already validated join request
    pub fn new(
        request: &JoinRequest,
        time_control: TimeControl,
        socket_id: SocketId,
        default_window: f64,
    ) -> Self {
        let base_window = request.preferred_range.unwrap_or(default_window);
        Self {
            queue_id: generate_queue_id(),
            user_id: request.user_id.clone(),
            socket_id,
            time_control,
            rating: request.rating.rating,
            deviation: request.rating.deviation,
            volatility: request.rating.volatility,
            latency_ms: request.latency_ms,
            joined_at: current_timestamp(),
            base_window,
            current_window: base_window,
            expansion_step: 0,
            anti_cheat_on_cooldown: false,
        }
    }

    pub fn rating_range(&self) -> RatingRange {
        RatingRange::around(self.rating, self.current_window)
    }

    /// Advance one expansion step. The window never shrinks.
    pub fn expand(&mut self, delta: f64) {
        self.expansion_step = self.expansion_step.saturating_add(1);
        let widened = self.base_window + f64::from(self.expansion_step) * delta;
        self.current_window = self.current_window.max(widened);
    }

    pub fn elapsed_ms(&self) -> u64 {
        elapsed_ms_since(self.joined_at)
    }

    /// What the other side of a match gets to see about this player
    pub fn public_profile(&self) -> OpponentInfo {
        OpponentInfo {
            user_id: self.user_id.clone(),
            rating: self.rating,
            latency_ms: self.latency_ms,
        }
    }

    pub fn windows_overlap(&self, other: &QueueEntry) -> bool {
        self.rating_range().overlaps(&other.rating_range())
    }
}
