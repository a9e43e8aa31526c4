//! Tuning constants for the matchmaking engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Matchmaking-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Half-width of the rating window at join
    pub initial_window: f64,
    /// Amount added to the window on every expansion tick
    pub expansion_delta: f64,
    /// Delay between expansion ticks of one entry in milliseconds
    pub expansion_interval_ms: u64,
    /// Hard ceiling on the rating difference of a pair
    pub max_rating_gap: f64,
    /// Time a new game may wait for its first move before it is aborted
    pub abort_grace_period_seconds: u64,
    /// Position every new game starts from
    pub initial_fen: String,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            initial_window: 75.0,
            expansion_delta: 25.0,
            expansion_interval_ms: 3000,
            max_rating_gap: 350.0,
            abort_grace_period_seconds: 30,
            initial_fen: "startpos".to_string(),
        }
    }
}

impl MatchmakingSettings {
    pub fn expansion_interval(&self) -> Duration {
        Duration::from_millis(self.expansion_interval_ms)
    }

    pub fn abort_grace_period(&self) -> Duration {
        Duration::from_secs(self.abort_grace_period_seconds)
    }

    /// Settings with a short tick and grace period, used by tests
    pub fn fast() -> Self {
        Self {
            expansion_interval_ms: 100,
            abort_grace_period_seconds: 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        let settings = MatchmakingSettings::default();
        assert_eq!(settings.initial_window, 75.0);
        assert_eq!(settings.expansion_delta, 25.0);
        assert_eq!(settings.expansion_interval(), Duration::from_secs(3));
        assert_eq!(settings.max_rating_gap, 350.0);
        assert_eq!(settings.abort_grace_period(), Duration::from_secs(30));
        assert_eq!(settings.initial_fen, "startpos");
    }
}
