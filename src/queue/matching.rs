//! Pair selection for a single time-control pool
//!
//! This module decides which two waiting players, if any, should be paired.
//! Selection is a full O(n²) scan of the pool snapshot; pools are small and the
//! ranking needs to see every candidate pair.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::queue::entry::QueueEntry;
use crate::utils::{rating_difference, ratings_within_tolerance};

/// Hard limits applied to every candidate pair
#[derive(Debug, Clone)]
pub struct PairingRules {
    /// Maximum rating difference allowed regardless of window size
    pub max_rating_gap: f64,
}

impl Default for PairingRules {
    fn default() -> Self {
        Self {
            max_rating_gap: 350.0,
        }
    }
}

/// Two compatible entries and the differences used to rank them
#[derive(Debug, Clone)]
pub struct MatchCandidatePair {
    pub a: QueueEntry,
    pub b: QueueEntry,
    pub rating_diff: f64,
    pub volatility_diff: f64,
    pub latency_diff: f64,
}

impl MatchCandidatePair {
    pub fn new(a: QueueEntry, b: QueueEntry) -> Self {
        Self {
            rating_diff: rating_difference(a.rating, b.rating),
            volatility_diff: (a.volatility - b.volatility).abs(),
            latency_diff: (a.latency_ms - b.latency_ms).abs(),
            a,
            b,
        }
    }

    pub fn earliest_join(&self) -> DateTime<Utc> {
        self.a.joined_at.min(self.b.joined_at)
    }

    /// Lexicographic ranking: closer ratings first, then volatility, then
    /// latency, then whoever has been waiting longest
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.rating_diff
            .total_cmp(&other.rating_diff)
            .then_with(|| self.volatility_diff.total_cmp(&other.volatility_diff))
            .then_with(|| self.latency_diff.total_cmp(&other.latency_diff))
            .then_with(|| self.earliest_join().cmp(&other.earliest_join()))
    }
}

/// Trait for pairing algorithms
pub trait PairMatcher: Send + Sync {
    /// Check whether two entries may be paired at all
    fn is_compatible(&self, a: &QueueEntry, b: &QueueEntry) -> bool;

    /// Pick the best pair from a pool snapshot, if any pair is compatible
    fn find_best_pair(&self, pool: &[QueueEntry]) -> Option<MatchCandidatePair>;
}

/// Matcher based on overlapping rating windows
///
/// Pairs are excluded when:
/// - either entry is on anti-cheat cooldown
/// - both entries belong to the same user
/// - the current windows do not overlap
/// - the rating gap exceeds the hard ceiling
#[derive(Debug, Clone, Default)]
pub struct WindowedPairMatcher {
    rules: PairingRules,
}

impl WindowedPairMatcher {
    pub fn new(rules: PairingRules) -> Self {
        Self { rules }
    }
}

impl PairMatcher for WindowedPairMatcher {
    fn is_compatible(&self, a: &QueueEntry, b: &QueueEntry) -> bool {
        if a.anti_cheat_on_cooldown || b.anti_cheat_on_cooldown {
            return false;
        }
        if a.user_id == b.user_id {
            return false;
        }
        if !a.windows_overlap(b) {
            return false;
        }
        ratings_within_tolerance(a.rating, b.rating, self.rules.max_rating_gap)
    }

    fn find_best_pair(&self, pool: &[QueueEntry]) -> Option<MatchCandidatePair> {
        if pool.len() < 2 {
            return None;
        }

        let mut best: Option<MatchCandidatePair> = None;
        for (i, a) in pool.iter().enumerate() {
            for b in &pool[i + 1..] {
                if !self.is_compatible(a, b) {
                    continue;
                }
                let candidate = MatchCandidatePair::new(a.clone(), b.clone());
                // Strict comparison keeps the first enumerated pair on an exact tie
                let better = best
                    .as_ref()
                    .map_or(true, |current| candidate.rank_cmp(current) == Ordering::Less);
                if better {
                    best = Some(candidate);
                }
            }
        }
        best
    }
}
