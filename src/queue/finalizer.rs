//! Turning a selected pair into a game
//!
//! The finalizer runs after both entries have already been claimed out of the
//! store. It persists the game, tells both players, and owns the abort watch
//! that cancels games nobody starts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::queue::engine::EngineStats;
use crate::queue::entry::QueueEntry;
use crate::queue::matching::MatchCandidatePair;
use crate::storage::{GameRecord, GameRepository, GameStatus, PlayerSeat, QueueMirror};
use crate::types::{
    ConnectionContext, GameAborted, GameError, GameId, MatchFound, MoveSubmitted, ServerEvent,
    SocketId, UserId,
};
use crate::utils::generate_game_id;

/// Reason sent with `game:aborted`
pub const ABORT_REASON: &str = "Players did not start the game within the grace period";

/// Pending abort timer of a freshly created game
#[derive(Debug)]
struct AbortWatch {
    handle: AbortHandle,
    players: [(UserId, SocketId); 2],
}

/// Result of a submitted first move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move started the game
    Started,
    /// The game was already running
    AlreadyStarted,
    /// The abort watch won the race
    TooLate,
}

pub struct MatchFinalizer {
    games: Arc<dyn GameRepository>,
    mirror: Arc<dyn QueueMirror>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Option<Arc<MetricsCollector>>,
    stats: Arc<RwLock<EngineStats>>,
    initial_fen: String,
    grace_period: Duration,
    watches: Mutex<HashMap<GameId, AbortWatch>>,
}

impl MatchFinalizer {
    pub fn new(
        games: Arc<dyn GameRepository>,
        mirror: Arc<dyn QueueMirror>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Option<Arc<MetricsCollector>>,
        stats: Arc<RwLock<EngineStats>>,
        initial_fen: String,
        grace_period: Duration,
    ) -> Self {
        Self {
            games,
            mirror,
            publisher,
            metrics,
            stats,
            initial_fen,
            grace_period,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a game for a claimed pair and notify both players.
    ///
    /// Both entries must already be out of the store. A persistence failure
    /// ends this match only; both players receive `MATCH_FAILED`.
    pub async fn commit(self: &Arc<Self>, pair: MatchCandidatePair) -> Result<GameId> {
        let MatchCandidatePair {
            a, b, rating_diff, ..
        } = pair;
        let time_control = a.time_control;

        if let Err(e) = self.mirror.remove_entries(&[a.clone(), b.clone()]).await {
            warn!(
                "Failed to remove matched entries {} and {} from mirror: {}",
                a.queue_id, b.queue_id, e
            );
        }

        let game_id = generate_game_id();
        let (white, black) = if rand::random::<bool>() {
            (&a, &b)
        } else {
            (&b, &a)
        };

        let record = GameRecord::new(
            game_id,
            time_control,
            PlayerSeat::from(white),
            PlayerSeat::from(black),
            self.initial_fen.clone(),
        );

        if let Err(e) = self.games.create_game(record).await {
            error!(
                "Failed to persist game {} for {} vs {}: {}",
                game_id, a.user_id, b.user_id, e
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_match_failure(time_control);
            }
            if let Ok(mut stats) = self.stats.write() {
                stats.match_failures += 1;
            }

            let failure = GameError::new("MATCH_FAILED", "Failed to create game, please rejoin");
            for entry in [&a, &b] {
                self.notify(&entry.socket_id, ServerEvent::GameError(failure.clone()))
                    .await;
            }

            return Err(MatchmakingError::PersistenceFailed {
                message: e.to_string(),
            }
            .into());
        }

        if let Err(e) = self.mirror.add_active_game(game_id).await {
            warn!("Failed to register active game {}: {}", game_id, e);
        }

        info!(
            "Match committed: game {} ({}) white={} black={} rating_diff={}",
            game_id, time_control, white.user_id, black.user_id, rating_diff
        );

        for (me, opponent) in [(&a, &b), (&b, &a)] {
            let found = MatchFound {
                queue_id: me.queue_id,
                game_id,
                initial_fen: self.initial_fen.clone(),
                opponent: opponent.public_profile(),
                time_control,
            };
            self.notify(&me.socket_id, ServerEvent::MatchFound(found))
                .await;
        }

        self.start_abort_watch(game_id, &a, &b)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_match(
                time_control,
                rating_diff,
                [wait_time(&a), wait_time(&b)],
            );
        }
        if let Ok(mut stats) = self.stats.write() {
            stats.matches_committed += 1;
        }

        Ok(game_id)
    }

    /// Cancel the abort watch of a game on its first move and mark it started
    pub async fn handle_move(
        &self,
        ctx: &ConnectionContext,
        submitted: &MoveSubmitted,
    ) -> Result<MoveOutcome> {
        let game_id = submitted.game_id;

        let watch = {
            let mut watches = self.lock_watches()?;
            if let (Some(watch), Some(user)) =
                (watches.get(&game_id), ctx.authenticated_user_id.as_ref())
            {
                if !watch.players.iter().any(|(player, _)| player == user) {
                    return Err(MatchmakingError::Unauthorized {
                        reason: format!("User {} is not seated in game {}", user, game_id),
                    }
                    .into());
                }
            }
            watches.remove(&game_id)
        };
        if let Some(watch) = watch {
            watch.handle.abort();
            debug!("Abort watch cancelled for game {}", game_id);
        }

        let started = self
            .games
            .transition_status(game_id, GameStatus::WaitingForStart, GameStatus::InProgress)
            .await?;

        if started {
            info!(
                "Game {} started by move {} ({})",
                game_id, submitted.san, submitted.client_move_id
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_game_started();
            }
            if let Ok(mut stats) = self.stats.write() {
                stats.games_started += 1;
            }
            return Ok(MoveOutcome::Started);
        }

        let status = self
            .games
            .get_game(game_id)
            .await?
            .map(|game| game.status)
            .ok_or(MatchmakingError::GameNotFound { game_id })?;

        match status {
            GameStatus::Aborted => {
                debug!("Move for game {} arrived after abort", game_id);
                Ok(MoveOutcome::TooLate)
            }
            _ => Ok(MoveOutcome::AlreadyStarted),
        }
    }

    /// Number of games still waiting for their first move
    pub fn pending_watch_count(&self) -> usize {
        self.watches.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Abort every pending watch
    pub fn shutdown(&self) {
        if let Ok(mut watches) = self.watches.lock() {
            for (_, watch) in watches.drain() {
                watch.handle.abort();
            }
        }
    }

    fn start_abort_watch(
        self: &Arc<Self>,
        game_id: GameId,
        a: &QueueEntry,
        b: &QueueEntry,
    ) -> Result<()> {
        let players = [
            (a.user_id.clone(), a.socket_id.clone()),
            (b.user_id.clone(), b.socket_id.clone()),
        ];

        // Registry lock is held across spawn so the watch is visible before it can fire
        let mut watches = self.lock_watches()?;
        let finalizer = Arc::clone(self);
        let grace_period = self.grace_period;
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            finalizer.fire_abort_watch(game_id).await;
        });
        watches.insert(
            game_id,
            AbortWatch {
                handle: task.abort_handle(),
                players,
            },
        );
        Ok(())
    }

    async fn fire_abort_watch(&self, game_id: GameId) {
        let watch = match self.lock_watches() {
            Ok(mut watches) => watches.remove(&game_id),
            Err(e) => {
                error!("Abort watch for game {} could not run: {}", game_id, e);
                return;
            }
        };
        // A first move already claimed this game
        let Some(watch) = watch else {
            return;
        };

        match self
            .games
            .transition_status(game_id, GameStatus::WaitingForStart, GameStatus::Aborted)
            .await
        {
            Ok(true) => {
                info!("Game {} aborted: no move within {:?}", game_id, self.grace_period);
                let aborted = GameAborted {
                    game_id,
                    reason: ABORT_REASON.to_string(),
                };
                for (_, socket_id) in &watch.players {
                    self.notify(socket_id, ServerEvent::GameAborted(aborted.clone()))
                        .await;
                }
                if let Err(e) = self.mirror.remove_active_game(game_id).await {
                    warn!("Failed to unregister aborted game {}: {}", game_id, e);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_game_aborted();
                }
                if let Ok(mut stats) = self.stats.write() {
                    stats.games_aborted += 1;
                }
            }
            Ok(false) => debug!("Game {} left WAITING_FOR_START before abort", game_id),
            Err(e) => error!("Failed to abort game {}: {}", game_id, e),
        }
    }

    async fn notify(&self, socket_id: &str, event: ServerEvent) {
        let name = event.name();
        if let Err(e) = self.publisher.publish(socket_id, event).await {
            warn!("Failed to deliver {} to {}: {}", name, socket_id, e);
        }
    }

    fn lock_watches(&self) -> Result<std::sync::MutexGuard<'_, HashMap<GameId, AbortWatch>>> {
        self.watches.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire abort watch lock".to_string(),
            }
            .into()
        })
    }
}

fn wait_time(entry: &QueueEntry) -> Duration {
    Duration::from_millis(entry.elapsed_ms())
}
