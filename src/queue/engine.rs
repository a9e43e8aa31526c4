//! Matchmaking engine
//!
//! The engine owns the queue store and is the only writer to it. Every
//! mutation takes the store mutex; mirror writes, game persistence, and
//! outbound notifications happen after the mutex is released.
//!
//! Flow of a search:
//! join → store add → mirror → expansion timer → pairing attempt
//! → (each tick) widen window → notify → mirror → pairing attempt → reschedule
//! → (pair found) claim both entries → finalizer commit

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::amqp::publisher::EventPublisher;
use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::queue::entry::QueueEntry;
use crate::queue::finalizer::{MatchFinalizer, MoveOutcome};
use crate::queue::matching::{PairMatcher, PairingRules, WindowedPairMatcher};
use crate::queue::scheduler::ExpansionScheduler;
use crate::queue::store::QueueStore;
use crate::storage::{GameRepository, QueueMirror};
use crate::types::{
    ConnectionContext, GameId, JoinRequest, LeaveRequest, MoveSubmitted, QueueId, QueueUpdate,
    QueuedAck, ResumeRequest, ServerEvent, TimeControl,
};

/// Counters exposed through `/stats` and the metrics task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub waiting_by_time_control: HashMap<TimeControl, usize>,
    pub total_waiting: usize,
    pub joins: u64,
    pub removals: u64,
    pub matches_committed: u64,
    pub match_failures: u64,
    pub games_started: u64,
    pub games_aborted: u64,
    pub games_awaiting_first_move: usize,
}

struct EngineInner {
    store: Mutex<QueueStore>,
    matcher: Box<dyn PairMatcher>,
    scheduler: ExpansionScheduler,
    finalizer: Arc<MatchFinalizer>,
    mirror: Arc<dyn QueueMirror>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Option<Arc<MetricsCollector>>,
    stats: Arc<RwLock<EngineStats>>,
    settings: MatchmakingSettings,
}

/// Real-time matchmaking engine
#[derive(Clone)]
pub struct MatchmakingEngine {
    inner: Arc<EngineInner>,
}

impl MatchmakingEngine {
    pub fn new(
        settings: MatchmakingSettings,
        games: Arc<dyn GameRepository>,
        mirror: Arc<dyn QueueMirror>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self::build(settings, games, mirror, publisher, None)
    }

    pub fn with_metrics(
        settings: MatchmakingSettings,
        games: Arc<dyn GameRepository>,
        mirror: Arc<dyn QueueMirror>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::build(settings, games, mirror, publisher, Some(metrics))
    }

    fn build(
        settings: MatchmakingSettings,
        games: Arc<dyn GameRepository>,
        mirror: Arc<dyn QueueMirror>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let finalizer = Arc::new(MatchFinalizer::new(
            games,
            mirror.clone(),
            publisher.clone(),
            metrics.clone(),
            stats.clone(),
            settings.initial_fen.clone(),
            settings.abort_grace_period(),
        ));
        let matcher = WindowedPairMatcher::new(PairingRules {
            max_rating_gap: settings.max_rating_gap,
        });

        Self {
            inner: Arc::new(EngineInner {
                store: Mutex::new(QueueStore::new()),
                matcher: Box::new(matcher),
                scheduler: ExpansionScheduler::new(settings.expansion_interval()),
                finalizer,
                mirror,
                publisher,
                metrics,
                stats,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.inner.settings
    }

    /// Enter a time-control pool.
    ///
    /// Any earlier entry of the same user is evicted first. The `queue.joined`
    /// acknowledgement is published to the joining connection before the first
    /// pairing attempt, so a match found right away always follows it.
    pub async fn join(&self, ctx: &ConnectionContext, request: JoinRequest) -> Result<QueuedAck> {
        let time_control = request.validate()?;
        if let Some(authenticated) = &ctx.authenticated_user_id {
            if authenticated != &request.user_id {
                warn!(
                    "Join for user {} rejected on connection authenticated as {}",
                    request.user_id, authenticated
                );
                return Err(MatchmakingError::Unauthorized {
                    reason: "userId does not match the authenticated identity".to_string(),
                }
                .into());
            }
        }

        let entry = QueueEntry::new(
            &request,
            time_control,
            ctx.socket_id.clone(),
            self.inner.settings.initial_window,
        );
        let queue_id = entry.queue_id;

        let evicted = {
            let mut store = self.inner.store.lock().await;
            let evicted = store.remove_by_user(&entry.user_id);
            store.add(entry.clone())?;
            let timer = self.spawn_expansion_timer(queue_id);
            store.attach_timer(queue_id, timer);
            evicted
        };

        if !evicted.is_empty() {
            info!(
                "User {} re-joined; evicted {} earlier queue entr{}",
                entry.user_id,
                evicted.len(),
                if evicted.len() == 1 { "y" } else { "ies" }
            );
            if let Err(e) = self.inner.mirror.remove_entries(&evicted).await {
                warn!("Failed to remove evicted entries from mirror: {}", e);
            }
        }
        if let Err(e) = self.inner.mirror.persist_entry(&entry).await {
            warn!("Failed to mirror queue entry {}: {}", queue_id, e);
        }
        self.discard_mirror_if_claimed(&entry).await;

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_join(time_control);
            metrics.record_removal("rejoin", evicted.len());
        }
        if let Ok(mut stats) = self.inner.stats.write() {
            stats.joins += 1;
            stats.removals += evicted.len() as u64;
        }

        info!(
            "User {} joined {} queue as {} (rating {}, window ±{})",
            entry.user_id, time_control, queue_id, entry.rating, entry.current_window
        );

        let ack = QueuedAck {
            queue_id,
            rating_range: entry.rating_range(),
            next_expansion_in_ms: self.inner.scheduler.interval_ms(),
        };
        self.notify(&ctx.socket_id, ServerEvent::Joined(ack.clone()))
            .await;

        if let Err(e) = self.try_match(time_control).await {
            warn!("Pairing after join of {} failed: {}", queue_id, e);
        }

        Ok(ack)
    }

    /// Withdraw an entry owned by the requesting connection
    pub async fn leave(&self, ctx: &ConnectionContext, request: LeaveRequest) -> Result<QueueEntry> {
        let queue_id = request.queue_id;
        let removed = {
            let mut store = self.inner.store.lock().await;
            let entry = store
                .find_by_id(queue_id)
                .ok_or(MatchmakingError::QueueNotFound { queue_id })?;
            if !owns(ctx, entry) {
                warn!(
                    "Connection {} tried to leave queue entry {} it does not own",
                    ctx.socket_id, queue_id
                );
                return Err(MatchmakingError::QueueNotOwned { queue_id }.into());
            }
            store
                .remove_by_id(queue_id)
                .ok_or(MatchmakingError::QueueNotFound { queue_id })?
        };

        if let Err(e) = self
            .inner
            .mirror
            .remove_entries(std::slice::from_ref(&removed))
            .await
        {
            warn!("Failed to remove queue entry {} from mirror: {}", queue_id, e);
        }
        self.record_removals("leave", 1);

        info!(
            "User {} left {} queue ({})",
            removed.user_id, removed.time_control, queue_id
        );
        Ok(removed)
    }

    /// Re-point an existing entry at a new connection
    pub async fn resume(&self, ctx: &ConnectionContext, request: ResumeRequest) -> Result<QueuedAck> {
        let queue_id = request.queue_id;
        let identity = ctx
            .authenticated_user_id
            .clone()
            .or(request.user_id)
            .ok_or_else(|| MatchmakingError::Unauthorized {
                reason: "queue.resume requires a user identity".to_string(),
            })?;

        let (ack, previous_socket) = {
            let mut store = self.inner.store.lock().await;
            let entry = store
                .find_by_id(queue_id)
                .ok_or(MatchmakingError::QueueNotFound { queue_id })?;
            if entry.user_id != identity {
                return Err(MatchmakingError::QueueNotOwned { queue_id }.into());
            }
            let ack = QueuedAck {
                queue_id,
                rating_range: entry.rating_range(),
                next_expansion_in_ms: self.inner.scheduler.interval_ms(),
            };
            let previous_socket = store.reassign_socket(queue_id, ctx.socket_id.clone());
            (ack, previous_socket)
        };

        info!(
            "Queue entry {} resumed on connection {} (was {:?})",
            queue_id, ctx.socket_id, previous_socket
        );
        self.notify(&ctx.socket_id, ServerEvent::Joined(ack.clone()))
            .await;
        Ok(ack)
    }

    /// Drop every entry held by a closed connection
    pub async fn disconnect(&self, ctx: &ConnectionContext) -> Vec<QueueEntry> {
        let removed = {
            let mut store = self.inner.store.lock().await;
            store.remove_by_socket(&ctx.socket_id)
        };

        if !removed.is_empty() {
            if let Err(e) = self.inner.mirror.remove_entries(&removed).await {
                warn!("Failed to remove disconnected entries from mirror: {}", e);
            }
            self.record_removals("disconnect", removed.len());
            info!(
                "Connection {} closed; removed {} queue entries",
                ctx.socket_id,
                removed.len()
            );
        }
        removed
    }

    /// Forward a first move to the abort watch
    pub async fn handle_move(
        &self,
        ctx: &ConnectionContext,
        submitted: MoveSubmitted,
    ) -> Result<MoveOutcome> {
        self.inner.finalizer.handle_move(ctx, &submitted).await
    }

    /// Search one pool for the best pair and commit it.
    ///
    /// Both entries are claimed out of the store under the mutex, so no other
    /// attempt can see them once a pair is selected.
    pub async fn try_match(&self, time_control: TimeControl) -> Result<Option<GameId>> {
        let pair = {
            let mut store = self.inner.store.lock().await;
            let pool = store.pool_for(time_control);
            if pool.len() < 2 {
                return Ok(None);
            }

            let started = std::time::Instant::now();
            let pair = self.inner.matcher.find_best_pair(&pool);
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_pairing(started.elapsed());
            }

            let Some(pair) = pair else {
                debug!(
                    "No compatible pair among {} waiting in {}",
                    pool.len(),
                    time_control
                );
                return Ok(None);
            };
            store.remove_by_id(pair.a.queue_id);
            store.remove_by_id(pair.b.queue_id);
            pair
        };

        info!(
            "Paired {} ({}) with {} ({}) in {}",
            pair.a.user_id, pair.a.rating, pair.b.user_id, pair.b.rating, time_control
        );
        let game_id = self.inner.finalizer.commit(pair).await?;
        Ok(Some(game_id))
    }

    pub async fn find_entry(&self, queue_id: QueueId) -> Option<QueueEntry> {
        self.inner.store.lock().await.find_by_id(queue_id).cloned()
    }

    pub async fn waiting_count(&self) -> usize {
        self.inner.store.lock().await.len()
    }

    pub async fn stats(&self) -> EngineStats {
        let waiting = self.inner.store.lock().await.waiting_by_time_control();
        let mut stats = self
            .inner
            .stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default();
        stats.total_waiting = waiting.values().sum();
        stats.waiting_by_time_control = waiting;
        stats.games_awaiting_first_move = self.inner.finalizer.pending_watch_count();
        stats
    }

    /// Cancel every timer and empty the pools
    pub async fn shutdown(&self) {
        let dropped = self.inner.store.lock().await.clear();
        self.inner.finalizer.shutdown();
        info!("Matchmaking engine stopped; dropped {} waiting entries", dropped.len());
    }

    fn spawn_expansion_timer(&self, queue_id: QueueId) -> AbortHandle {
        let engine = self.clone();
        self.inner
            .scheduler
            .schedule(queue_id, move |id| engine.expansion_tick(id))
    }

    // Boxed so the timer task and the tick that reschedules it have a nameable type
    fn expansion_tick(self, queue_id: QueueId) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { self.handle_expansion_tick(queue_id).await })
    }

    async fn handle_expansion_tick(&self, queue_id: QueueId) {
        let entry = {
            let mut store = self.inner.store.lock().await;
            // Detach our own handle so a removal during this tick cannot abort us
            store.take_timer(queue_id);
            match store.get_mut(queue_id) {
                Some(entry) => {
                    entry.expand(self.inner.settings.expansion_delta);
                    entry.clone()
                }
                None => return,
            }
        };

        debug!(
            "Expanded {} to ±{} (step {})",
            queue_id, entry.current_window, entry.expansion_step
        );

        let update = QueueUpdate {
            queue_id,
            rating_range: entry.rating_range(),
            elapsed_ms: entry.elapsed_ms(),
        };
        self.notify(&entry.socket_id, ServerEvent::Update(update))
            .await;

        if let Err(e) = self.inner.mirror.update_window(&entry).await {
            warn!("Failed to mirror window of {}: {}", queue_id, e);
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_expansion_tick(entry.time_control);
        }

        if let Err(e) = self.try_match(entry.time_control).await {
            warn!("Pairing on tick of {} failed: {}", queue_id, e);
        }

        let mut store = self.inner.store.lock().await;
        if store.find_by_id(queue_id).is_some() && !store.has_timer(queue_id) {
            let timer = self.spawn_expansion_timer(queue_id);
            store.attach_timer(queue_id, timer);
        }
    }

    /// Undo a mirror write that landed after the entry already left the store.
    ///
    /// Queue ids are never reused, so an entry missing from the store once the
    /// write has returned stays missing, and whoever removed it may have cleaned
    /// the mirror before our record arrived.
    async fn discard_mirror_if_claimed(&self, entry: &QueueEntry) {
        let still_queued = self
            .inner
            .store
            .lock()
            .await
            .find_by_id(entry.queue_id)
            .is_some();
        if still_queued {
            return;
        }

        debug!(
            "Queue entry {} left the store while being mirrored; removing record",
            entry.queue_id
        );
        if let Err(e) = self
            .inner
            .mirror
            .remove_entries(std::slice::from_ref(entry))
            .await
        {
            warn!(
                "Failed to remove claimed entry {} from mirror: {}",
                entry.queue_id, e
            );
        }
    }

    async fn notify(&self, socket_id: &str, event: ServerEvent) {
        let name = event.name();
        if let Err(e) = self.inner.publisher.publish(socket_id, event).await {
            warn!("Failed to deliver {} to {}: {}", name, socket_id, e);
        }
    }

    fn record_removals(&self, reason: &str, count: usize) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_removal(reason, count);
        }
        if let Ok(mut stats) = self.inner.stats.write() {
            stats.removals += count as u64;
        }
    }
}

/// A connection owns an entry it created, or any entry of its authenticated user
fn owns(ctx: &ConnectionContext, entry: &QueueEntry) -> bool {
    entry.socket_id == ctx.socket_id
        || ctx
            .authenticated_user_id
            .as_deref()
            .is_some_and(|user| user == entry.user_id)
}
