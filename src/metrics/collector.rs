//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the chess matchmaker using
//! Prometheus metrics.

use crate::types::TimeControl;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Waiting-pool metrics
    queue_metrics: QueueMetrics,

    /// Match and game lifecycle metrics
    match_metrics: MatchMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total client events processed
    pub client_events_total: IntCounterVec,

    /// Client event processing errors
    pub client_event_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Waiting-pool metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Total accepted joins
    pub joins_total: IntCounterVec,

    /// Entries removed without a match, by reason
    pub removals_total: IntCounterVec,

    /// Expansion ticks applied
    pub expansion_ticks_total: IntCounterVec,

    /// Players currently waiting
    pub players_waiting: IntGaugeVec,

    /// Time from join to match
    pub queue_wait_time_seconds: HistogramVec,
}

/// Match and game lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Pairs committed into games
    pub matches_committed_total: IntCounterVec,

    /// Commits that failed to persist
    pub match_failures_total: IntCounterVec,

    /// Games that received their first move
    pub games_started_total: IntCounter,

    /// Games aborted for lack of a first move
    pub games_aborted_total: IntCounter,

    /// Rating difference of committed pairs
    pub pair_rating_diff: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Pool scan duration
    pub pairing_duration: Histogram,

    /// Client event handling duration
    pub event_processing_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record an accepted join
    pub fn record_join(&self, time_control: TimeControl) {
        self.queue_metrics
            .joins_total
            .with_label_values(&[time_control.as_str()])
            .inc();
    }

    /// Record entries dropped without a match ("leave", "disconnect", "rejoin")
    pub fn record_removal(&self, reason: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.queue_metrics
            .removals_total
            .with_label_values(&[reason])
            .inc_by(count as u64);
    }

    pub fn record_expansion_tick(&self, time_control: TimeControl) {
        self.queue_metrics
            .expansion_ticks_total
            .with_label_values(&[time_control.as_str()])
            .inc();
    }

    /// Record a committed pair and how long each side waited
    pub fn record_match(
        &self,
        time_control: TimeControl,
        rating_diff: f64,
        wait_times: [Duration; 2],
    ) {
        let label = time_control.as_str();
        self.match_metrics
            .matches_committed_total
            .with_label_values(&[label])
            .inc();
        self.match_metrics.pair_rating_diff.observe(rating_diff);
        for wait in wait_times {
            self.queue_metrics
                .queue_wait_time_seconds
                .with_label_values(&[label])
                .observe(wait.as_secs_f64());
        }
    }

    pub fn record_match_failure(&self, time_control: TimeControl) {
        self.match_metrics
            .match_failures_total
            .with_label_values(&[time_control.as_str()])
            .inc();
    }

    pub fn record_game_started(&self) {
        self.match_metrics.games_started_total.inc();
    }

    pub fn record_game_aborted(&self) {
        self.match_metrics.games_aborted_total.inc();
    }

    /// Record pool scan duration
    pub fn record_pairing(&self, duration: Duration) {
        self.performance_metrics
            .pairing_duration
            .observe(duration.as_secs_f64());
    }

    /// Refresh waiting gauges from a per-time-control count
    pub fn update_waiting(&self, waiting: &HashMap<TimeControl, usize>) {
        for time_control in TimeControl::ALL {
            let count = waiting.get(&time_control).copied().unwrap_or(0);
            self.queue_metrics
                .players_waiting
                .with_label_values(&[time_control.as_str()])
                .set(count as i64);
        }
    }

    /// Record a handled client event
    pub fn record_client_event(&self, event: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .client_events_total
            .with_label_values(&[event, status])
            .inc();

        if !success {
            self.service_metrics
                .client_event_errors_total
                .with_label_values(&[event])
                .inc();
        }

        self.performance_metrics
            .event_processing_duration
            .with_label_values(&[event])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    pub fn set_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new(
            "chess_matchmaker_uptime_seconds",
            "Service uptime in seconds",
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let client_events_total = IntCounterVec::new(
            Opts::new(
                "chess_matchmaker_client_events_total",
                "Total client events processed",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(client_events_total.clone()))?;

        let client_event_errors_total = IntCounterVec::new(
            Opts::new(
                "chess_matchmaker_client_event_errors_total",
                "Total client event errors",
            ),
            &["event"],
        )?;
        registry.register(Box::new(client_event_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "chess_matchmaker_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "chess_matchmaker_component_health",
                "Component health status",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            client_events_total,
            client_event_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("chess_matchmaker_joins_total", "Total accepted joins"),
            &["time_control"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let removals_total = IntCounterVec::new(
            Opts::new(
                "chess_matchmaker_queue_removals_total",
                "Queue entries removed without a match",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(removals_total.clone()))?;

        let expansion_ticks_total = IntCounterVec::new(
            Opts::new(
                "chess_matchmaker_expansion_ticks_total",
                "Rating window expansions applied",
            ),
            &["time_control"],
        )?;
        registry.register(Box::new(expansion_ticks_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "chess_matchmaker_players_waiting",
                "Players currently waiting in queue",
            ),
            &["time_control"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let queue_wait_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "chess_matchmaker_queue_wait_time_seconds",
                "Time from join to match",
            )
            .buckets(vec![1.0, 3.0, 6.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0]),
            &["time_control"],
        )?;
        registry.register(Box::new(queue_wait_time_seconds.clone()))?;

        Ok(Self {
            joins_total,
            removals_total,
            expansion_ticks_total,
            players_waiting,
            queue_wait_time_seconds,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_committed_total = IntCounterVec::new(
            Opts::new(
                "chess_matchmaker_matches_committed_total",
                "Pairs committed into games",
            ),
            &["time_control"],
        )?;
        registry.register(Box::new(matches_committed_total.clone()))?;

        let match_failures_total = IntCounterVec::new(
            Opts::new(
                "chess_matchmaker_match_failures_total",
                "Match commits that failed to persist",
            ),
            &["time_control"],
        )?;
        registry.register(Box::new(match_failures_total.clone()))?;

        let games_started_total = IntCounter::new(
            "chess_matchmaker_games_started_total",
            "Games that received their first move",
        )?;
        registry.register(Box::new(games_started_total.clone()))?;

        let games_aborted_total = IntCounter::new(
            "chess_matchmaker_games_aborted_total",
            "Games aborted before the first move",
        )?;
        registry.register(Box::new(games_aborted_total.clone()))?;

        let pair_rating_diff = Histogram::with_opts(
            HistogramOpts::new(
                "chess_matchmaker_pair_rating_diff",
                "Rating difference of committed pairs",
            )
            .buckets(vec![10.0, 25.0, 50.0, 75.0, 100.0, 150.0, 200.0, 275.0, 350.0]),
        )?;
        registry.register(Box::new(pair_rating_diff.clone()))?;

        Ok(Self {
            matches_committed_total,
            match_failures_total,
            games_started_total,
            games_aborted_total,
            pair_rating_diff,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "chess_matchmaker_pairing_duration_seconds",
                "Pool scan duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(pairing_duration.clone()))?;

        let event_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "chess_matchmaker_event_processing_duration_seconds",
                "Client event handling duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event"],
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        Ok(Self {
            pairing_duration,
            event_processing_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
