//! Health checks for the matchmaking service
//!
//! Readiness and liveness probes plus a detailed component report used by the
//! HTTP endpoints and the periodic health task.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How long the engine may take to report its stats before it counts as degraded
const ENGINE_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form exported through the health gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn combine(self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub players_waiting: usize,
    pub waiting_by_time_control: HashMap<String, usize>,
    pub matches_committed: u64,
    pub match_failures: u64,
    pub games_started: u64,
    pub games_aborted: u64,
    pub games_awaiting_first_move: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_engine(&app_state).await,
            Self::check_amqp_health(&app_state),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |overall, check| {
                overall.combine(&check.status)
            });

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let engine = Self::check_engine(&app_state).await.status;
        let amqp = Self::check_amqp_health(&app_state).status;
        Ok(engine.combine(&amqp))
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The engine is healthy while its store lock can be taken promptly
    async fn check_engine(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) =
            match tokio::time::timeout(ENGINE_PROBE_TIMEOUT, app_state.engine().stats()).await {
                Ok(_) => (HealthStatus::Healthy, None),
                Err(_) => {
                    warn!("Matchmaking engine did not answer within {:?}", ENGINE_PROBE_TIMEOUT);
                    (
                        HealthStatus::Degraded,
                        Some("Engine stats timed out".to_string()),
                    )
                }
            };

        ComponentCheck {
            name: "matchmaking_engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.amqp_connection() {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("Running without a broker connection".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let stats = app_state.engine().stats().await;

        ServiceStats {
            players_waiting: stats.total_waiting,
            waiting_by_time_control: stats
                .waiting_by_time_control
                .iter()
                .map(|(time_control, count)| (time_control.to_string(), *count))
                .collect(),
            matches_committed: stats.matches_committed,
            match_failures: stats.match_failures,
            games_started: stats.games_started,
            games_aborted: stats.games_aborted,
            games_awaiting_first_move: stats.games_awaiting_first_move,
            uptime_seconds: app_state.uptime().as_secs(),
        }
    }
}

impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::AppConfig;

    fn detached_state() -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.service.health_port = 0;
        Arc::new(AppState::with_publisher(config, Arc::new(MockEventPublisher::new())).unwrap())
    }

    #[test]
    fn test_status_combination() {
        assert_eq!(
            HealthStatus::Healthy.combine(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(&HealthStatus::Healthy),
            HealthStatus::Healthy
        );
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1);
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let state = detached_state();

        let health = HealthCheck::check(state.clone()).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(
            HealthCheck::liveness_check(state).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_running_without_broker_is_degraded() {
        let state = detached_state();
        state.start().await.unwrap();

        let health = HealthCheck::check(state.clone()).await.unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.stats.players_waiting, 0);
        assert!(health.to_json().unwrap().contains("amqp_connection"));
        assert_eq!(
            HealthCheck::readiness_check(state.clone()).await.unwrap(),
            HealthStatus::Degraded
        );

        state.shutdown().await.unwrap();
        assert!(!state.is_running().await);
    }
}
