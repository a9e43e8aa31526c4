//! Main application state and service coordination
//!
//! `AppState` wires the matchmaking engine to the AMQP consumer and
//! publisher, runs the health server, and owns the background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::ClientEventConsumer;
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::metrics::health::{HealthServer, HealthServerConfig};
use crate::metrics::MetricsCollector;
use crate::queue::MatchmakingEngine;
use crate::service::dispatcher::ClientEventDispatcher;
use crate::service::health::HealthCheck;
use crate::storage::{InMemoryGameRepository, InMemoryQueueMirror};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    engine: MatchmakingEngine,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,

    /// Absent when the service runs without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,

    consumer: Mutex<Option<ClientEventConsumer>>,
    health_server: Mutex<Option<Arc<HealthServer>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Connect to the broker and assemble every component
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing chess matchmaking service");
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let amqp_connection = Self::initialize_amqp(&config).await?;

        let channel = amqp_connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange_name: config.amqp.exchange_name.clone(),
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Self::assemble(config, Arc::new(publisher), Some(amqp_connection))
    }

    /// Assemble the service around an existing publisher, without a broker
    pub fn with_publisher(
        config: AppConfig,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ServiceError> {
        Self::assemble(config, publisher, None)
    }

    fn assemble(
        config: AppConfig,
        publisher: Arc<dyn EventPublisher>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics = Arc::new(
            MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })?,
        );

        info!(
            "Matchmaking: window ±{} widening by {} every {}ms, max gap {}, grace {}s",
            config.matchmaking.initial_window,
            config.matchmaking.expansion_delta,
            config.matchmaking.expansion_interval_ms,
            config.matchmaking.max_rating_gap,
            config.matchmaking.abort_grace_period_seconds
        );

        let engine = MatchmakingEngine::with_metrics(
            config.matchmaking.clone(),
            Arc::new(InMemoryGameRepository::new()),
            Arc::new(InMemoryQueueMirror::new()),
            publisher.clone(),
            metrics.clone(),
        );

        Ok(Self {
            config,
            engine,
            publisher,
            metrics,
            amqp_connection,
            consumer: Mutex::new(None),
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health server, message consumption, and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting chess matchmaking service");

        *self.is_running.write().await = true;

        self.start_health_server().await;
        self.start_amqp_consumption().await?;
        self.start_background_tasks().await;

        info!("✅ Chess matchmaking service started successfully");
        Ok(())
    }

    /// Stop consuming, cancel timers and tasks, and close the broker connection
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of chess matchmaking service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.consumer.lock().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            }
        }

        self.stop_background_tasks().await;

        let final_stats = self.engine.stats().await;
        self.engine.shutdown().await;
        info!("Final service statistics: {:?}", final_stats);

        if let Some(connection) = &self.amqp_connection {
            connection
                .close()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to close AMQP connection: {}", e),
                })?;
        }

        info!("✅ Chess matchmaking service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn engine(&self) -> &MatchmakingEngine {
        &self.engine
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connect = AmqpConnection::new(amqp_config);
        let connection = tokio::time::timeout(config.amqp_connection_timeout(), connect)
            .await
            .map_err(|_| ServiceError::AmqpConnection {
                message: format!(
                    "Timed out after {:?} connecting to AMQP",
                    config.amqp_connection_timeout()
                ),
            })?
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;

        Ok(Arc::new(connection))
    }

    async fn start_health_server(self: &Arc<Self>) {
        let health_config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(health_config, self.metrics.clone()).with_app_state(self.clone()),
        );
        *self.health_server.lock().await = Some(server.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            }
        });
        self.background_tasks.lock().await.push(handle);

        info!(
            "✅ Health endpoints starting on port {}",
            self.config.service.health_port
        );
    }

    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            warn!("No broker connection; client events will not be consumed");
            return Ok(());
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let dispatcher = ClientEventDispatcher::new(self.engine.clone(), self.publisher.clone())
            .with_metrics(self.metrics.clone());
        let consumer = ClientEventConsumer::new(Arc::new(dispatcher), channel);

        let queue_name = &self.config.amqp.queue_name;
        consumer
            .start_consuming(queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        *self.consumer.lock().await = Some(consumer);

        info!("Listening for client events on queue '{}'", queue_name);
        Ok(())
    }

    async fn start_background_tasks(self: &Arc<Self>) {
        let stats_interval = self.config.stats_interval();
        info!(
            "Starting queue metrics task ({}s interval)...",
            stats_interval.as_secs()
        );
        let stats_task = {
            let engine = self.engine.clone();
            let metrics = self.metrics.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(stats_interval);

                while *is_running.read().await {
                    interval.tick().await;

                    let stats = engine.stats().await;
                    metrics.update_waiting(&stats.waiting_by_time_control);
                    debug!(
                        "Queue stats - waiting: {}, committed: {}, awaiting first move: {}",
                        stats.total_waiting, stats.matches_committed, stats.games_awaiting_first_move
                    );
                }

                info!("Queue metrics task stopped");
            })
        };

        info!("Starting health metrics task (60s interval)...");
        let health_task = {
            let app_state = self.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));

                while app_state.is_running().await {
                    interval.tick().await;

                    app_state.metrics.set_uptime(app_state.uptime());
                    match HealthCheck::check(app_state.clone()).await {
                        Ok(health) => {
                            app_state
                                .metrics
                                .update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                app_state.metrics.update_component_health(
                                    &check.name,
                                    check.status != crate::service::health::HealthStatus::Unhealthy,
                                );
                            }
                            info!(
                                "Health check: {} - {} waiting, {} games started",
                                health.status, health.stats.players_waiting, health.stats.games_started
                            );
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(stats_task);
        tasks.push(health_task);
        info!("{} background tasks running", tasks.len());
    }

    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.service.health_port = 0;
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.matchmaking.expansion_interval_ms = 0;

        let result = AppState::with_publisher(config, Arc::new(MockEventPublisher::new()));
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_start_and_shutdown_without_broker() {
        let state = Arc::new(
            AppState::with_publisher(test_config(), Arc::new(MockEventPublisher::new())).unwrap(),
        );
        assert!(!state.is_running().await);
        assert!(state.amqp_connection().is_none());

        state.start().await.unwrap();
        assert!(state.is_running().await);
        assert_eq!(state.background_tasks.lock().await.len(), 3);

        state.shutdown().await.unwrap();
        assert!(!state.is_running().await);
        assert!(state.background_tasks.lock().await.is_empty());
        assert_eq!(state.engine().waiting_count().await, 0);
    }
}
