//! Routes decoded client events into the matchmaking engine
//!
//! Engine failures are turned into `game:error` events addressed to the
//! originating connection. The engine publishes its own acknowledgements and
//! match notifications, so successful requests publish nothing here.

use crate::amqp::handlers::MessageHandler;
use crate::amqp::messages::ClientEnvelope;
use crate::amqp::publisher::EventPublisher;
use crate::error::{error_code, Result};
use crate::metrics::MetricsCollector;
use crate::queue::{MatchmakingEngine, MoveOutcome};
use crate::types::{ClientEvent, ConnectionContext, GameError, ServerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Message handler backed by the matchmaking engine
pub struct ClientEventDispatcher {
    engine: MatchmakingEngine,
    publisher: Arc<dyn EventPublisher>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ClientEventDispatcher {
    pub fn new(engine: MatchmakingEngine, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            engine,
            publisher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn dispatch(&self, ctx: &ConnectionContext, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::Join(request) => {
                let user_id = request.user_id.clone();
                if let Err(e) = self.engine.join(ctx, request).await {
                    warn!("Join for user {} failed: {}", user_id, e);
                    self.report(ctx, GameError::new(error_code(&e), e.to_string()))
                        .await;
                    return Err(e);
                }
            }
            ClientEvent::Leave(request) => {
                if let Err(e) = self.engine.leave(ctx, request).await {
                    debug!("Leave from {} rejected: {}", ctx.socket_id, e);
                    self.report(ctx, GameError::new(error_code(&e), e.to_string()))
                        .await;
                    return Err(e);
                }
            }
            ClientEvent::Resume(request) => {
                if let Err(e) = self.engine.resume(ctx, request).await {
                    warn!("Resume on {} rejected: {}", ctx.socket_id, e);
                    self.report(ctx, GameError::new(error_code(&e), e.to_string()))
                        .await;
                    return Err(e);
                }
            }
            ClientEvent::Move(submitted) => {
                let game_id = submitted.game_id;
                match self.engine.handle_move(ctx, submitted).await {
                    Ok(MoveOutcome::Started) => info!("Game {} started", game_id),
                    Ok(MoveOutcome::AlreadyStarted) => {}
                    Ok(MoveOutcome::TooLate) => {
                        debug!("Move for game {} arrived after the abort", game_id)
                    }
                    Err(e) => {
                        warn!("Move for game {} rejected: {}", game_id, e);
                        let report =
                            GameError::new(error_code(&e), e.to_string()).for_game(game_id);
                        self.report(ctx, report).await;
                        return Err(e);
                    }
                }
            }
            ClientEvent::Disconnect => {
                self.engine.disconnect(ctx).await;
            }
        }
        Ok(())
    }

    async fn report(&self, ctx: &ConnectionContext, report: GameError) {
        if let Err(e) = self
            .publisher
            .publish(&ctx.socket_id, ServerEvent::GameError(report))
            .await
        {
            error!("Failed to deliver error to {}: {}", ctx.socket_id, e);
        }
    }
}

#[async_trait]
impl MessageHandler for ClientEventDispatcher {
    async fn handle_client_message(&self, envelope: ClientEnvelope) -> Result<()> {
        let ctx = envelope.context();
        let event_name = envelope.event.name();

        let Some(metrics) = &self.metrics else {
            return self.dispatch(&ctx, envelope.event).await;
        };

        let timer = metrics.start_timer();
        let result = self.dispatch(&ctx, envelope.event).await;
        metrics.record_client_event(event_name, result.is_ok(), timer.stop());
        result
    }

    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]) {
        error!(
            "Client event failed - code: {}, message_size: {} bytes, error: {}",
            error_code(error),
            message_data.len(),
            error
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::MatchmakingSettings;
    use crate::storage::{InMemoryGameRepository, InMemoryQueueMirror};
    use crate::types::{JoinRequest, LeaveRequest, MoveSubmitted, RatingSnapshot};
    use uuid::Uuid;

    fn setup() -> (ClientEventDispatcher, Arc<MockEventPublisher>, MatchmakingEngine) {
        let publisher = Arc::new(MockEventPublisher::new());
        let engine = MatchmakingEngine::new(
            MatchmakingSettings::fast(),
            Arc::new(InMemoryGameRepository::new()),
            Arc::new(InMemoryQueueMirror::new()),
            publisher.clone(),
        );
        let dispatcher = ClientEventDispatcher::new(engine.clone(), publisher.clone());
        (dispatcher, publisher, engine)
    }

    fn join(user: &str, rating: f64) -> ClientEvent {
        ClientEvent::Join(JoinRequest {
            user_id: user.to_string(),
            time_control: "blitz".to_string(),
            rating: RatingSnapshot {
                rating,
                deviation: 50.0,
                volatility: 0.06,
            },
            latency_ms: 40.0,
            preferred_range: None,
            device_fingerprint: String::new(),
        })
    }

    fn envelope(socket: &str, event: ClientEvent) -> ClientEnvelope {
        ClientEnvelope {
            socket_id: socket.to_string(),
            authenticated_user_id: None,
            event,
        }
    }

    fn error_codes(publisher: &MockEventPublisher, socket: &str) -> Vec<String> {
        publisher
            .events_for(socket)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::GameError(report) => Some(report.code),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_publishes_single_ack() {
        let (dispatcher, publisher, engine) = setup();

        dispatcher
            .handle_client_message(envelope("sock-a", join("alice", 1500.0)))
            .await
            .unwrap();

        assert_eq!(publisher.event_names(), vec!["queue.joined"]);
        assert_eq!(engine.waiting_count().await, 1);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_join_reports_validation_error() {
        let (dispatcher, publisher, engine) = setup();

        let result = dispatcher
            .handle_client_message(envelope("sock-a", join("alice", 50.0)))
            .await;

        assert!(result.is_err());
        assert_eq!(error_codes(&publisher, "sock-a"), vec!["VALIDATION_FAILED"]);
        assert_eq!(engine.waiting_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_unknown_entry_reports_not_found() {
        let (dispatcher, publisher, _engine) = setup();

        let leave = ClientEvent::Leave(LeaveRequest {
            queue_id: Uuid::new_v4(),
        });
        let result = dispatcher
            .handle_client_message(envelope("sock-a", leave))
            .await;

        assert!(result.is_err());
        assert_eq!(error_codes(&publisher, "sock-a"), vec!["QUEUE_NOT_FOUND"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_from_other_connection_reports_not_owned() {
        let (dispatcher, publisher, engine) = setup();

        dispatcher
            .handle_client_message(envelope("sock-a", join("alice", 1500.0)))
            .await
            .unwrap();
        let queue_id = match publisher.events_for("sock-a").first() {
            Some(ServerEvent::Joined(ack)) => ack.queue_id,
            other => panic!("expected queue.joined, got {:?}", other),
        };

        let leave = ClientEvent::Leave(LeaveRequest { queue_id });
        let result = dispatcher
            .handle_client_message(envelope("sock-b", leave))
            .await;

        assert!(result.is_err());
        assert_eq!(error_codes(&publisher, "sock-b"), vec!["QUEUE_NOT_OWNED"]);
        assert!(engine.find_entry(queue_id).await.is_some());
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_for_unknown_game_reports_with_game_id() {
        let (dispatcher, publisher, _engine) = setup();
        let game_id = Uuid::new_v4();

        let submitted = ClientEvent::Move(MoveSubmitted {
            game_id,
            san: "e4".to_string(),
            move_time_ms: 1200,
            client_move_id: "m1".to_string(),
        });
        let result = dispatcher
            .handle_client_message(envelope("sock-a", submitted))
            .await;

        assert!(result.is_err());
        match publisher.events_for("sock-a").as_slice() {
            [ServerEvent::GameError(report)] => {
                assert_eq!(report.code, "GAME_NOT_FOUND");
                assert_eq!(report.game_id, Some(game_id));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_connection_entries() {
        let (dispatcher, publisher, engine) = setup();

        dispatcher
            .handle_client_message(envelope("sock-a", join("alice", 1500.0)))
            .await
            .unwrap();
        dispatcher
            .handle_client_message(envelope("sock-a", ClientEvent::Disconnect))
            .await
            .unwrap();

        assert_eq!(engine.waiting_count().await, 0);
        assert_eq!(publisher.event_names(), vec!["queue.joined"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_events_are_counted() {
        let publisher = Arc::new(MockEventPublisher::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let engine = MatchmakingEngine::new(
            MatchmakingSettings::fast(),
            Arc::new(InMemoryGameRepository::new()),
            Arc::new(InMemoryQueueMirror::new()),
            publisher.clone(),
        );
        let dispatcher =
            ClientEventDispatcher::new(engine, publisher).with_metrics(metrics.clone());

        dispatcher
            .handle_client_message(envelope("sock-a", ClientEvent::Disconnect))
            .await
            .unwrap();

        let total = metrics
            .service()
            .client_events_total
            .with_label_values(&["disconnect", "success"])
            .get();
        assert_eq!(total, 1);
    }
}
