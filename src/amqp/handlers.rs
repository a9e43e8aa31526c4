//! AMQP message handlers for inbound client events
//!
//! The socket gateway relays every client event onto a single queue. This
//! module consumes that queue, decodes the envelopes, and hands them to a
//! `MessageHandler`. A failing message is logged and dropped; it never stops
//! the consumer.

use crate::amqp::messages::{ClientEnvelope, MessageUtils};
use crate::error::{MatchmakingError, Result};
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel, QueueDeclareArguments},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Trait defining the interface for handling inbound client events
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded client event
    async fn handle_client_message(&self, envelope: ClientEnvelope) -> Result<()>;

    /// Handle a message that could not be decoded or processed
    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]);
}

/// Decode and dispatch one delivery body
pub async fn process_delivery(handler: &dyn MessageHandler, content: &[u8]) -> Result<()> {
    let envelope = MessageUtils::deserialize_client_envelope(content)?;
    debug!(
        "Client event '{}' from connection {}",
        envelope.event.name(),
        envelope.socket_id
    );
    handler.handle_client_message(envelope).await
}

/// Consumer for the client events queue
pub struct ClientEventConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl ClientEventConsumer {
    /// Create a new client event consumer
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("matchmaker-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Declare the queue and start consuming from it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let declare = QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        self.channel.queue_declare(declare).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            }
        })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .manual_ack(false)
            .finish();

        self.channel
            .basic_consume(ClientEventDelivery::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming client events from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming client events");
        Ok(())
    }
}

/// Internal consumer implementation
struct ClientEventDelivery {
    handler: Arc<dyn MessageHandler>,
}

impl ClientEventDelivery {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for ClientEventDelivery {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let start_time = std::time::Instant::now();

        match process_delivery(self.handler.as_ref(), &content).await {
            Ok(_) => {
                debug!(
                    "Message processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                self.handler.handle_error(&e, &content).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientEvent;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        received: Mutex<Vec<ClientEnvelope>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle_client_message(&self, envelope: ClientEnvelope) -> Result<()> {
            self.received.lock().await.push(envelope);
            Ok(())
        }

        async fn handle_error(&self, _error: &anyhow::Error, _message_data: &[u8]) {}
    }

    #[tokio::test]
    async fn test_process_delivery_dispatches() {
        let handler = RecordingHandler::default();
        let body = br#"{"socketId":"sock-1","event":{"type":"disconnect"}}"#;

        process_delivery(&handler, body).await.unwrap();

        let received = handler.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].socket_id, "sock-1");
        assert!(matches!(received[0].event, ClientEvent::Disconnect));
    }

    #[tokio::test]
    async fn test_process_delivery_rejects_malformed() {
        let handler = RecordingHandler::default();
        let err = process_delivery(&handler, b"{\"socketId\":1}")
            .await
            .unwrap_err();
        assert_eq!(crate::error::error_code(&err), "VALIDATION_FAILED");
        assert!(handler.received.lock().await.is_empty());
    }
}
