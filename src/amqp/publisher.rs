//! AMQP event publisher for outbound events

use crate::amqp::messages::{client_routing_key, MessageEnvelope, OutboundMessage};
use crate::error::{MatchmakingError, Result};
use crate::types::ServerEvent;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for pushing events to connected clients
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver an event to the connection identified by `socket_id`
    async fn publish(&self, socket_id: &str, event: ServerEvent) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: crate::amqp::messages::SERVER_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    /// Declare the topic exchange the socket gateway binds to
    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare server events exchange: {}", e),
            }
        })?;

        info!(
            "Successfully set up AMQP exchange {}",
            self.config.exchange_name
        );
        Ok(())
    }

    /// Publish with exponential backoff between attempts
    async fn publish_with_retry(&self, envelope: &MessageEnvelope<OutboundMessage>) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    debug!(
                        "Published {} to {} ({})",
                        envelope.payload.event.name(),
                        envelope.routing_key,
                        envelope.correlation_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<OutboundMessage>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish(&self, socket_id: &str, event: ServerEvent) -> Result<()> {
        let message = OutboundMessage {
            socket_id: socket_id.to_string(),
            event,
        };
        let envelope = MessageEnvelope::new(message, client_routing_key(socket_id));
        self.publish_with_retry(&envelope).await
    }
}

/// Mock event publisher for testing
///
/// Records every published event in order. Sockets registered with
/// `fail_for` reject publishes.
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published: std::sync::Mutex<Vec<OutboundMessage>>,
    failing_sockets: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published messages (for testing)
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events delivered to one connection, in publish order
    pub fn events_for(&self, socket_id: &str) -> Vec<ServerEvent> {
        self.published()
            .into_iter()
            .filter(|message| message.socket_id == socket_id)
            .map(|message| message.event)
            .collect()
    }

    /// Get all published event names (for testing)
    pub fn event_names(&self) -> Vec<&'static str> {
        self.published()
            .iter()
            .map(|message| message.event.name())
            .collect()
    }

    pub fn fail_for(&self, socket_id: &str) {
        if let Ok(mut failing) = self.failing_sockets.lock() {
            failing.insert(socket_id.to_string());
        }
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, socket_id: &str, event: ServerEvent) -> Result<()> {
        let failing = self
            .failing_sockets
            .lock()
            .map(|failing| failing.contains(socket_id))
            .unwrap_or(false);
        if failing {
            return Err(MatchmakingError::AmqpConnectionFailed {
                message: format!("Socket {} unreachable", socket_id),
            }
            .into());
        }

        if let Ok(mut events) = self.published.lock() {
            events.push(OutboundMessage {
                socket_id: socket_id.to_string(),
                event,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameError;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.exchange_name, "matchmaking.server_events");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
    }

    #[tokio::test]
    async fn test_mock_publisher_records_per_socket() {
        let publisher = MockEventPublisher::new();
        publisher
            .publish("s1", ServerEvent::GameError(GameError::new("X", "first")))
            .await
            .unwrap();
        publisher
            .publish("s2", ServerEvent::GameError(GameError::new("Y", "second")))
            .await
            .unwrap();

        assert_eq!(publisher.events_for("s1").len(), 1);
        assert_eq!(publisher.event_names(), vec!["game:error", "game:error"]);

        publisher.fail_for("s3");
        assert!(publisher
            .publish("s3", ServerEvent::GameError(GameError::new("Z", "lost")))
            .await
            .is_err());

        publisher.clear_events();
        assert!(publisher.published().is_empty());
    }
}
