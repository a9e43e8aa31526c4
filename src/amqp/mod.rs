//! AMQP integration for the matchmaking service
//!
//! This module handles the AMQP connection, inbound client event consumption,
//! and outbound event publishing. The engine never touches AMQP types directly.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{ClientEventConsumer, MessageHandler};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublisherConfig};
