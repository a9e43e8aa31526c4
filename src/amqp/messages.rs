//! AMQP message definitions and serialization

use serde::{Deserialize, Serialize};

use crate::error::{MatchmakingError, Result};
use crate::types::*;

/// AMQP queue and exchange names
pub const CLIENT_EVENTS_QUEUE: &str = "matchmaking.client_events";
pub const SERVER_EVENTS_EXCHANGE: &str = "matchmaking.server_events";

/// Prefix of the per-connection routing key for outbound events
pub const CLIENT_ROUTING_PREFIX: &str = "client";

/// Routing key that delivers an event to one connection
pub fn client_routing_key(socket_id: &str) -> String {
    format!("{}.{}", CLIENT_ROUTING_PREFIX, socket_id)
}

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Outbound event addressed to one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub socket_id: SocketId,
    pub event: ServerEvent,
}

/// Inbound event as relayed by the socket gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    pub socket_id: SocketId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_user_id: Option<UserId>,
    pub event: ClientEvent,
}

impl ClientEnvelope {
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            socket_id: self.socket_id.clone(),
            authenticated_user_id: self.authenticated_user_id.clone(),
        }
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Deserialize a client envelope from bytes
    pub fn deserialize_client_envelope(bytes: &[u8]) -> Result<ClientEnvelope> {
        let envelope: ClientEnvelope =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidJoinRequest {
                reason: format!("Failed to deserialize client event: {}", e),
            })?;

        Self::validate_client_envelope(&envelope)?;
        Ok(envelope)
    }

    /// Validate transport-level fields of a client envelope
    pub fn validate_client_envelope(envelope: &ClientEnvelope) -> Result<()> {
        if envelope.socket_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidJoinRequest {
                reason: "Socket ID cannot be empty".to_string(),
            }
            .into());
        }

        if let Some(user_id) = &envelope.authenticated_user_id {
            if user_id.trim().is_empty() {
                return Err(MatchmakingError::Unauthorized {
                    reason: "Authenticated user ID cannot be empty".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
