//! Common types used throughout the matchmaking service

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MatchmakingError;

/// Unique identifier for users
pub type UserId = String;

/// Transport handle of a connected client
pub type SocketId = String;

/// Unique identifier for a single queue search
pub type QueueId = Uuid;

/// Unique identifier for games
pub type GameId = Uuid;

/// Lowest rating accepted in a join request
pub const MIN_RATING: f64 = 100.0;

/// Highest rating accepted in a join request
pub const MAX_RATING: f64 = 4000.0;

/// Time control of a waiting pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeControl {
    Bullet,
    Blitz,
    Rapid,
    Classical,
}

impl TimeControl {
    pub const ALL: [TimeControl; 4] = [
        TimeControl::Bullet,
        TimeControl::Blitz,
        TimeControl::Rapid,
        TimeControl::Classical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeControl::Bullet => "bullet",
            TimeControl::Blitz => "blitz",
            TimeControl::Rapid => "rapid",
            TimeControl::Classical => "classical",
        }
    }
}

impl std::fmt::Display for TimeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeControl {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bullet" => Ok(TimeControl::Bullet),
            "blitz" => Ok(TimeControl::Blitz),
            "rapid" => Ok(TimeControl::Rapid),
            "classical" => Ok(TimeControl::Classical),
            other => Err(MatchmakingError::UnknownTimeControl {
                value: other.to_string(),
            }),
        }
    }
}

/// Rating snapshot supplied by the client at join
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

/// Inclusive rating interval an entry currently accepts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingRange {
    pub min: f64,
    pub max: f64,
}

impl RatingRange {
    pub fn around(rating: f64, window: f64) -> Self {
        Self {
            min: rating - window,
            max: rating + window,
        }
    }

    pub fn overlaps(&self, other: &RatingRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

/// Inbound Message Types
/// Request to enter a time-control pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: UserId,
    /// Kept as a raw string so unknown values surface as validation errors
    pub time_control: String,
    pub rating: RatingSnapshot,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_range: Option<f64>,
    #[serde(default)]
    pub device_fingerprint: String,
}

impl JoinRequest {
    /// Validate the payload and resolve its time control
    pub fn validate(&self) -> Result<TimeControl, MatchmakingError> {
        let invalid = |reason: &str| MatchmakingError::InvalidJoinRequest {
            reason: reason.to_string(),
        };

        if self.user_id.trim().is_empty() {
            return Err(invalid("userId must not be empty"));
        }

        let snapshot = &self.rating;
        if !snapshot.rating.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&snapshot.rating) {
            return Err(invalid("rating must be between 100 and 4000"));
        }
        if !snapshot.deviation.is_finite() || snapshot.deviation < 0.0 {
            return Err(invalid("deviation must be a non-negative number"));
        }
        if !snapshot.volatility.is_finite() || snapshot.volatility < 0.0 {
            return Err(invalid("volatility must be a non-negative number"));
        }
        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err(invalid("latencyMs must be a non-negative number"));
        }
        if let Some(range) = self.preferred_range {
            if !range.is_finite() || range <= 0.0 {
                return Err(invalid("preferredRange must be a positive number"));
            }
        }

        self.time_control.parse()
    }
}

/// Request to withdraw a queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub queue_id: QueueId,
}

/// Request to re-associate a queue entry with a new connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub queue_id: QueueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// First move of a freshly created game
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveSubmitted {
    pub game_id: GameId,
    pub san: String,
    pub move_time_ms: u64,
    pub client_move_id: String,
}

/// Outbound Message Types
/// Acknowledgement returned for join and resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAck {
    pub queue_id: QueueId,
    pub rating_range: RatingRange,
    pub next_expansion_in_ms: u64,
}

/// Periodic window expansion notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueUpdate {
    pub queue_id: QueueId,
    pub rating_range: RatingRange,
    pub elapsed_ms: u64,
}

/// Public view of the opponent in a match-found notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentInfo {
    pub user_id: UserId,
    pub rating: f64,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFound {
    pub queue_id: QueueId,
    pub game_id: GameId,
    pub initial_fen: String,
    pub opponent: OpponentInfo,
    pub time_control: TimeControl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameAborted {
    pub game_id: GameId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
}

impl GameError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            game_id: None,
        }
    }

    pub fn for_game(mut self, game_id: GameId) -> Self {
        self.game_id = Some(game_id);
        self
    }
}

/// Union type for all events a client may send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "queue.join")]
    Join(JoinRequest),
    #[serde(rename = "queue.leave")]
    Leave(LeaveRequest),
    #[serde(rename = "queue.resume")]
    Resume(ResumeRequest),
    #[serde(rename = "game:move")]
    Move(MoveSubmitted),
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "queue.join",
            ClientEvent::Leave(_) => "queue.leave",
            ClientEvent::Resume(_) => "queue.resume",
            ClientEvent::Move(_) => "game:move",
            ClientEvent::Disconnect => "disconnect",
        }
    }
}

/// Union type for all events pushed to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "queue.joined")]
    Joined(QueuedAck),
    #[serde(rename = "queue.update")]
    Update(QueueUpdate),
    #[serde(rename = "queue.matchFound")]
    MatchFound(MatchFound),
    #[serde(rename = "game:aborted")]
    GameAborted(GameAborted),
    #[serde(rename = "game:error")]
    GameError(GameError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Joined(_) => "queue.joined",
            ServerEvent::Update(_) => "queue.update",
            ServerEvent::MatchFound(_) => "queue.matchFound",
            ServerEvent::GameAborted(_) => "game:aborted",
            ServerEvent::GameError(_) => "game:error",
        }
    }
}

/// Identity of the connection an inbound event arrived on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionContext {
    pub socket_id: SocketId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_user_id: Option<UserId>,
}

impl ConnectionContext {
    pub fn new(socket_id: impl Into<SocketId>) -> Self {
        Self {
            socket_id: socket_id.into(),
            authenticated_user_id: None,
        }
    }

    pub fn authenticated(socket_id: impl Into<SocketId>, user_id: impl Into<UserId>) -> Self {
        Self {
            socket_id: socket_id.into(),
            authenticated_user_id: Some(user_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join_request(rating: f64) -> JoinRequest {
        JoinRequest {
            user_id: "user-a".to_string(),
            time_control: "blitz".to_string(),
            rating: RatingSnapshot {
                rating,
                deviation: 50.0,
                volatility: 0.06,
            },
            latency_ms: 40.0,
            preferred_range: None,
            device_fingerprint: String::new(),
        }
    }

    #[test]
    fn test_time_control_parse() {
        assert_eq!("blitz".parse::<TimeControl>().unwrap(), TimeControl::Blitz);
        assert!("hyperbullet".parse::<TimeControl>().is_err());
        assert_eq!(TimeControl::Classical.to_string(), "classical");
    }

    #[test]
    fn test_join_validation() {
        assert_eq!(join_request(1200.0).validate().unwrap(), TimeControl::Blitz);
        assert!(join_request(50.0).validate().is_err());
        assert!(join_request(4500.0).validate().is_err());

        let mut request = join_request(1200.0);
        request.latency_ms = -1.0;
        assert!(request.validate().is_err());

        let mut request = join_request(1200.0);
        request.preferred_range = Some(0.0);
        assert!(request.validate().is_err());

        let mut request = join_request(1200.0);
        request.time_control = "correspondence".to_string();
        assert!(matches!(
            request.validate(),
            Err(MatchmakingError::UnknownTimeControl { .. })
        ));
    }

    #[test]
    fn test_rating_range_overlap() {
        let a = RatingRange::around(1200.0, 75.0);
        let b = RatingRange::around(1350.0, 75.0);
        let c = RatingRange::around(1351.0, 75.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_client_event_wire_format() {
        let raw = r#"{"type":"queue.leave","payload":{"queueId":"6f1c2a4e-8b8e-4d8c-9a43-7d2f1c0b9e11"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.name(), "queue.leave");

        let raw = r#"{"type":"disconnect"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ClientEvent::Disconnect));
    }

    #[test]
    fn test_server_event_wire_format() {
        let event = ServerEvent::GameError(GameError::new("QUEUE_NOT_FOUND", "gone"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "game:error");
        assert_eq!(value["payload"]["code"], "QUEUE_NOT_FOUND");
        assert!(value["payload"].get("gameId").is_none());
    }
}
