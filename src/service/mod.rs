//! Service layer for the chess matchmaking service
//!
//! This module contains the main application state, the client event
//! dispatcher, and health checks for the production service.

pub mod app;
pub mod dispatcher;
pub mod health;

pub use app::{AppState, ServiceError};
pub use dispatcher::ClientEventDispatcher;
pub use health::{HealthCheck, HealthStatus};
