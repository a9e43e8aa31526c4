//! Metrics and monitoring for the chess matchmaking service
//!
//! Prometheus collectors for queues, matches, and client events, plus the
//! HTTP server exposing health probes and the scrape endpoint.

pub mod collector;
pub mod health;

pub use collector::{
    MatchMetrics, MetricsCollector, MetricsTimer, PerformanceMetrics, QueueMetrics,
    ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
