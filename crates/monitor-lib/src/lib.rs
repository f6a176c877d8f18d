//! Core library for river water-quality monitoring
//!
//! This crate provides the core functionality for:
//! - Metric model with safe ranges and physical bounds
//! - Stateful anomaly detection per sensor and metric
//! - Deduplicated, severity-graded alerts
//! - Short-horizon risk scoring and what-if simulation
//! - The ingestion pipeline tying them together
//! - Health checks and observability

pub mod anomaly;
pub mod config;
pub mod error;
pub mod health;
pub mod metric;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod risk;
pub mod severity;
pub mod store;

pub use config::MonitorConfig;
pub use error::{MonitorError, StoreError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use metric::{Metric, MetricCatalog};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{BatchReport, IngestOutcome, MonitorPipeline};
pub use severity::Severity;
pub use store::{MemoryStore, MonitorStore};
