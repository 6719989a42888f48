//! Fleet scheduling and autoscaling control plane
//!
//! This crate provides the core functionality for:
//! - Partitioning machines across processors and applying the result
//! - Reactive overflow routing for machines above the rate threshold
//! - Predictive prewarm provisioning driven by an overload classifier
//! - Cold-start and prewarm latency benchmarking
//! - The processor runtime that consumes machine telemetry
//! - Health checks and observability

pub mod assignment;
pub mod benchmark;
pub mod bus;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod orchestrator;
pub mod predictor;
pub mod prewarm;
pub mod processor;
pub mod telemetry;

pub use error::{Result, SchedulerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};
