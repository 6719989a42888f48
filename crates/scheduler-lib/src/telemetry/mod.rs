//! Telemetry aggregation
//!
//! This module provides:
//! - `TelemetryCollector`, the latest-value store of processor reports and
//!   machine readings observed on the bus
//! - `FeatureExporter`, which periodically appends per-processor feature
//!   rows for offline labeling and training

mod collector;
mod export;

pub use collector::{Record, TelemetryCollector};
pub use export::{
    FeatureExporter, TelemetryConfig, DEFAULT_EXPORT_INTERVAL, STALE_EXPORT_INTERVALS,
};
