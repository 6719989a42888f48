//! Provisioning latency benchmarks
//!
//! This module provides:
//! - `BenchmarkHarness`, which measures cold-start (scale-and-wait) latency
//! - `BenchmarkLog`, the append-only CSV shared with prewarm activation samples
//! - Per-event-type summaries for offline comparison

mod harness;
mod log;


pub use harness::{BenchmarkConfig, BenchmarkHarness, ColdStartOutcome};
pub use log::{parse_records, summarize, BenchmarkLog, EventSummary, HEADER};
