//! Processor runtime
//!
//! This module provides:
//! - `SlidingBuffer`, the bounded per-machine reading window
//! - `ResourceSampler`, CPU and memory usage from cgroup v2
//! - `ProcessorRuntime`, which follows assignment commands, hydrates from
//!   peer snapshots when prewarmed, and publishes buffer/metrics/state reports

mod buffer;
mod resources;
mod runtime;

pub use buffer::{SlidingBuffer, DEFAULT_BUFFER_CAPACITY};
pub use resources::{ResourceSampler, ResourceUsage, DEFAULT_CGROUP_ROOT};
pub use runtime::{ProcessorConfig, ProcessorRuntime};
