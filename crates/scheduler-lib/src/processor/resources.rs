//! Processor resource usage from the cgroup v2 hierarchy
//!
//! Reads the container's own cgroup:
//! - cpu.stat `usage_usec` for CPU time, turned into a percentage between samples
//! - memory.current for resident memory

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::Instant;
use tracing::debug;

/// Default cgroup v2 mount inside a container
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// One resource sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    /// CPU percent of one core since the previous sample
    pub cpu_usage: f64,
    /// Memory in MiB
    pub mem_usage: f64,
}

/// Samples CPU and memory usage, falling back to zero when unavailable
#[derive(Debug)]
pub struct ResourceSampler {
    cgroup_root: PathBuf,
    last_cpu: Option<(u64, Instant)>,
}

impl ResourceSampler {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            last_cpu: None,
        }
    }

    /// Parse `usage_usec` from cpu.stat contents
    pub fn parse_cpu_usage_usec(content: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("usage_usec"), Some(value)) => value.parse().ok(),
                _ => None,
            }
        })
    }

    async fn read_value(path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn cpu_usage_usec(&self) -> Result<u64> {
        let content = Self::read_value(&self.cgroup_root.join("cpu.stat")).await?;
        Self::parse_cpu_usage_usec(&content).context("cpu.stat has no usage_usec")
    }

    async fn memory_bytes(&self) -> Result<u64> {
        let content = Self::read_value(&self.cgroup_root.join("memory.current")).await?;
        content
            .trim()
            .parse()
            .context("Failed to parse memory.current value")
    }

    /// Take a sample; the first CPU reading only establishes a baseline
    pub async fn sample(&mut self) -> ResourceUsage {
        let now = Instant::now();

        let cpu_usage = match self.cpu_usage_usec().await {
            Ok(usage) => {
                let percent = match self.last_cpu {
                    Some((prev, at)) if usage >= prev => {
                        let wall_usec = now.duration_since(at).as_micros() as f64;
                        if wall_usec > 0.0 {
                            (usage - prev) as f64 / wall_usec * 100.0
                        } else {
                            0.0
                        }
                    }
                    _ => 0.0,
                };
                self.last_cpu = Some((usage, now));
                percent
            }
            Err(e) => {
                debug!(error = %e, "CPU usage unavailable");
                0.0
            }
        };

        let mem_usage = match self.memory_bytes().await {
            Ok(bytes) => bytes as f64 / (1024.0 * 1024.0),
            Err(e) => {
                debug!(error = %e, "Memory usage unavailable");
                0.0
            }
        };

        ResourceUsage {
            cpu_usage,
            mem_usage,
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new(DEFAULT_CGROUP_ROOT)
    }
}
