//! Append-only provisioning latency log
//!
//! CSV with header `timestamp,event_type,duration_ms`. Cold and prewarm
//! samples share one file so they can be compared offline.

use crate::models::{BenchmarkEvent, BenchmarkRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const HEADER: &str = "timestamp,event_type,duration_ms";

/// Append-only benchmark log
#[derive(Debug)]
pub struct BenchmarkLog {
    path: PathBuf,
    // Serializes appends from concurrent loops
    write_lock: Mutex<()>,
}

impl BenchmarkLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, writing the header first if the file is new
    pub fn append(&self, record: &BenchmarkRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        if is_new {
            writeln!(file, "{}", HEADER)?;
        }
        writeln!(
            file,
            "{},{},{}",
            record.timestamp, record.event_type, record.duration_ms
        )?;
        file.flush()?;

        debug!(
            event_type = %record.event_type,
            duration_ms = record.duration_ms,
            "Appended benchmark record"
        );
        Ok(())
    }

    /// Every readable record; an absent file yields an empty log
    pub fn read_all(&self) -> Result<Vec<BenchmarkRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(parse_records(&content))
    }

    /// Per-event-type latency statistics
    pub fn summary(&self) -> Result<Vec<EventSummary>> {
        Ok(summarize(&self.read_all()?))
    }
}

/// Parse CSV rows, skipping the header and malformed lines
pub fn parse_records(content: &str) -> Vec<BenchmarkRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with("timestamp"))
        .filter_map(|(idx, line)| match parse_line(line) {
            Some(record) => Some(record),
            None => {
                warn!(line = idx + 1, "Skipping malformed benchmark row");
                None
            }
        })
        .collect()
}

fn parse_line(line: &str) -> Option<BenchmarkRecord> {
    let mut fields = line.split(',');
    let timestamp = fields.next()?.trim().parse().ok()?;
    let event_type = fields.next()?.parse().ok()?;
    let duration_ms = fields.next()?.trim().parse().ok()?;
    Some(BenchmarkRecord {
        timestamp,
        event_type,
        duration_ms,
    })
}

/// Latency statistics for one event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub event_type: BenchmarkEvent,
    pub count: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

pub fn summarize(records: &[BenchmarkRecord]) -> Vec<EventSummary> {
    let mut by_event: BTreeMap<BenchmarkEvent, Vec<f64>> = BTreeMap::new();
    for record in records {
        by_event
            .entry(record.event_type)
            .or_default()
            .push(record.duration_ms);
    }

    by_event
        .into_iter()
        .map(|(event_type, mut durations)| {
            durations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let count = durations.len();
            EventSummary {
                event_type,
                count,
                mean_ms: durations.iter().sum::<f64>() / count as f64,
                min_ms: durations[0],
                max_ms: durations[count - 1],
                p50_ms: percentile(&durations, 50.0),
                p95_ms: percentile(&durations, 95.0),
            }
        })
        .collect()
}

/// Nearest-rank percentile of sorted values
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
