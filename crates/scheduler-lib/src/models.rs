//! Core data models shared by the scheduler and the processor runtime

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single telemetry reading published by a machine on `data/{machine_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    pub vibration: f64,
    pub load: f64,
}

/// Assignment command published on `control/{processor_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub assign: Vec<String>,
}

impl ControlCommand {
    pub fn assign(machines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            assign: machines.into_iter().map(Into::into).collect(),
        }
    }
}

/// Buffer occupancy report published on `buffer/{processor_id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferReport {
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub assigned_machines: Vec<String>,
}

/// Resource report published on `metrics/{processor_id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub avg_latency: f64,
    pub avg_rate: f64,
}

/// Full processor snapshot published (retained) on `state/{processor_id}`
///
/// Carries the per-machine sliding windows so that a freshly provisioned
/// processor can hydrate from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub processor_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub buffer: BufferReport,
    #[serde(flatten)]
    pub metrics: MetricsReport,
    #[serde(default)]
    pub buffers: BTreeMap<String, Vec<Reading>>,
}

/// Lifecycle phase of a prewarm pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrewarmPhase {
    Created,
    Hydrating,
    Hydrated,
    Active,
}

impl PrewarmPhase {
    /// The only phase reachable from this one
    pub fn next(self) -> Option<PrewarmPhase> {
        match self {
            PrewarmPhase::Created => Some(PrewarmPhase::Hydrating),
            PrewarmPhase::Hydrating => Some(PrewarmPhase::Hydrated),
            PrewarmPhase::Hydrated => Some(PrewarmPhase::Active),
            PrewarmPhase::Active => None,
        }
    }
}

/// Kind of provisioning latency sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkEvent {
    Cold,
    Prewarm,
}

impl BenchmarkEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkEvent::Cold => "cold",
            BenchmarkEvent::Prewarm => "prewarm",
        }
    }
}

impl std::fmt::Display for BenchmarkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BenchmarkEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cold" => Ok(BenchmarkEvent::Cold),
            "prewarm" => Ok(BenchmarkEvent::Prewarm),
            other => anyhow::bail!("unknown benchmark event type `{}`", other),
        }
    }
}

/// One row of the benchmark log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub event_type: BenchmarkEvent,
    pub duration_ms: f64,
}

impl BenchmarkRecord {
    pub fn now(event_type: BenchmarkEvent, duration_ms: f64) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            event_type,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prewarm_phase_is_linear() {
        let mut phase = PrewarmPhase::Created;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(phase, PrewarmPhase::Active);
    }

    #[test]
    fn test_state_snapshot_flattens_reports() {
        let snapshot = StateSnapshot {
            processor_id: "processor-a".to_string(),
            timestamp: 10,
            buffer: BufferReport {
                buffer_size: 3,
                buffer_capacity: 50,
                assigned_machines: vec!["m1".to_string()],
            },
            metrics: MetricsReport {
                cpu_usage: 12.5,
                ..Default::default()
            },
            buffers: BTreeMap::new(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["buffer_size"], 3);
        assert_eq!(value["cpu_usage"], 12.5);

        let back: StateSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_benchmark_event_parse() {
        assert_eq!("cold".parse::<BenchmarkEvent>().unwrap(), BenchmarkEvent::Cold);
        assert_eq!(" prewarm".parse::<BenchmarkEvent>().unwrap(), BenchmarkEvent::Prewarm);
        assert!("warm".parse::<BenchmarkEvent>().is_err());
    }
}
