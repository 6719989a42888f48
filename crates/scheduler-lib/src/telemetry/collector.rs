//! Latest-value telemetry store fed from the bus

use crate::bus::{topics, Message, MessageBus};
use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// JSON object as published on the bus
pub type Record = Map<String, Value>;

/// Keys of a processor snapshot that are not telemetry
const NON_FEATURE_KEYS: &[&str] = &["buffers", "assigned_machines"];

#[derive(Debug, Clone)]
struct Entry {
    record: Record,
    seq: u64,
    updated: Instant,
}

#[derive(Debug, Default)]
struct TelemetryState {
    processors: BTreeMap<String, Entry>,
    machines: BTreeMap<String, Entry>,
    seq: u64,
}

/// Keeps the latest published record per processor and per machine
#[derive(Debug, Default)]
pub struct TelemetryCollector {
    state: RwLock<TelemetryState>,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TelemetryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TelemetryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to machine data and every processor report topic
    pub async fn attach(self: &Arc<Self>, bus: &dyn MessageBus) -> Result<()> {
        for pattern in [
            topics::ALL_DATA,
            topics::ALL_METRICS,
            topics::ALL_BUFFER,
            topics::ALL_STATE,
        ] {
            let collector = self.clone();
            bus.subscribe(
                pattern,
                Arc::new(move |message: &Message| collector.ingest(message)),
            )
            .await?;
        }

        info!("Telemetry collector attached");
        Ok(())
    }

    /// Merge one bus message into the store; malformed payloads are dropped
    pub fn ingest(&self, message: &Message) {
        let record = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(Value::Object(record)) => record,
            Ok(_) => {
                warn!(topic = %message.topic, "Ignoring non-object telemetry payload");
                return;
            }
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Ignoring malformed telemetry payload");
                return;
            }
        };

        let Some((kind, id)) = message.topic.split_once('/') else {
            return;
        };

        let now = Instant::now();
        let mut state = self.write();
        state.seq += 1;
        let seq = state.seq;

        match kind {
            "data" => {
                state
                    .machines
                    .insert(id.to_string(), Entry { record, seq, updated: now });
            }
            "metrics" | "buffer" | "state" => {
                let entry = state
                    .processors
                    .entry(id.to_string())
                    .or_insert_with(|| Entry {
                        record: Record::new(),
                        seq,
                        updated: now,
                    });
                for (key, value) in record {
                    if !NON_FEATURE_KEYS.contains(&key.as_str()) {
                        entry.record.insert(key, value);
                    }
                }
                entry.seq = seq;
                entry.updated = now;
            }
            _ => return,
        }

        trace!(topic = %message.topic, "Telemetry updated");
    }

    /// Latest processor record overlaid with the latest machine reading
    pub fn aggregate_record(&self) -> Option<Record> {
        let state = self.read();
        let processor = state.processors.values().max_by_key(|e| e.seq);
        let machine = state.machines.values().max_by_key(|e| e.seq);

        match (processor, machine) {
            (None, None) => None,
            (processor, machine) => {
                let mut record = processor.map(|e| e.record.clone()).unwrap_or_default();
                if let Some(machine) = machine {
                    overlay(&mut record, &machine.record);
                }
                Some(record)
            }
        }
    }

    /// Per-processor records, each overlaid with the latest machine reading
    pub fn processor_records(&self) -> Vec<(String, Record)> {
        let state = self.read();
        let machine = state.machines.values().max_by_key(|e| e.seq);

        state
            .processors
            .iter()
            .map(|(id, entry)| {
                let mut record = entry.record.clone();
                if let Some(machine) = machine {
                    overlay(&mut record, &machine.record);
                }
                (id.clone(), record)
            })
            .collect()
    }

    /// Forget processors and machines that published nothing within `max_age`
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.write();
        let before = state.processors.len() + state.machines.len();
        state
            .processors
            .retain(|_, entry| now.duration_since(entry.updated) <= max_age);
        state
            .machines
            .retain(|_, entry| now.duration_since(entry.updated) <= max_age);
        let evicted = before - state.processors.len() - state.machines.len();

        if evicted > 0 {
            debug!(evicted, "Evicted stale telemetry");
        }
        evicted
    }

    pub fn processor_count(&self) -> usize {
        self.read().processors.len()
    }

    pub fn machine_count(&self) -> usize {
        self.read().machines.len()
    }
}

fn overlay(target: &mut Record, source: &Record) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}
