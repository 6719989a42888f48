//! Feature snapshot for overload classification
//!
//! The classifier is order-sensitive, so the feature order is fixed here and
//! every consumer (scoring and the CSV export) goes through `FEATURES`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Feature names in model input order
pub const FEATURES: [&str; 9] = [
    "cpu_usage",
    "mem_usage",
    "buffer_size",
    "buffer_capacity",
    "avg_latency",
    "avg_rate",
    "temperature",
    "vibration",
    "load",
];

/// Number of input features expected by the classifier
pub const NUM_FEATURES: usize = FEATURES.len();

/// Fixed-order numeric description of aggregate system state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    values: [f64; NUM_FEATURES],
}

impl FeatureSnapshot {
    pub fn new(values: [f64; NUM_FEATURES]) -> Self {
        Self { values }
    }

    /// All-zero snapshot
    pub fn zeros() -> Self {
        Self {
            values: [0.0; NUM_FEATURES],
        }
    }

    /// Build from a telemetry record
    ///
    /// Missing features default to 0.0. Values that cannot be read as a
    /// number are coerced to 0.0 and logged.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let mut values = [0.0; NUM_FEATURES];
        for (slot, name) in values.iter_mut().zip(FEATURES) {
            *slot = match record.get(name) {
                None | Some(Value::Null) => 0.0,
                Some(value) => coerce(value).unwrap_or_else(|| {
                    warn!(feature = name, value = %value, "Non-numeric feature value, using 0.0");
                    0.0
                }),
            };
        }
        Self { values }
    }

    pub fn values(&self) -> &[f64; NUM_FEATURES] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURES
            .iter()
            .position(|f| *f == name)
            .map(|idx| self.values[idx])
    }

    /// Values as model input
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|v| *v as f32).collect()
    }
}

impl Default for FeatureSnapshot {
    fn default() -> Self {
        Self::zeros()
    }
}

fn coerce(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}
