//! Overload prediction and predictive autoscaling
//!
//! This module provides:
//! - `FeatureSnapshot`, the fixed-order classifier input
//! - `Classifier` implementations and artifact loading
//! - `PredictiveAutoscaler`, the periodic predict-then-provision cycle

mod autoscaler;
mod classifier;
mod features;

#[cfg(test)]
mod tests;

pub use autoscaler::{
    AutoscalerConfig, CycleReport, PredictiveAutoscaler, ScaleDecision, ScoreOutcome,
    DEFAULT_CYCLE_INTERVAL,
};
pub use classifier::{
    compute_checksum, load_classifier, Classifier, LogisticClassifier, OnnxClassifier,
    MAX_ARTIFACT_BYTES,
};
pub use features::{FeatureSnapshot, FEATURES, NUM_FEATURES};
