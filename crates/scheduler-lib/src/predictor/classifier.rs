//! Overload classifiers and artifact loading
//!
//! Two artifact formats are accepted:
//! - `.onnx`: exported gradient-boosted model, run with tract
//! - `.json`: logistic model `{version, weights, bias}`

use super::{FeatureSnapshot, NUM_FEATURES};
use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Largest artifact accepted by the loader
pub const MAX_ARTIFACT_BYTES: usize = 16 * 1024 * 1024;

/// Inference latency above which a warning is logged
const SLOW_INFERENCE_MS: u128 = 50;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Opaque scoring function returning an overload probability
pub trait Classifier: Send + Sync {
    /// Probability in [0, 1] that the system is about to be overloaded
    fn predict_proba(&self, features: &FeatureSnapshot) -> Result<f64>;

    /// Artifact version or fingerprint
    fn version(&self) -> &str;

    /// Artifact format label (`onnx`, `json`)
    fn format(&self) -> &str;
}

/// ONNX classifier evaluated with tract
pub struct OnnxClassifier {
    model: TractModel,
    version: String,
}

impl OnnxClassifier {
    pub fn from_bytes(model_bytes: &[u8], version: impl Into<String>) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, NUM_FEATURES]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;

        Ok(Self {
            model,
            version: version.into(),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict_proba(&self, features: &FeatureSnapshot) -> Result<f64> {
        let start = Instant::now();

        let input: Tensor =
            tract_ndarray::Array2::from_shape_vec((1, NUM_FEATURES), features.to_f32())
                .context("Failed to shape feature tensor")?
                .into();

        let outputs = self.model.run(tvec!(input.into()))?;
        // Classifier exports emit [label, probabilities]; the positive class
        // probability is the last value of the last output.
        let output = outputs.last().context("No output from model")?;
        let output = output.cast_to::<f32>()?;
        let probability = output
            .to_array_view::<f32>()?
            .iter()
            .last()
            .copied()
            .context("Model output is empty")?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > SLOW_INFERENCE_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Slow classifier inference");
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        clamp_probability(probability as f64)
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn format(&self) -> &str {
        "onnx"
    }
}

/// Logistic regression over the fixed feature order
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticClassifier {
    #[serde(default)]
    version: String,
    weights: Vec<f64>,
    #[serde(default)]
    bias: f64,
}

impl LogisticClassifier {
    pub fn new(version: impl Into<String>, weights: [f64; NUM_FEATURES], bias: f64) -> Self {
        Self {
            version: version.into(),
            weights: weights.to_vec(),
            bias,
        }
    }

    pub fn from_json(bytes: &[u8], fallback_version: &str) -> Result<Self> {
        let mut model: Self =
            serde_json::from_slice(bytes).context("Failed to parse logistic model")?;

        if model.weights.len() != NUM_FEATURES {
            anyhow::bail!(
                "Logistic model has {} weights, expected {}",
                model.weights.len(),
                NUM_FEATURES
            );
        }
        if model.version.is_empty() {
            model.version = fallback_version.to_string();
        }
        Ok(model)
    }
}

impl Classifier for LogisticClassifier {
    fn predict_proba(&self, features: &FeatureSnapshot) -> Result<f64> {
        let z: f64 = self
            .weights
            .iter()
            .zip(features.values())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;

        clamp_probability(1.0 / (1.0 + (-z).exp()))
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn format(&self) -> &str {
        "json"
    }
}

fn clamp_probability(p: f64) -> Result<f64> {
    if p.is_nan() {
        anyhow::bail!("Classifier returned NaN");
    }
    Ok(p.clamp(0.0, 1.0))
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Load the classifier artifact at `path`
///
/// A missing file is not an error: prediction is best-effort and the caller
/// treats `None` as "no scale-up".
pub async fn load_classifier(path: &Path) -> Result<Option<Arc<dyn Classifier>>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No classifier artifact");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    if bytes.len() > MAX_ARTIFACT_BYTES {
        anyhow::bail!(
            "Classifier artifact {} is {} bytes, limit is {}",
            path.display(),
            bytes.len(),
            MAX_ARTIFACT_BYTES
        );
    }

    let checksum = compute_checksum(&bytes);
    let fingerprint = &checksum[..12];

    let classifier: Arc<dyn Classifier> = match path.extension().and_then(|e| e.to_str()) {
        Some("onnx") => Arc::new(OnnxClassifier::from_bytes(&bytes, fingerprint)?),
        Some("json") => Arc::new(LogisticClassifier::from_json(&bytes, fingerprint)?),
        other => anyhow::bail!(
            "Unsupported classifier artifact extension {:?} for {}",
            other,
            path.display()
        ),
    };

    info!(
        path = %path.display(),
        version = %classifier.version(),
        format = %classifier.format(),
        sha256 = %checksum,
        "Loaded classifier artifact"
    );
    Ok(Some(classifier))
}
