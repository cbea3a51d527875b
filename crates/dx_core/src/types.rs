use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready)
    }
}

/// Memory layout of the interpreter's 4-D input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TensorLayout {
    /// `[1, height, width, 3]`
    Nhwc,
    /// `[1, 3, height, width]`
    Nchw,
}

#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl PredictionRequest {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTimes {
    pub preprocessing_ms: f64,
    pub inference_ms: f64,
    pub total_ms: f64,
}

impl ProcessingTimes {
    pub fn new(preprocessing: std::time::Duration, inference: std::time::Duration) -> Self {
        let preprocessing_ms = round2(preprocessing.as_secs_f64() * 1000.0);
        let inference_ms = round2(inference.as_secs_f64() * 1000.0);
        Self {
            preprocessing_ms,
            inference_ms,
            total_ms: round2(preprocessing_ms + inference_ms),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub labels: Vec<String>,
    /// `[negative, positive]`, summing to 1.
    pub probs: Vec<f64>,
    pub probabilities: BTreeMap<String, f64>,
    pub prediction: String,
    pub confidence: f64,
    pub threshold: f64,
    pub model_sha: String,
    pub degraded: bool,
    pub processing_times: ProcessingTimes,
}

impl PredictionResult {
    pub fn is_positive(&self) -> bool {
        self.labels.get(1) == Some(&self.prediction)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessRecipe {
    /// `[height, width]`
    pub size: [u32; 2],
    pub rgb: bool,
    pub scale: String,
    /// Resize filter
    pub resample: String,
    pub layout: TensorLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMeta {
    pub labels: Vec<String>,
    pub input_shape: Vec<i64>,
    pub output_shape: Vec<i64>,
    pub preprocess: PreprocessRecipe,
    pub model_sha: String,
    pub sha256: String,
    pub threshold: f64,
    pub model_load_time_ms: f64,
    pub loaded_at: DateTime<Utc>,
    pub backend: String,
    pub degraded: bool,
    pub model_config: serde_json::Value,
    pub version: String,
}
