use crate::loader::ModelLoader;
use crate::{postprocess, preprocess};
use dx_core::{
    InferenceError, ModelMeta, ModelStatus, PredictionRequest, PredictionResult, ProcessingTimes,
    Result, ValidationLimits,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Validates uploads and runs them through the shared model.
#[derive(Debug, Clone)]
pub struct Classifier {
    loader: Arc<ModelLoader>,
    limits: ValidationLimits,
}

impl Classifier {
    pub fn new(loader: Arc<ModelLoader>, limits: ValidationLimits) -> Self {
        Self { loader, limits }
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    pub fn status(&self) -> ModelStatus {
        self.loader.status()
    }

    /// Metadata of the loaded model; `None` until a load has completed.
    pub fn model_meta(&self) -> Option<ModelMeta> {
        self.loader.snapshot().map(|model| model.meta())
    }

    pub async fn predict(&self, request: PredictionRequest) -> Result<PredictionResult> {
        let validated = preprocess::validate(&request, &self.limits)?;
        let model = self.loader.ensure_ready().await?;

        let preprocess_start = Instant::now();
        let (size, layout) = (model.input_size, model.layout);
        let tensor = tokio::task::spawn_blocking(move || {
            preprocess::to_tensor(&validated.image, size, layout)
        })
        .await
        .map_err(|e| InferenceError::Backend(format!("preprocessing task failed: {}", e)))?;
        let preprocessing = preprocess_start.elapsed();

        let inference_start = Instant::now();
        let output = model.invoke(tensor).await?;
        let inference = inference_start.elapsed();

        let probs = postprocess::interpret_output(&output)?;
        let decision = postprocess::decide(probs, &model.assets);

        debug!(
            prediction = %decision.label,
            confidence = decision.confidence,
            degraded = model.degraded,
            "Prediction complete"
        );

        let probabilities: BTreeMap<String, f64> = model
            .assets
            .labels
            .iter()
            .cloned()
            .zip(probs)
            .collect();

        Ok(PredictionResult {
            labels: model.assets.labels.clone(),
            probs: probs.to_vec(),
            probabilities,
            prediction: decision.label,
            confidence: (decision.confidence * 10_000.0).round() / 10_000.0,
            threshold: model.assets.threshold,
            model_sha: model.short_sha().to_string(),
            degraded: model.degraded,
            processing_times: ProcessingTimes::new(preprocessing, inference),
        })
    }
}
