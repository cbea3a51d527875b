//! Lazy, guarded, one-time model loading.
//!
//! [`ModelLoader::ensure_ready`] may be called from any number of tasks.
//! The first caller spawns a *load sequence* (up to `load_attempts` attempts
//! with exponential backoff) on its own task; every caller, the first
//! included, awaits that sequence's shared outcome. Once Ready, callers take
//! a lock-free fast path.

use crate::backends::fallback::FallbackInterpreter;
use crate::backends::{create_backend, Interpreter, InterpreterBackend, OutputTensor};
use crate::preprocess;
use crate::sources::{create_source, ArtifactSource};
use chrono::{DateTime, Utc};
use dx_core::{
    InferenceError, LoadError, LoadExhaustedPolicy, LoaderConfig, ModelAssets, ModelMeta,
    ModelStatus, PreprocessRecipe, TensorLayout,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use ndarray::Array4;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const FALLBACK_SIDE: u32 = 224;

/// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Picks the input layout and spatial size from the interpreter's declared
/// shape, falling back to the companion configuration for dynamic axes.
pub fn resolve_layout(actual: &[i64], assets: &ModelAssets) -> (TensorLayout, (u32, u32)) {
    let fallback = assets
        .spatial_size()
        .unwrap_or((FALLBACK_SIDE, FALLBACK_SIDE));
    let dim = |d: i64| u32::try_from(d).ok().filter(|&d| d > 0);

    match actual {
        [_, 3, h, w] if *w != 3 => {
            let size = match (dim(*h), dim(*w)) {
                (Some(h), Some(w)) => (h, w),
                _ => fallback,
            };
            (TensorLayout::Nchw, size)
        }
        [_, h, w, _] => {
            let size = match (dim(*h), dim(*w)) {
                (Some(h), Some(w)) => (h, w),
                _ => fallback,
            };
            (TensorLayout::Nhwc, size)
        }
        _ => (TensorLayout::Nhwc, fallback),
    }
}

/// `-1` in `actual` stands for a dynamic axis and matches anything.
fn shapes_match(expected: &[i64], actual: &[i64]) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(e, a)| *a < 0 || e == a)
}

/// The Ready snapshot shared by every request.
pub struct LoadedModel {
    interpreter: Arc<Mutex<Box<dyn Interpreter>>>,
    pub assets: ModelAssets,
    pub input_shape: Vec<i64>,
    pub output_shape: Vec<i64>,
    pub layout: TensorLayout,
    /// `(height, width)`
    pub input_size: (u32, u32),
    pub sha256: String,
    pub load_time: Duration,
    pub loaded_at: DateTime<Utc>,
    pub backend: String,
    pub degraded: bool,
}

impl LoadedModel {
    fn new(
        interpreter: Box<dyn Interpreter>,
        assets: ModelAssets,
        sha256: String,
        load_time: Duration,
        backend: String,
        degraded: bool,
    ) -> Self {
        let input_shape = interpreter.input_shape().to_vec();
        let output_shape = interpreter.output_shape().to_vec();
        let (layout, input_size) = resolve_layout(&input_shape, &assets);
        Self {
            interpreter: Arc::new(Mutex::new(interpreter)),
            assets,
            input_shape,
            output_shape,
            layout,
            input_size,
            sha256,
            load_time,
            loaded_at: Utc::now(),
            backend,
            degraded,
        }
    }

    /// First 8 hex characters of the artifact hash, or `unknown`.
    pub fn short_sha(&self) -> &str {
        if self.sha256.len() >= 8 {
            &self.sha256[..8]
        } else {
            "unknown"
        }
    }

    /// Runs one forward pass on a blocking thread, with exclusive access to
    /// the interpreter.
    pub async fn invoke(&self, input: Array4<f32>) -> Result<OutputTensor, InferenceError> {
        let interpreter = Arc::clone(&self.interpreter);
        tokio::task::spawn_blocking(move || {
            let mut guard = interpreter
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.invoke(input)
        })
        .await
        .map_err(|e| InferenceError::Backend(format!("inference task failed: {}", e)))?
    }

    pub fn meta(&self) -> ModelMeta {
        let (height, width) = self.input_size;
        ModelMeta {
            labels: self.assets.labels.clone(),
            input_shape: self.input_shape.clone(),
            output_shape: self.output_shape.clone(),
            preprocess: PreprocessRecipe {
                size: [height, width],
                rgb: true,
                scale: self.assets.scale.clone(),
                resample: preprocess::RESAMPLE.to_string(),
                layout: self.layout,
            },
            model_sha: self.short_sha().to_string(),
            sha256: self.sha256.clone(),
            threshold: self.assets.threshold,
            model_load_time_ms: (self.load_time.as_secs_f64() * 100_000.0).round() / 100.0,
            loaded_at: self.loaded_at,
            backend: self.backend.clone(),
            degraded: self.degraded,
            model_config: self.assets.raw.clone(),
            version: dx_core::VERSION.to_string(),
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("labels", &self.assets.labels)
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .field("layout", &self.layout)
            .field("sha256", &self.sha256)
            .field("backend", &self.backend)
            .field("degraded", &self.degraded)
            .finish()
    }
}

type Sequence = Shared<BoxFuture<'static, Result<Arc<LoadedModel>, LoadError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle to the lazily loaded model.
pub struct ModelLoader {
    state: Arc<LoaderState>,
}

struct LoaderState {
    source: Arc<dyn ArtifactSource>,
    backend: Arc<dyn InterpreterBackend>,
    config: LoaderConfig,
    ready: OnceLock<Arc<LoadedModel>>,
    status: Mutex<ModelStatus>,
    last_error: Mutex<Option<LoadError>>,
    /// The running load sequence, cleared by the sequence itself when it ends.
    inflight: Mutex<Option<Sequence>>,
}

impl ModelLoader {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        backend: Arc<dyn InterpreterBackend>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            state: Arc::new(LoaderState {
                source,
                backend,
                config,
                ready: OnceLock::new(),
                status: Mutex::new(ModelStatus::Unloaded),
                last_error: Mutex::new(None),
                inflight: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: LoaderConfig) -> Result<Self, LoadError> {
        let source = create_source(&config)?;
        let backend = create_backend(&config)?;
        Ok(Self::new(source, backend, config))
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.state.config
    }

    pub fn status(&self) -> ModelStatus {
        *lock(&self.state.status)
    }

    pub fn last_error(&self) -> Option<LoadError> {
        lock(&self.state.last_error).clone()
    }

    /// The Ready model, without triggering a load.
    pub fn snapshot(&self) -> Option<Arc<LoadedModel>> {
        self.state.ready.get().cloned()
    }

    /// Returns the Ready model, joining the in-flight load sequence or
    /// starting one. Dropping the returned future does not cancel the load.
    pub async fn ensure_ready(&self) -> Result<Arc<LoadedModel>, LoadError> {
        if let Some(model) = self.state.ready.get() {
            return Ok(Arc::clone(model));
        }

        let sequence = {
            let mut inflight = lock(&self.state.inflight);
            if let Some(model) = self.state.ready.get() {
                return Ok(Arc::clone(model));
            }
            match inflight.as_ref() {
                Some(sequence) => sequence.clone(),
                None => {
                    let sequence = Arc::clone(&self.state).start_sequence();
                    *inflight = Some(sequence.clone());
                    sequence
                }
            }
        };

        sequence.await
    }
}

impl LoaderState {
    fn set_status(&self, status: ModelStatus) {
        *lock(&self.status) = status;
    }

    fn record_error(&self, err: Option<LoadError>) {
        *lock(&self.last_error) = err;
    }

    /// Must be called with the in-flight slot locked.
    fn start_sequence(self: Arc<Self>) -> Sequence {
        self.set_status(ModelStatus::Loading);

        let state = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let result = state.complete_sequence().await;
            *lock(&state.inflight) = None;
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let err = LoadError::Interpreter(format!("load task failed: {}", e));
                    self.record_error(Some(err.clone()));
                    self.set_status(ModelStatus::Failed);
                    *lock(&self.inflight) = None;
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn complete_sequence(&self) -> Result<Arc<LoadedModel>, LoadError> {
        let started = Instant::now();
        match self.run_sequence(started).await {
            Ok(model) => {
                self.record_error(None);
                Ok(self.publish(model))
            }
            Err(err) => match self.config.on_load_exhausted {
                LoadExhaustedPolicy::FailClosed => {
                    error!(error = %err, "Model load failed, staying unavailable");
                    self.record_error(Some(err.clone()));
                    self.set_status(ModelStatus::Failed);
                    Err(err)
                }
                LoadExhaustedPolicy::DegradeOpen => {
                    warn!(error = %err, "Model load failed, serving degraded fallback");
                    self.record_error(Some(err));
                    Ok(self.publish(self.degraded_model(started.elapsed())))
                }
            },
        }
    }

    fn publish(&self, model: LoadedModel) -> Arc<LoadedModel> {
        let model = Arc::clone(self.ready.get_or_init(|| Arc::new(model)));
        self.set_status(ModelStatus::Ready);
        model
    }

    async fn run_sequence(&self, started: Instant) -> Result<LoadedModel, LoadError> {
        let attempts = self.config.load_attempts.max(1);
        let timeout = self.config.load_timeout();
        let mut last = None;

        for attempt in 1..=attempts {
            let outcome = match tokio::time::timeout(timeout, self.fetch_artifacts()).await {
                Ok(Ok((artifact, assets))) => self.build(artifact, assets, started).await,
                Ok(Err(err)) => Err(err),
                Err(_) => Err(LoadError::Timeout(timeout)),
            };

            match outcome {
                Ok(model) => {
                    info!(
                        attempt,
                        sha = %model.short_sha(),
                        load_ms = model.load_time.as_millis() as u64,
                        "Model ready"
                    );
                    return Ok(model);
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "Model load attempt failed");
                    last = Some(err);
                    if attempt < attempts {
                        let delay = retry_delay(self.config.backoff_base(), attempt);
                        info!("Retrying model load in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(LoadError::Exhausted {
            attempts,
            last: Box::new(last.unwrap_or(LoadError::Timeout(timeout))),
        })
    }

    async fn fetch_artifacts(&self) -> Result<(PathBuf, ModelAssets), LoadError> {
        info!(source = %self.source.describe(), artifact = %self.config.hf_filename, "Fetching model");
        let artifact = self.source.fetch(&self.config.hf_filename).await?;

        let assets = match self.config.assets_filename() {
            Some(name) => {
                let path = self.source.fetch(name).await?;
                let bytes = tokio::fs::read(&path).await.map_err(|e| LoadError::Fetch {
                    filename: name.to_string(),
                    reason: e.to_string(),
                })?;
                ModelAssets::from_json(&bytes)?
            }
            None => ModelAssets::default(),
        };
        debug!(labels = ?assets.labels, threshold = assets.threshold, "Model configuration");
        Ok((artifact, assets))
    }

    /// Hashes the artifact and builds the interpreter on a blocking thread.
    /// Not subject to the attempt timeout: a blocking build cannot be
    /// cancelled, so it is always awaited.
    async fn build(
        &self,
        artifact: PathBuf,
        assets: ModelAssets,
        started: Instant,
    ) -> Result<LoadedModel, LoadError> {
        let backend = Arc::clone(&self.backend);
        let (interpreter, sha256) = tokio::task::spawn_blocking(move || {
            let sha256 = hash_file(&artifact)?;
            let interpreter = backend.load(&artifact)?;
            Ok::<_, LoadError>((interpreter, sha256))
        })
        .await
        .map_err(|e| LoadError::Interpreter(format!("loader task failed: {}", e)))??;

        if !shapes_match(&assets.input_size, interpreter.input_shape()) {
            warn!(
                expected = ?assets.input_size,
                actual = ?interpreter.input_shape(),
                "Input shape mismatch"
            );
        }

        Ok(LoadedModel::new(
            interpreter,
            assets,
            sha256,
            started.elapsed(),
            self.backend.name().to_string(),
            false,
        ))
    }

    fn degraded_model(&self, load_time: Duration) -> LoadedModel {
        let assets = ModelAssets::default();
        let interpreter = FallbackInterpreter::new(assets.input_size.clone());
        LoadedModel::new(
            Box::new(interpreter),
            assets,
            String::new(),
            load_time,
            "fallback".to_string(),
            true,
        )
    }
}

impl fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLoader")
            .field("source", &self.state.source)
            .field("backend", &self.state.backend)
            .field("status", &self.status())
            .finish()
    }
}

pub fn hash_file(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path).map_err(|e| LoadError::Fetch {
        filename: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
