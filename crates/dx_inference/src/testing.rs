//! In-memory artifact sources and scripted interpreters for tests.

use crate::backends::{Interpreter, InterpreterBackend, OutputTensor};
use crate::sources::{fetch_error, ArtifactSource};
use async_trait::async_trait;
use dx_core::{InferenceError, LoadError, LoaderConfig};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MOCK_MODEL: &str = "model.onnx";
pub const MOCK_ASSETS: &str = "assets.json";

/// Loader settings with millisecond backoff, pointed at [`MockSource`] files.
pub fn fast_config() -> LoaderConfig {
    LoaderConfig {
        hf_filename: MOCK_MODEL.to_string(),
        assets_filename: MOCK_ASSETS.to_string(),
        load_attempts: 3,
        load_backoff_ms: 1,
        load_timeout_ms: 5_000,
        ..Default::default()
    }
}

/// Encodes a solid-colour image.
pub fn encode_image(width: u32, height: u32, format: ImageFormat, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, format)
        .expect("in-memory encoding cannot fail");
    buffer.into_inner()
}

/// Serves files from a temporary directory, counting fetches and optionally
/// failing or stalling the model download.
pub struct MockSource {
    dir: tempfile::TempDir,
    fetches: Mutex<HashMap<String, usize>>,
    failures_left: AtomicU32,
    delay: Duration,
}

impl MockSource {
    pub fn new() -> Self {
        Self::with_assets(r#"{"labels": ["No Tumor", "Tumor"], "threshold": 0.5, "input_size": [1, 224, 224, 3]}"#)
    }

    pub fn with_assets(json: &str) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");
        std::fs::write(dir.path().join(MOCK_MODEL), b"mock model weights").expect("write model");
        std::fs::write(dir.path().join(MOCK_ASSETS), json).expect("write assets");
        Self {
            dir,
            fetches: Mutex::new(HashMap::new()),
            failures_left: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    /// The next `count` model fetches fail.
    pub fn failing(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn fetch_count(&self, filename: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(filename)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSource")
            .field("dir", &self.dir.path())
            .finish()
    }
}

#[async_trait]
impl ArtifactSource for MockSource {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn fetch(&self, filename: &str) -> Result<PathBuf, LoadError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if filename == MOCK_MODEL {
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(fetch_error(filename, "503 Service Unavailable"));
            }
        }

        let path = self.dir.path().join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(fetch_error(filename, "404 Not Found"))
        }
    }
}

/// Produces interpreters that answer every forward pass with a fixed tensor.
pub struct ScriptedBackend {
    input_shape: Vec<i64>,
    output: OutputTensor,
    load_delay: Duration,
    loads: AtomicUsize,
    active_loads: AtomicUsize,
    max_active_loads: AtomicUsize,
    invocations: Arc<AtomicUsize>,
    last_input_shape: Arc<Mutex<Option<Vec<usize>>>>,
}

impl ScriptedBackend {
    pub fn new(output: OutputTensor) -> Self {
        Self {
            input_shape: vec![1, 224, 224, 3],
            output,
            load_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            active_loads: AtomicUsize::new(0),
            max_active_loads: AtomicUsize::new(0),
            invocations: Arc::new(AtomicUsize::new(0)),
            last_input_shape: Arc::new(Mutex::new(None)),
        }
    }

    pub fn two_class(probs: [f32; 2]) -> Self {
        Self::new(OutputTensor::new(vec![1, 2], probs.to_vec()))
    }

    pub fn scalar(prob: f32) -> Self {
        Self::new(OutputTensor::new(vec![1, 1], vec![prob]))
    }

    pub fn with_input_shape(mut self, shape: Vec<i64>) -> Self {
        self.input_shape = shape;
        self
    }

    /// Every `load` blocks its thread for `delay`.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Highest number of `load` calls that were running at the same time.
    pub fn max_concurrent_loads(&self) -> usize {
        self.max_active_loads.load(Ordering::SeqCst)
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn last_input_shape(&self) -> Option<Vec<usize>> {
        self.last_input_shape.lock().unwrap().clone()
    }
}

impl fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("input_shape", &self.input_shape)
            .field("output", &self.output)
            .finish()
    }
}

impl InterpreterBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn load(&self, _artifact: &Path) -> Result<Box<dyn Interpreter>, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let active = self.active_loads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_loads.fetch_max(active, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        self.active_loads.fetch_sub(1, Ordering::SeqCst);

        let output_shape = self.output.shape.iter().map(|&d| d as i64).collect();
        Ok(Box::new(ScriptedInterpreter {
            input_shape: self.input_shape.clone(),
            output_shape,
            output: self.output.clone(),
            invocations: Arc::clone(&self.invocations),
            last_input_shape: Arc::clone(&self.last_input_shape),
        }))
    }
}

#[derive(Debug)]
pub struct ScriptedInterpreter {
    input_shape: Vec<i64>,
    output_shape: Vec<i64>,
    output: OutputTensor,
    invocations: Arc<AtomicUsize>,
    last_input_shape: Arc<Mutex<Option<Vec<usize>>>>,
}

impl Interpreter for ScriptedInterpreter {
    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    fn invoke(&mut self, input: Array4<f32>) -> Result<OutputTensor, InferenceError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_input_shape.lock().unwrap() = Some(input.shape().to_vec());
        Ok(self.output.clone())
    }
}
