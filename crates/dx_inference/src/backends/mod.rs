use dx_core::{InferenceError, LoadError, LoaderConfig};
use ndarray::Array4;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub mod fallback;
#[cfg(feature = "onnx")]
pub mod onnx;

/// Raw output of a forward pass, flattened in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }
}

/// A loaded model that runs one fixed-shape forward pass at a time.
pub trait Interpreter: Send + fmt::Debug {
    /// Declared input shape; dynamic axes are reported as `-1`.
    fn input_shape(&self) -> &[i64];

    fn output_shape(&self) -> &[i64];

    fn invoke(&mut self, input: Array4<f32>) -> Result<OutputTensor, InferenceError>;
}

pub trait InterpreterBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Builds an interpreter from an artifact on disk. Blocking.
    fn load(&self, artifact: &Path) -> Result<Box<dyn Interpreter>, LoadError>;
}

#[cfg(feature = "onnx")]
pub fn create_backend(config: &LoaderConfig) -> Result<Arc<dyn InterpreterBackend>, LoadError> {
    Ok(Arc::new(onnx::OnnxBackend::new(config.onnx_threads)))
}

#[cfg(not(feature = "onnx"))]
pub fn create_backend(_config: &LoaderConfig) -> Result<Arc<dyn InterpreterBackend>, LoadError> {
    Err(LoadError::Interpreter(
        "no interpreter backend compiled in (enable the `onnx` feature)".to_string(),
    ))
}
