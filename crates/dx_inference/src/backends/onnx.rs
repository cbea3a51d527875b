//! ONNX Runtime interpreter backend

use super::{Interpreter, InterpreterBackend, OutputTensor};
use dx_core::{InferenceError, LoadError};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{Tensor, ValueType};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

fn load_error(e: impl fmt::Display) -> LoadError {
    LoadError::Interpreter(e.to_string())
}

fn backend_error(e: impl fmt::Display) -> InferenceError {
    InferenceError::Backend(e.to_string())
}

fn tensor_dims(value_type: &ValueType) -> Vec<i64> {
    value_type
        .tensor_shape()
        .map(|shape| shape.iter().copied().collect())
        .unwrap_or_default()
}

/// Builds ONNX Runtime sessions
pub struct OnnxBackend {
    /// Intra-op threads per session
    threads: usize,
}

impl OnnxBackend {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }
}

impl fmt::Debug for OnnxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxBackend")
            .field("threads", &self.threads)
            .finish()
    }
}

impl InterpreterBackend for OnnxBackend {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    fn load(&self, artifact: &Path) -> Result<Box<dyn Interpreter>, LoadError> {
        info!(path = %artifact.display(), threads = self.threads, "Loading ONNX model");

        let session = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?
            .with_intra_threads(self.threads)
            .map_err(load_error)?
            .commit_from_file(artifact)
            .map_err(load_error)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| LoadError::Interpreter("model declares no inputs".to_string()))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| LoadError::Interpreter("model declares no outputs".to_string()))?;

        let input_name = input.name.clone();
        let input_shape = tensor_dims(&input.input_type);
        let output_name = output.name.clone();
        let output_shape = tensor_dims(&output.output_type);

        info!(
            input = %input_name,
            input_shape = ?input_shape,
            output = %output_name,
            output_shape = ?output_shape,
            "ONNX model loaded"
        );

        Ok(Box::new(OnnxInterpreter {
            session,
            input_name,
            input_shape,
            output_name,
            output_shape,
        }))
    }
}

pub struct OnnxInterpreter {
    session: Session,
    input_name: String,
    input_shape: Vec<i64>,
    output_name: String,
    output_shape: Vec<i64>,
}

impl fmt::Debug for OnnxInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxInterpreter")
            .field("session", &"<ort::Session>")
            .field("input_name", &self.input_name)
            .field("input_shape", &self.input_shape)
            .field("output_name", &self.output_name)
            .field("output_shape", &self.output_shape)
            .finish()
    }
}

impl Interpreter for OnnxInterpreter {
    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    fn invoke(&mut self, input: Array4<f32>) -> Result<OutputTensor, InferenceError> {
        let input = if input.is_standard_layout() {
            input
        } else {
            input.as_standard_layout().into_owned()
        };
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let (data, _) = input.into_raw_vec_and_offset();
        let tensor = Tensor::from_array((shape, data)).map_err(backend_error)?;

        let outputs = self
            .session
            .run(ort::inputs![&self.input_name => tensor])
            .map_err(backend_error)?;

        let value = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            InferenceError::Backend(format!("output '{}' missing from results", self.output_name))
        })?;
        let (shape, data) = value.try_extract_tensor::<f32>().map_err(backend_error)?;
        let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        debug!(shape = ?shape, "ONNX forward pass complete");
        Ok(OutputTensor::new(shape, data.to_vec()))
    }
}
