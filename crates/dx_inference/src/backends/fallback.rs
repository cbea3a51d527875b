use super::{Interpreter, OutputTensor};
use dx_core::InferenceError;
use ndarray::Array4;
use std::fmt;

/// Distribution served while degraded: `[negative, positive]`.
pub const FALLBACK_DISTRIBUTION: [f32; 2] = [0.7, 0.3];

/// Stands in for the real model when loading failed under the degrade-open policy.
pub struct FallbackInterpreter {
    input_shape: Vec<i64>,
    output_shape: Vec<i64>,
}

impl FallbackInterpreter {
    pub fn new(input_shape: Vec<i64>) -> Self {
        Self {
            input_shape,
            output_shape: vec![1, 2],
        }
    }
}

impl fmt::Debug for FallbackInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackInterpreter")
            .field("input_shape", &self.input_shape)
            .finish()
    }
}

impl Interpreter for FallbackInterpreter {
    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    fn invoke(&mut self, _input: Array4<f32>) -> Result<OutputTensor, InferenceError> {
        Ok(OutputTensor::new(vec![1, 2], FALLBACK_DISTRIBUTION.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_output() {
        let mut interpreter = FallbackInterpreter::new(vec![1, 224, 224, 3]);
        let output = interpreter.invoke(Array4::zeros((1, 224, 224, 3))).unwrap();
        assert_eq!(output.shape, vec![1, 2]);
        assert_eq!(output.data, vec![0.7, 0.3]);
    }
}
