//! Mapping raw output tensors to a labelled decision.

use crate::backends::OutputTensor;
use dx_core::{InferenceError, ModelAssets};

/// Tolerance for sigmoid outputs that land a hair outside [0, 1].
const SCALAR_EPSILON: f64 = 1e-6;

/// Returns `[negative, positive]` probabilities summing to 1.
///
/// Accepts a 2-class distribution (`[1, 2]` or `[2]`) or a single
/// positive-class probability (`[1, 1]`, `[1]` or `[]`). Every other shape is
/// rejected rather than guessed at.
pub fn interpret_output(output: &OutputTensor) -> Result<[f64; 2], InferenceError> {
    let dims = match output.shape.as_slice() {
        [1, rest @ ..] if !rest.is_empty() => rest,
        dims => dims,
    };

    let expected: usize = dims.iter().product();
    if output.data.len() != expected {
        return Err(InferenceError::InvalidProbabilities(format!(
            "shape {:?} implies {} values, got {}",
            output.shape,
            expected,
            output.data.len()
        )));
    }

    let values: Vec<f64> = output.data.iter().map(|&v| v as f64).collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::InvalidProbabilities(format!(
            "non-finite output {:?}",
            values
        )));
    }

    match dims {
        [2] => {
            let (negative, positive) = (values[0], values[1]);
            let total = negative + positive;
            if negative < 0.0 || positive < 0.0 || total <= 0.0 {
                return Err(InferenceError::InvalidProbabilities(format!(
                    "not a distribution: {:?}",
                    values
                )));
            }
            Ok([negative / total, positive / total])
        }
        [] | [1] => {
            let positive = values[0];
            if positive < -SCALAR_EPSILON || positive > 1.0 + SCALAR_EPSILON {
                return Err(InferenceError::InvalidProbabilities(format!(
                    "probability {} outside [0, 1]",
                    positive
                )));
            }
            let positive = positive.clamp(0.0, 1.0);
            Ok([1.0 - positive, positive])
        }
        _ => Err(InferenceError::UnexpectedOutputShape(output.shape.clone())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub label: String,
    pub positive: bool,
    pub confidence: f64,
}

pub fn decide(probs: [f64; 2], assets: &ModelAssets) -> Decision {
    let positive = probs[1] >= assets.threshold;
    let label = if positive {
        assets.positive_label()
    } else {
        assets.negative_label()
    };
    Decision {
        label: label.to_string(),
        positive,
        confidence: probs[0].max(probs[1]),
    }
}
