use std::time::Duration;
use thiserror::Error;

/// Problems with the uploaded image itself. Always the caller's fault.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("File must be JPG or PNG image (got {0}).")]
    UnsupportedContentType(String),

    #[error("Empty file uploaded.")]
    EmptyFile,

    #[error("File too large ({size} bytes). Maximum {max} bytes allowed.")]
    FileTooLarge { size: usize, max: usize },

    #[error("Image too small ({width}x{height}). Minimum {min}x{min} pixels.")]
    ImageTooSmall { width: u32, height: u32, min: u32 },

    #[error("Image too large ({width}x{height}). Maximum {max}x{max} pixels.")]
    ImageTooLarge { width: u32, height: u32, max: u32 },

    #[error("Error processing image: {0}")]
    UndecodableImage(String),

    #[error("Malformed base64 image: {0}")]
    InvalidBase64(String),

    #[error("No image provided: {0}")]
    MissingImage(String),
}

/// Failure to bring the model to the Ready state.
///
/// Cloneable so every caller waiting on the same load sequence receives
/// the same error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("failed to fetch artifact '{filename}': {reason}")]
    Fetch { filename: String, reason: String },

    #[error("invalid model configuration: {0}")]
    Config(String),

    #[error("failed to initialize interpreter: {0}")]
    Interpreter(String),

    #[error("load attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("model load failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<LoadError> },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Unexpected model output shape: {0:?}")]
    UnexpectedOutputShape(Vec<usize>),

    #[error("Invalid model output: {0}")]
    InvalidProbabilities(String),

    #[error("Inference failed: {0}")]
    Backend(String),
}

/// Everything a prediction can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Model not ready: {0}")]
    Load(#[from] LoadError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

pub type Result<T> = std::result::Result<T, Error>;
