pub mod assets;
pub mod config;
pub mod error;
pub mod types;

pub use assets::ModelAssets;
pub use config::{LoadExhaustedPolicy, LoaderConfig, ServerConfig, ServiceConfig, ValidationLimits};
pub use error::{Error, InferenceError, LoadError, Result, ValidationError};
pub use types::{
    ModelMeta, ModelStatus, PredictionRequest, PredictionResult, PreprocessRecipe, ProcessingTimes,
    TensorLayout,
};

/// Version reported by the debug endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
