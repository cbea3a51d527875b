pub mod backends;
pub mod classifier;
pub mod loader;
pub mod postprocess;
pub mod preprocess;
pub mod sources;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backends::{create_backend, Interpreter, InterpreterBackend, OutputTensor};
pub use classifier::Classifier;
pub use loader::{hash_file, retry_delay, LoadedModel, ModelLoader};
pub use sources::{create_source, ArtifactSource, HubSource, LocalSource};

pub mod prelude {
    pub use super::{Classifier, LoadedModel, ModelLoader};
    pub use dx_core::{Error, PredictionRequest, PredictionResult, Result};
}
