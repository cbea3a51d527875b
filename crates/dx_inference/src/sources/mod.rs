use async_trait::async_trait;
use dx_core::{LoadError, LoaderConfig};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub mod hub;
pub mod local;

pub use hub::HubSource;
pub use local::LocalSource;

/// Where model artifacts come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync + fmt::Debug {
    fn describe(&self) -> String;

    /// Makes `filename` available on local disk and returns its path.
    async fn fetch(&self, filename: &str) -> Result<PathBuf, LoadError>;
}

pub fn create_source(config: &LoaderConfig) -> Result<Arc<dyn ArtifactSource>, LoadError> {
    if config.offline {
        Ok(Arc::new(LocalSource::new(config.model_dir.clone())))
    } else {
        Ok(Arc::new(HubSource::new(config)?))
    }
}

pub(crate) fn fetch_error(filename: &str, reason: impl fmt::Display) -> LoadError {
    LoadError::Fetch {
        filename: filename.to_string(),
        reason: reason.to_string(),
    }
}
