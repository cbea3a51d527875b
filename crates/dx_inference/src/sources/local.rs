use super::{fetch_error, ArtifactSource};
use async_trait::async_trait;
use dx_core::LoadError;
use std::path::PathBuf;

/// Serves artifacts that already sit in a local directory.
#[derive(Debug, Clone)]
pub struct LocalSource {
    dir: PathBuf,
}

impl LocalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactSource for LocalSource {
    fn describe(&self) -> String {
        format!("file://{}", self.dir.display())
    }

    async fn fetch(&self, filename: &str) -> Result<PathBuf, LoadError> {
        let path = self.dir.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(fetch_error(filename, format!("{} is not a file", path.display()))),
            Err(e) => Err(fetch_error(filename, format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("assets.json"), b"{}").unwrap();
        let source = LocalSource::new(dir.path());

        assert!(source.fetch("assets.json").await.is_ok());
        let err = source.fetch("missing.onnx").await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch { ref filename, .. } if filename == "missing.onnx"));
    }
}
