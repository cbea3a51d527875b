use super::{fetch_error, ArtifactSource};
use async_trait::async_trait;
use dx_core::{LoadError, LoaderConfig};
use reqwest::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Downloads artifacts from a Hugging Face style hub and caches them on disk.
pub struct HubSource {
    client: Client,
    endpoint: Url,
    repo: String,
    revision: String,
    token: Option<String>,
    cache_dir: PathBuf,
}

impl HubSource {
    pub fn new(config: &LoaderConfig) -> Result<Self, LoadError> {
        let mut endpoint = Url::parse(&config.hf_endpoint)
            .map_err(|e| LoadError::Config(format!("invalid hub endpoint '{}': {}", config.hf_endpoint, e)))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            endpoint,
            repo: config.hf_repo.trim_matches('/').to_string(),
            revision: config.revision.clone(),
            token: config.hf_token.clone().filter(|t| !t.is_empty()),
            cache_dir: config.model_dir.clone(),
        })
    }

    pub fn artifact_url(&self, filename: &str) -> Result<Url, LoadError> {
        let path = format!("{}/resolve/{}/{}", self.repo, self.revision, filename);
        self.endpoint
            .join(&path)
            .map_err(|e| fetch_error(filename, format!("cannot build URL: {}", e)))
    }

    pub fn cache_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename)
    }

    async fn cached(path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }
}

impl fmt::Debug for HubSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubSource")
            .field("client", &"<reqwest::Client>")
            .field("endpoint", &self.endpoint.as_str())
            .field("repo", &self.repo)
            .field("revision", &self.revision)
            .field("token", &self.token.as_deref().map(|_| "<redacted>"))
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

#[async_trait]
impl ArtifactSource for HubSource {
    fn describe(&self) -> String {
        format!("{}{}@{}", self.endpoint, self.repo, self.revision)
    }

    async fn fetch(&self, filename: &str) -> Result<PathBuf, LoadError> {
        let target = self.cache_path(filename);
        if Self::cached(&target).await {
            debug!(path = %target.display(), "Using cached artifact");
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fetch_error(filename, e))?;
        }

        let url = self.artifact_url(filename)?;
        info!(url = %url, "Downloading artifact");

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_error(filename, e))?;
        let bytes = response.bytes().await.map_err(|e| fetch_error(filename, e))?;
        if bytes.is_empty() {
            return Err(fetch_error(filename, "server returned an empty body"));
        }

        let partial = target.with_file_name(format!(
            "{}.part",
            target.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
        ));
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| fetch_error(filename, e))?;
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| fetch_error(filename, e))?;

        info!(path = %target.display(), bytes = bytes.len(), "Artifact cached");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{header::AUTHORIZATION, HeaderMap};
    use axum::routing::get;
    use axum::Router;
    use std::sync::{Arc, Mutex};

    fn config(dir: &Path) -> LoaderConfig {
        LoaderConfig {
            hf_repo: "palawakampa/tumorotak".to_string(),
            hf_filename: "brain_tumor.onnx".to_string(),
            hf_endpoint: "https://hub.example/mirror".to_string(),
            hf_token: Some("secret".to_string()),
            model_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_artifact_url() {
        let dir = tempfile::tempdir().unwrap();
        let source = HubSource::new(&config(dir.path())).unwrap();
        let url = source.artifact_url("brain_tumor.onnx").unwrap();
        assert_eq!(
            url.as_str(),
            "https://hub.example/mirror/palawakampa/tumorotak/resolve/main/brain_tumor.onnx"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let dir = tempfile::tempdir().unwrap();
        let source = HubSource::new(&config(dir.path())).unwrap();
        let debug = format!("{:?}", source);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_cached_artifact_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("brain_tumor.onnx"), b"onnx-bytes").unwrap();
        // Unroutable endpoint: a network attempt would fail the test.
        let mut cfg = config(dir.path());
        cfg.hf_endpoint = "http://127.0.0.1:9".to_string();
        let source = HubSource::new(&cfg).unwrap();

        let path = source.fetch("brain_tumor.onnx").await.unwrap();
        assert_eq!(path, dir.path().join("brain_tumor.onnx"));
    }

    type SeenAuth = Arc<Mutex<Vec<Option<String>>>>;

    async fn weights(State(seen): State<SeenAuth>, headers: HeaderMap) -> &'static [u8] {
        let auth = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock().unwrap().push(auth);
        b"onnx weights"
    }

    /// Local hub serving `org/model` at revision `main`.
    async fn spawn_hub() -> (String, SeenAuth) {
        let seen = SeenAuth::default();
        let app = Router::new()
            .route("/org/model/resolve/main/model.onnx", get(weights))
            .route("/org/model/resolve/main/empty.onnx", get(|| async { "" }))
            .with_state(Arc::clone(&seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    fn hub_config(endpoint: &str, dir: &Path) -> LoaderConfig {
        LoaderConfig {
            hf_repo: "org/model".to_string(),
            hf_endpoint: endpoint.to_string(),
            hf_token: Some("secret".to_string()),
            model_dir: dir.join("cache"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_download_caches_artifact() {
        let (endpoint, seen) = spawn_hub().await;
        let dir = tempfile::tempdir().unwrap();
        let source = HubSource::new(&hub_config(&endpoint, dir.path())).unwrap();

        let path = source.fetch("model.onnx").await.unwrap();

        assert_eq!(path, dir.path().join("cache").join("model.onnx"));
        assert_eq!(std::fs::read(&path).unwrap(), b"onnx weights");
        assert!(!dir.path().join("cache").join("model.onnx.part").exists());
        assert_eq!(*seen.lock().unwrap(), vec![Some("Bearer secret".to_string())]);

        // Second fetch is served from the cache.
        source.fetch("model.onnx").await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_download_without_token() {
        let (endpoint, seen) = spawn_hub().await;
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = hub_config(&endpoint, dir.path());
        cfg.hf_token = None;
        let source = HubSource::new(&cfg).unwrap();

        source.fetch("model.onnx").await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_fetch_error() {
        let (endpoint, _) = spawn_hub().await;
        let dir = tempfile::tempdir().unwrap();
        let source = HubSource::new(&hub_config(&endpoint, dir.path())).unwrap();

        match source.fetch("missing.onnx").await {
            Err(LoadError::Fetch { filename, reason }) => {
                assert_eq!(filename, "missing.onnx");
                assert!(reason.contains("404"), "unexpected reason: {}", reason);
            }
            other => panic!("expected fetch error, got {:?}", other),
        }
        assert!(!dir.path().join("cache").join("missing.onnx").exists());
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let (endpoint, _) = spawn_hub().await;
        let dir = tempfile::tempdir().unwrap();
        let source = HubSource::new(&hub_config(&endpoint, dir.path())).unwrap();

        let err = source.fetch("empty.onnx").await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch { .. }));
        assert!(!dir.path().join("cache").join("empty.onnx").exists());
        assert!(!dir.path().join("cache").join("empty.onnx.part").exists());
    }

    #[test]
    fn test_invalid_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.hf_endpoint = "not a url".to_string();
        assert!(matches!(HubSource::new(&cfg), Err(LoadError::Config(_))));
    }
}
