use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HF_REPO: &str = "palawakampa/tumorotak";
pub const DEFAULT_HF_FILENAME: &str = "brain_tumor.onnx";
pub const DEFAULT_ASSETS_FILENAME: &str = "assets.json";
pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MIN_DIMENSION: u32 = 32;
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

/// What the loader does once every attempt of a load sequence has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadExhaustedPolicy {
    /// Stay unavailable and report the error; the next call tries again.
    FailClosed,
    /// Mark the model ready with a fallback interpreter and flag results as degraded.
    DegradeOpen,
}

#[derive(Args, Debug, Clone)]
pub struct LoaderConfig {
    /// Model repository on the hub
    #[arg(long, env = "HF_REPO", default_value = DEFAULT_HF_REPO)]
    pub hf_repo: String,

    /// Model artifact filename inside the repository
    #[arg(long, env = "HF_FILENAME", default_value = DEFAULT_HF_FILENAME)]
    pub hf_filename: String,

    /// Companion configuration filename; pass an empty string to skip it
    #[arg(long, env = "HF_ASSETS_FILENAME", default_value = DEFAULT_ASSETS_FILENAME)]
    pub assets_filename: String,

    #[arg(long, env = "HF_REVISION", default_value = "main")]
    pub revision: String,

    #[arg(long, env = "HF_ENDPOINT", default_value = DEFAULT_HF_ENDPOINT)]
    pub hf_endpoint: String,

    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Local cache directory for downloaded artifacts
    #[arg(long, env = "MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Only read artifacts already present in the model directory
    #[arg(long, env = "OFFLINE")]
    pub offline: bool,

    #[arg(long, env = "LOAD_EXHAUSTED_POLICY", value_enum, default_value_t = LoadExhaustedPolicy::FailClosed)]
    pub on_load_exhausted: LoadExhaustedPolicy,

    #[arg(long, env = "LOAD_ATTEMPTS", default_value_t = 3)]
    pub load_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt
    #[arg(long, env = "LOAD_BACKOFF_MS", default_value_t = 2000)]
    pub load_backoff_ms: u64,

    /// Upper bound for a single load attempt
    #[arg(long, env = "LOAD_TIMEOUT_MS", default_value_t = 120_000)]
    pub load_timeout_ms: u64,

    #[arg(long, env = "ONNX_THREADS", default_value_t = 1)]
    pub onnx_threads: usize,
}

impl LoaderConfig {
    pub fn assets_filename(&self) -> Option<&str> {
        let name = self.assets_filename.trim();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.load_backoff_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            hf_repo: DEFAULT_HF_REPO.to_string(),
            hf_filename: DEFAULT_HF_FILENAME.to_string(),
            assets_filename: DEFAULT_ASSETS_FILENAME.to_string(),
            revision: "main".to_string(),
            hf_endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            hf_token: None,
            model_dir: PathBuf::from("models"),
            offline: false,
            on_load_exhausted: LoadExhaustedPolicy::FailClosed,
            load_attempts: 3,
            load_backoff_ms: 2000,
            load_timeout_ms: 120_000,
            onnx_threads: 1,
        }
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct ValidationLimits {
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    #[arg(long, env = "MIN_IMAGE_DIMENSION", default_value_t = DEFAULT_MIN_DIMENSION)]
    pub min_dimension: u32,

    #[arg(long, env = "MAX_IMAGE_DIMENSION", default_value_t = DEFAULT_MAX_DIMENSION)]
    pub max_dimension: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            min_dimension: DEFAULT_MIN_DIMENSION,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Comma separated list of allowed CORS origins, `*` for any
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// Start loading the model in the background as soon as the server starts
    #[arg(long, env = "WARM_START")]
    pub warm: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o.trim() == "*")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            warm: false,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServiceConfig {
    #[command(flatten)]
    pub loader: LoaderConfig,

    #[command(flatten)]
    pub limits: ValidationLimits,
}
