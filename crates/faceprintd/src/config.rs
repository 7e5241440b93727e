use anyhow::{bail, Context};
use faceprint_core::BackendKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:$PORT, PORT defaulting to 8000).
    pub bind_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Which embedding backend to load.
    pub backend: BackendKind,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Independent model instances; each serves one extraction at a time.
    pub model_pool_size: usize,
    /// Load the model at startup instead of on the first request.
    pub warm_up: bool,
    /// Maximum request body size in MB.
    pub max_body_mb: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Allow any origin.
    pub cors_enabled: bool,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl Config {
    /// Load configuration from `FACEPRINT_*` environment variables with defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = match lookup("FACEPRINT_BIND") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("FACEPRINT_BIND is not a socket address: {addr}"))?,
            None => {
                let port = parsed(&lookup, "PORT", DEFAULT_PORT);
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let data_dir = faceprint_core::default_data_dir_with(&lookup);

        let db_path = lookup("FACEPRINT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("faces.db"));

        let model_dir = lookup("FACEPRINT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let backend = match lookup("FACEPRINT_BACKEND") {
            Some(name) => name.parse::<BackendKind>().map_err(anyhow::Error::msg)?,
            None => BackendKind::Onnx,
        };

        let similarity_threshold = parsed(&lookup, "FACEPRINT_SIMILARITY_THRESHOLD", 0.40f32);
        if !(-1.0..=1.0).contains(&similarity_threshold) {
            bail!("FACEPRINT_SIMILARITY_THRESHOLD must be within [-1, 1], got {similarity_threshold}");
        }

        Ok(Self {
            bind_addr,
            db_path,
            model_dir,
            backend,
            similarity_threshold,
            model_pool_size: parsed(&lookup, "FACEPRINT_MODEL_POOL_SIZE", 1usize).max(1),
            warm_up: flag(&lookup, "FACEPRINT_WARM_UP", false),
            max_body_mb: parsed(&lookup, "FACEPRINT_MAX_BODY_MB", 10usize),
            request_timeout_secs: parsed(&lookup, "FACEPRINT_REQUEST_TIMEOUT_SECS", 30u64),
            cors_enabled: flag(&lookup, "FACEPRINT_CORS", true),
            log_json: flag(&lookup, "FACEPRINT_LOG_JSON", false),
        })
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb * 1024 * 1024
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|v| !matches!(v.trim(), "0" | "false" | "off" | "no"))
        .unwrap_or(default)
}
