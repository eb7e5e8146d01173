use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration for the sync service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Local storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Local storage configuration (queue database and persisted remote config)
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the queue database and persisted remote config
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// API configuration for the capture/gallery endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "snapvault".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/snapvault").required(false))
            .add_source(config::File::with_name("/etc/snapvault/snapvault").required(false))
            // Override with environment variables
            // SNAPVAULT__STORAGE__DATA_DIR -> storage.data_dir
            .add_source(
                config::Environment::with_prefix("SNAPVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Path of the SQLite database backing the pending-media queue
    pub fn queue_db_path(&self) -> PathBuf {
        self.storage.data_dir.join("pending_media.db")
    }

    /// Path of the persisted remote store configuration
    pub fn remote_config_path(&self) -> PathBuf {
        self.storage.data_dir.join("remote_config.json")
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.storage.presigned_url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// Connection parameters for the S3-compatible remote store.
///
/// Editable at runtime through the settings endpoint and persisted as
/// JSON in the data directory. A config is usable only when complete;
/// incomplete configs are rejected before any network call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Endpoint URL (MinIO, R2, LocalStack, or blank defaults handled upstream)
    #[serde(default)]
    pub endpoint: String,
    /// Bucket name
    #[serde(default)]
    pub bucket: String,
    /// Region; optional depending on the target store
    #[serde(default)]
    pub region: String,
    /// Access key ID
    #[serde(default)]
    pub access_key: String,
    /// Secret access key
    #[serde(default)]
    pub secret_key: String,
}

impl RemoteConfig {
    /// Check that every required field is non-empty after trimming.
    ///
    /// Region is not required; stores like MinIO and R2 accept a
    /// placeholder.
    pub fn ensure_complete(&self) -> Result<(), SyncError> {
        let required: [(&'static str, &str); 4] = [
            ("endpoint", &self.endpoint),
            ("bucket", &self.bucket),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::ConfigIncomplete { field });
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.ensure_complete().is_ok()
    }

    /// Region to hand the SDK, with a placeholder when blank.
    pub fn region_or_default(&self) -> &str {
        let region = self.region.trim();
        if region.is_empty() {
            "us-east-1"
        } else {
            region
        }
    }
}

/// Simple key-value persistence for the runtime-editable [`RemoteConfig`].
///
/// Stored as a JSON file in the data directory; not transactional.
pub struct RemoteConfigStore {
    path: PathBuf,
}

impl RemoteConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted config, or `None` if nothing was saved yet.
    pub async fn load(&self) -> Result<Option<RemoteConfig>, SyncError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted remote config");
                return Ok(None);
            }
            Err(e) => return Err(SyncError::persistence(e)),
        };

        let config: RemoteConfig =
            serde_json::from_slice(&bytes).map_err(SyncError::persistence)?;
        Ok(Some(config))
    }

    /// Persist the config, replacing any previous value.
    pub async fn save(&self, config: &RemoteConfig) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SyncError::persistence)?;
        }

        let bytes = serde_json::to_vec_pretty(config).map_err(SyncError::persistence)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(SyncError::persistence)?;

        info!(path = %self.path.display(), complete = config.is_complete(), "Remote config saved");
        Ok(())
    }
}
