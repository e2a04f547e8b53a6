use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{CaError, CaResult};
use crate::pki_generator::{SubjectTemplate, DEFAULT_RSA_BITS, DEFAULT_TTL_DAYS};

/// Files tried, in order, when no `--config` is given.
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["config.toml", "config/application.toml"];

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_root_cert_path")]
    pub root_cert_path: PathBuf,
    #[serde(default = "default_root_key_path")]
    pub root_cert_private_key_path: PathBuf,
    /// Default certificate lifetime in days.
    #[serde(default = "default_cert_ttl")]
    pub cert_ttl: u32,
    #[serde(default = "default_key_rsa_bits")]
    pub key_rsa_bits: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub certificate_subject: SubjectTemplate,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            root_cert_path: default_root_cert_path(),
            root_cert_private_key_path: default_root_key_path(),
            cert_ttl: default_cert_ttl(),
            key_rsa_bits: default_key_rsa_bits(),
            sweep_interval_secs: default_sweep_interval(),
            certificate_subject: SubjectTemplate::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS is enabled only when both paths are set.
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            tls_cert_path: None,
            tls_key_path: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// JSON collection file. In-memory storage when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_request_timeout() -> u64 {
    30
}

fn default_root_cert_path() -> PathBuf {
    PathBuf::from("root.crt")
}

fn default_root_key_path() -> PathBuf {
    PathBuf::from("root.key")
}

fn default_cert_ttl() -> u32 {
    DEFAULT_TTL_DAYS
}

fn default_key_rsa_bits() -> u32 {
    DEFAULT_RSA_BITS
}

fn default_sweep_interval() -> u64 {
    60 // once a minute
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> CaResult<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|e| {
            CaError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&config_str).map_err(|e| {
            CaError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    pub fn from_toml(text: &str) -> CaResult<Self> {
        toml::from_str(text)
            .map_err(|e| CaError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Load `explicit` if given, otherwise the first of [`CONFIG_SEARCH_PATHS`] that exists,
    /// otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> CaResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match CONFIG_SEARCH_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.is_file())
        {
            Some(path) => {
                info!(path = %path.display(), "loading configuration");
                Self::from_file(path)
            }
            None => {
                info!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
