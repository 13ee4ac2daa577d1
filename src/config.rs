//! Configuration for taxplan-crm

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CrmError;

/// Minimum length for the download-ticket signing secret outside dev mode
pub const MIN_SECRET_LEN: usize = 32;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taxplan-crm")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding crm.db and uploaded documents
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Address the HTTP API binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Public URL of the client portal, used in magic links
    #[serde(default = "default_portal_base_url")]
    pub portal_base_url: String,

    /// Lifetime of portal access tokens in days
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: u32,

    /// Lifetime of signed download tickets in seconds
    #[serde(default = "default_download_url_ttl_secs")]
    pub download_url_ttl_secs: u64,

    /// HMAC secret for download tickets
    #[serde(default)]
    pub signing_secret: String,

    /// Optional HTTP relay that accepts outbound mail as JSON
    #[serde(default)]
    pub mail_relay_url: Option<String>,

    /// Sender address for outbound mail
    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    /// Largest accepted upload in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8095
}

fn default_portal_base_url() -> String {
    "http://localhost:4200/portal".to_string()
}

fn default_token_ttl_days() -> u32 {
    30
}

fn default_download_url_ttl_secs() -> u64 {
    300
}

fn default_mail_from() -> String {
    "no-reply@taxplan.local".to_string()
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            portal_base_url: default_portal_base_url(),
            token_ttl_days: default_token_ttl_days(),
            download_url_ttl_secs: default_download_url_ttl_secs(),
            signing_secret: String::new(),
            mail_relay_url: None,
            mail_from: default_mail_from(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject settings the server cannot run safely with
    pub fn validate(&self, dev_mode: bool) -> Result<(), CrmError> {
        if !dev_mode && self.signing_secret.len() < MIN_SECRET_LEN {
            return Err(CrmError::Config(format!(
                "signing_secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if self.token_ttl_days == 0 {
            return Err(CrmError::Config("token_ttl_days must be positive".into()));
        }
        if self.download_url_ttl_secs == 0 {
            return Err(CrmError::Config("download_url_ttl_secs must be positive".into()));
        }
        Ok(())
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
