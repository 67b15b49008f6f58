//! Client configuration management
//!
//! Configuration is stored in TOML format at `~/.ipagrab/config.toml`. Every
//! field has a sensible default, so a missing file behaves like a fresh
//! install. The data directory holding secrets, cookies and the artifact
//! cache defaults to `~/.ipagrab` and can be relocated with `IPAGRAB_DATA_DIR`
//! (useful for testing).
//!
//! # Examples
//!
//! ```no_run
//! use ipagrab::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! println!("search limit: {}", config.search.max_limit);
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// User configuration file (`~/.ipagrab/config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote endpoint settings
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Network and TLS settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Data directory override; normally resolved from the environment
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Base URLs for the store endpoints.
///
/// These only ever change when pointing the client at a mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_store_url")]
    pub store_url: String,

    #[serde(default = "default_download_url")]
    pub download_url: String,
}

fn default_api_url() -> String {
    crate::constants::ITUNES_API_URL.to_string()
}

fn default_store_url() -> String {
    crate::constants::PRIVATE_STORE_URL.to_string()
}

fn default_download_url() -> String {
    crate::constants::PRIVATE_DOWNLOAD_URL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Timeout for protocol calls, in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Timeout for binary fetches, in seconds. Bounded but generous; IPA
    /// packages regularly exceed a gigabyte.
    #[serde(default = "default_download_timeout_seconds")]
    pub download_timeout_seconds: u64,

    /// Disable TLS certificate verification. Unsafe; debugging only.
    /// Also settable with `IPAGRAB_SSL_NO_VERIFY=1`.
    #[serde(default)]
    pub ssl_no_verify: bool,

    /// Custom CA bundle (PEM) consulted for all outbound TLS.
    /// Also settable with `IPAGRAB_CA_BUNDLE`.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,

    /// User agent presented to the store
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_download_timeout_seconds() -> u64 {
    3600
}

fn default_user_agent() -> String {
    crate::constants::DEFAULT_USER_AGENT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Inclusive lower bound for the search result limit
    #[serde(default = "default_min_limit")]
    pub min_limit: u32,

    /// Inclusive upper bound for the search result limit
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Parallelism for batched version-metadata fetches
    #[serde(default = "default_batch_workers")]
    pub batch_workers: usize,
}

fn default_min_limit() -> u32 {
    1
}

fn default_max_limit() -> u32 {
    50
}

fn default_batch_workers() -> usize {
    8
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            store_url: default_store_url(),
            download_url: default_download_url(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            download_timeout_seconds: default_download_timeout_seconds(),
            ssl_no_verify: false,
            ca_bundle: None,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_limit: default_min_limit(),
            max_limit: default_max_limit(),
            batch_workers: default_batch_workers(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            network: NetworkConfig::default(),
            search: SearchConfig::default(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Get the data directory holding secrets, cookies and the cache
    ///
    /// Uses, in order: `IPAGRAB_DATA_DIR`, the `data_dir` config field,
    /// `~/.ipagrab`.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("IPAGRAB_DATA_DIR") {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }

        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Other("could not find home directory".to_string()))?;
        Ok(home.join(".ipagrab"))
    }

    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("IPAGRAB_DATA_DIR") {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir).join("config.toml"));
            }
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Other("could not find home directory".to_string()))?;
        Ok(home.join(".ipagrab").join("config.toml"))
    }

    /// Load config from file, or create default if it doesn't exist
    ///
    /// Environment variable overrides:
    /// - `IPAGRAB_DATA_DIR`: relocates the data directory
    /// - `IPAGRAB_SSL_NO_VERIFY=1`: disables TLS verification
    /// - `IPAGRAB_CA_BUNDLE`: custom CA bundle path
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;

        let mut config = if !path.exists() {
            Self::default()
        } else {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        };

        if std::env::var("IPAGRAB_SSL_NO_VERIFY").as_deref() == Ok("1") {
            config.network.ssl_no_verify = true;
        }

        if let Ok(bundle) = std::env::var("IPAGRAB_CA_BUNDLE") {
            if !bundle.is_empty() {
                config.network.ca_bundle = Some(PathBuf::from(bundle));
            }
        }

        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Clamp a requested search limit to the configured inclusive range.
    pub fn clamp_search_limit(&self, limit: u32) -> u32 {
        limit.clamp(self.search.min_limit, self.search.max_limit)
    }
}
