//! Configuration settings structs and their defaults.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::DEFAULT_MEMORY_CACHE_SIZE;
use crate::decode::ContentKind;
use crate::executor::{PoolConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT};
use crate::source::{DEFAULT_KEY_NAME, DEFAULT_TILE_PATH};
use crate::transport::{
    RetryReporting, TransportConfig, DEFAULT_BACKOFF_UNIT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT,
};

/// Name of the configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".tilefetch";

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Get the path to the config directory (~/.tilefetch).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the path to the config file (~/.tilefetch/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Default disk cache directory (~/.tilefetch/cache).
pub fn default_cache_directory() -> PathBuf {
    config_directory().join("cache")
}

/// Complete configuration for a fetch pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchConfig {
    pub source: SourceSettings,
    /// Extra request headers, in file order.
    pub headers: Vec<(String, String)>,
    pub transport: TransportSettings,
    pub cache: CacheSettings,
    pub workers: WorkerSettings,
}

/// `[source]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub url: Option<String>,
    /// Alternative to `url`: one entry per server, each entry a list of
    /// equivalent URLs.
    pub servers: Vec<Vec<String>>,
    pub fallback_url: Option<String>,
    pub path: String,
    pub key_name: String,
    pub api_key: Option<String>,
    pub content: ContentKind,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub tms: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: None,
            servers: Vec::new(),
            fallback_url: None,
            path: DEFAULT_TILE_PATH.to_string(),
            key_name: DEFAULT_KEY_NAME.to_string(),
            api_key: None,
            content: ContentKind::Bitmap,
            min_zoom: 0,
            max_zoom: 20,
            tms: false,
        }
    }
}

/// `[transport]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Seconds.
    pub connect_timeout: u64,
    /// Seconds.
    pub request_timeout: u64,
    pub max_retries: u32,
    pub backoff_unit_ms: u64,
    pub retry_reporting: RetryReporting,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit_ms: DEFAULT_BACKOFF_UNIT.as_millis() as u64,
            retry_reporting: RetryReporting::default(),
        }
    }
}

impl TransportSettings {
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
            max_retries: self.max_retries,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            reporting: self.retry_reporting,
        }
    }
}

/// Which cache store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKind {
    None,
    #[default]
    Memory,
    Disk,
}

impl CacheKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::None => "none",
            CacheKind::Memory => "memory",
            CacheKind::Disk => "disk",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(CacheKind::None),
            "memory" => Ok(CacheKind::Memory),
            "disk" => Ok(CacheKind::Disk),
            other => Err(format!("unknown cache kind '{}'", other)),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub kind: CacheKind,
    pub directory: PathBuf,
    /// Bytes.
    pub memory_size: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            kind: CacheKind::default(),
            directory: default_cache_directory(),
            memory_size: DEFAULT_MEMORY_CACHE_SIZE,
        }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub count: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl WorkerSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.count,
            queue_capacity: self.queue_capacity,
        }
    }
}
