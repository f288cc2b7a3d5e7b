//! Configuration file support.
//!
//! Settings live in an INI file at `~/.tilefetch/config.ini`:
//!
//! ```ini
//! [source]
//! url = https://tiles.example.com
//! path = /{Z}/{X}/{Y}.png
//! api_key = your_key
//!
//! [transport]
//! max_retries = 5
//!
//! [cache]
//! kind = memory
//! memory_size = 256MB
//! ```
//!
//! A missing file yields the defaults; any value that fails to parse is
//! reported with its section and key.

mod parser;
mod settings;
mod writer;

pub use parser::parse_size;
pub use settings::{
    config_directory, config_file_path, default_cache_directory, CacheKind, CacheSettings,
    FetchConfig, SourceSettings, TransportSettings, WorkerSettings, CONFIG_DIR_NAME,
    CONFIG_FILE_NAME,
};
pub use writer::format_size;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ini::Ini;
use thiserror::Error;

use crate::cache::{DiskTileCache, MemoryTileCache, TileCache};
use crate::executor::PoolConfig;
use crate::source::{ServerDns, SourceError, TileSource, TileSourceBuilder};
use crate::transport::TransportConfig;

/// Errors that can occur when loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl FetchConfig {
    /// Load configuration from the default path (~/.tilefetch/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// The commented INI text `save_to` writes.
    pub fn to_config_string(&self) -> String {
        writer::to_config_string(self)
    }

    /// Write the default config file if none exists yet.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists(path: &Path) -> Result<PathBuf, ConfigFileError> {
        if !path.exists() {
            Self::default().save_to(path)?;
        }
        Ok(path.to_path_buf())
    }

    /// Builds the tile source described by the `[source]` and `[headers]`
    /// sections.
    ///
    /// `url` takes precedence over `servers`. With a server list, the
    /// default and fallback hosts are drawn from it.
    pub fn build_source(&self) -> Result<TileSource, SourceError> {
        let settings = &self.source;
        let mut builder = match &settings.url {
            Some(url) => TileSourceBuilder::new(url.clone(), settings.path.clone()),
            None => {
                let servers = settings
                    .servers
                    .iter()
                    .map(|urls| ServerDns::new(urls.clone()))
                    .collect::<Result<Vec<_>, _>>()?;
                if servers.is_empty() {
                    return Err(SourceError::MissingUrl);
                }
                TileSourceBuilder::from_servers(&servers, settings.path.clone())?
            }
        };

        if let Some(fallback) = &settings.fallback_url {
            builder = builder.fallback_url(fallback.clone());
        }
        builder = builder.key_name(settings.key_name.clone());
        if let Some(key) = &settings.api_key {
            builder = builder.api_key(key.clone());
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.clone(), value.clone());
        }

        builder
            .zoom_range(settings.min_zoom, settings.max_zoom)
            .content_kind(settings.content)
            .tms(settings.tms)
            .build()
    }

    pub fn transport_config(&self) -> TransportConfig {
        self.transport.to_transport_config()
    }

    pub fn pool_config(&self) -> PoolConfig {
        self.workers.to_pool_config()
    }

    /// Builds the configured cache store, if any.
    pub fn build_cache(&self) -> Option<Arc<dyn TileCache>> {
        match self.cache.kind {
            CacheKind::None => None,
            CacheKind::Memory => Some(Arc::new(MemoryTileCache::new(self.cache.memory_size))),
            CacheKind::Disk => Some(Arc::new(DiskTileCache::new(self.cache.directory.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileAddress;
    use crate::decode::ContentKind;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config = FetchConfig::load_from(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, FetchConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(
            &path,
            "[source]\nurl = https://a.example\nfallback_url = https://b.example\n\n[workers]\ncount = 2\n",
        )
        .unwrap();

        let config = FetchConfig::load_from(&path).unwrap();
        assert_eq!(config.source.url.as_deref(), Some("https://a.example"));
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.pool_config().workers, 2);
    }

    #[test]
    fn test_invalid_value_reports_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[transport]\nmax_retries = -1\n").unwrap();

        let err = FetchConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("transport.max_retries"));
    }

    #[test]
    fn test_save_and_ensure_exists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let returned = FetchConfig::ensure_exists(&path).unwrap();
        assert_eq!(returned, path);
        assert!(path.exists());
        assert_eq!(FetchConfig::load_from(&path).unwrap(), FetchConfig::default());
    }

    #[test]
    fn test_build_source_from_url() {
        let mut config = FetchConfig::default();
        config.source.url = Some("https://a.example".into());
        config.source.fallback_url = Some("https://b.example".into());
        config.source.api_key = Some("k".into());
        config.source.content = ContentKind::Vector;
        config.headers = vec![("Referer".into(), "https://app.example".into())];

        let source = config.build_source().unwrap();
        assert_eq!(source.primary_url(), "https://a.example");
        assert_eq!(source.fallback_url(), "https://b.example");
        assert_eq!(source.content_kind(), ContentKind::Vector);
        assert_eq!(source.headers().len(), 1);
        assert_eq!(
            source.current_url(&TileAddress::new(1, 2, 3)),
            "https://a.example/3/1/2.png?key=k"
        );
    }

    #[test]
    fn test_build_source_from_servers() {
        let mut config = FetchConfig::default();
        config.source.servers = vec![
            vec!["https://a.example".into()],
            vec!["https://b.example".into()],
        ];

        let source = config.build_source().unwrap();
        assert!(source.has_fallback());
        assert_ne!(source.primary_url(), source.fallback_url());
    }

    #[test]
    fn test_build_source_without_hosts_fails() {
        assert_eq!(
            FetchConfig::default().build_source().unwrap_err(),
            SourceError::MissingUrl
        );
    }

    #[test]
    fn test_transport_config_conversion() {
        let mut config = FetchConfig::default();
        config.transport.backoff_unit_ms = 250;
        let transport = config.transport_config();
        assert_eq!(transport.backoff_unit, Duration::from_millis(250));
        assert_eq!(transport.max_retries, 5);
    }

    #[test]
    fn test_build_cache_kinds() {
        let temp = TempDir::new().unwrap();
        let mut config = FetchConfig::default();
        assert_eq!(config.build_cache().unwrap().name(), "memory");

        config.cache.kind = CacheKind::Disk;
        config.cache.directory = temp.path().to_path_buf();
        assert_eq!(config.build_cache().unwrap().name(), "disk");

        config.cache.kind = CacheKind::None;
        assert!(config.build_cache().is_none());
    }
}
