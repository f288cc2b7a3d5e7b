//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, pipeline
//! construction and Ctrl-C handling shared by the command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use tilefetch::config::{config_file_path, FetchConfig};
use tilefetch::fetch::FetchOrchestrator;
use tilefetch::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};
use tilefetch::transport::ReqwestHttpClient;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: FetchConfig,
    config_path: PathBuf,
}

impl CliRunner {
    /// Loads the config file (or defaults) and initializes logging.
    pub fn new(config_path: Option<&Path>, log_dir: Option<&Path>) -> Result<Self, CliError> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        let config = FetchConfig::load_from(&config_path)?;

        let log_dir = log_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(default_log_dir()));
        let logging_guard = init_logging(&log_dir, default_log_file())
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("tilefetch v{}", env!("CARGO_PKG_VERSION"));
        info!(
            config = %self.config_path.display(),
            "tilefetch CLI: {} command", command
        );
    }

    /// Builds the fetch pipeline described by the configuration.
    pub fn orchestrator(&self) -> Result<Arc<FetchOrchestrator<ReqwestHttpClient>>, CliError> {
        let source = Arc::new(self.config.build_source()?);
        let transport = self.config.transport_config();
        let client = ReqwestHttpClient::with_timeouts(
            transport.connect_timeout,
            transport.request_timeout,
        )
        .map_err(CliError::Client)?;

        info!(
            url = source.primary_url(),
            fallback = source.fallback_url(),
            content = %source.content_kind(),
            cache = %self.config.cache.kind,
            "Tile source ready"
        );

        let mut orchestrator = FetchOrchestrator::new(source, Arc::new(client), transport);
        if let Some(cache) = self.config.build_cache() {
            orchestrator = orchestrator.with_cache(cache);
        }
        Ok(Arc::new(orchestrator))
    }

    /// Starts a multi-threaded Tokio runtime for the command.
    pub fn runtime(&self) -> Result<tokio::runtime::Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)
    }

    /// Returns a token cancelled when the user presses Ctrl-C.
    pub fn interrupt_token(&self) -> Result<CancellationToken, CliError> {
        let token = CancellationToken::new();
        let handler_token = token.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Received interrupt, cancelling outstanding requests...");
            handler_token.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
        Ok(token)
    }
}
