//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use tilefetch::config::ConfigFileError;
use tilefetch::coord::CoordError;
use tilefetch::executor::PoolError;
use tilefetch::source::SourceError;
use tilefetch::transport::TransportError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// The configured tile source is unusable
    Source(SourceError),
    /// Failed to create the HTTP client
    Client(TransportError),
    /// Invalid coordinates or area
    Coord(CoordError),
    /// Worker pool error
    Pool(PoolError),
    /// The tile could not be fetched
    Fetch(String),
    /// Failed to write output file
    FileWrite { path: String, error: std::io::Error },
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Interrupted by the user
    Cancelled,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Source(SourceError::MissingUrl) = self {
            eprintln!();
            eprintln!("Set a tile server in the config file, for example:");
            eprintln!("  [source]");
            eprintln!("  url = https://tiles.example.com");
            eprintln!("Use 'tilefetch config --path' to locate the file.");
        }
        if let CliError::Coord(CoordError::TooManyTiles { .. }) = self {
            eprintln!("Use a smaller area or a lower zoom level.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Source(e) => write!(f, "Invalid tile source: {}", e),
            CliError::Client(e) => write!(f, "Failed to create HTTP client: {}", e),
            CliError::Coord(e) => write!(f, "Invalid area: {}", e),
            CliError::Pool(e) => write!(f, "Worker pool error: {}", e),
            CliError::Fetch(msg) => write!(f, "Failed to fetch tile: {}", msg),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Source(e) => Some(e),
            CliError::Client(e) => Some(e),
            CliError::Coord(e) => Some(e),
            CliError::Pool(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<SourceError> for CliError {
    fn from(e: SourceError) -> Self {
        CliError::Source(e)
    }
}

impl From<CoordError> for CliError {
    fn from(e: CoordError) -> Self {
        CliError::Coord(e)
    }
}

impl From<PoolError> for CliError {
    fn from(e: PoolError) -> Self {
        CliError::Pool(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CliError::Config("bad".into()).to_string(),
            "Configuration error: bad"
        );
        assert_eq!(
            CliError::from(SourceError::MissingUrl).to_string(),
            format!("Invalid tile source: {}", SourceError::MissingUrl)
        );
        assert_eq!(CliError::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;
        let err = CliError::from(PoolError::QueueFull);
        assert!(err.source().is_some());
        assert!(CliError::Cancelled.source().is_none());
    }
}
