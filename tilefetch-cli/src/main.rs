//! tilefetch CLI - Command-line interface
//!
//! Fetches map tiles through the tilefetch pipeline: a single tile, or every
//! tile covering an area.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::area::AreaArgs;
use commands::config::ConfigArgs;
use commands::fetch::FetchArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "tilefetch")]
#[command(version, about = "Fetch, cache and decode map tiles", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.tilefetch/config.ini
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and decode a single tile
    Fetch {
        /// Tile column
        #[arg(long)]
        x: u32,

        /// Tile row (XYZ numbering, origin at the top)
        #[arg(long)]
        y: u32,

        /// Zoom level
        #[arg(long)]
        zoom: u8,

        /// Write the decoded payload (RGBA pixels or vector data) to a file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fetch every tile covering a bounding box
    Area {
        /// Southern edge in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        min_lat: f64,

        /// Western edge in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        min_lon: f64,

        /// Northern edge in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        max_lat: f64,

        /// Eastern edge in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        max_lon: f64,

        /// Zoom level
        #[arg(long)]
        zoom: u8,

        /// Extra tiles to fetch around the box on each side
        #[arg(long, default_value = "0")]
        buffer: u32,
    },

    /// Show the effective configuration
    Config {
        /// Only print the config file path
        #[arg(long)]
        path: bool,

        /// Write a default config file if none exists
        #[arg(long, conflicts_with = "path")]
        init: bool,
    },
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Config { path, init } => {
            commands::config::run(cli.config.as_deref(), ConfigArgs { path, init })
        }
        Commands::Fetch { x, y, zoom, output } => {
            let runner = CliRunner::new(cli.config.as_deref(), cli.log_dir.as_deref())?;
            commands::fetch::run(&runner, FetchArgs { x, y, zoom, output })
        }
        Commands::Area {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
            zoom,
            buffer,
        } => {
            let runner = CliRunner::new(cli.config.as_deref(), cli.log_dir.as_deref())?;
            commands::area::run(
                &runner,
                AreaArgs {
                    min_lat,
                    min_lon,
                    max_lat,
                    max_lon,
                    zoom,
                    buffer,
                },
            )
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_area_with_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "tilefetch", "area", "--min-lat", "-34.0", "--min-lon", "-58.5", "--max-lat", "-33.5",
            "--max-lon", "-58.0", "--zoom", "12",
        ])
        .unwrap();
        match cli.command {
            Commands::Area {
                min_lat, buffer, ..
            } => {
                assert_eq!(min_lat, -34.0);
                assert_eq!(buffer, 0);
            }
            _ => panic!("expected area command"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from([
            "tilefetch", "fetch", "--x", "1", "--y", "2", "--zoom", "3", "--config", "/tmp/c.ini",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.ini")));
        assert!(matches!(cli.command, Commands::Fetch { x: 1, y: 2, zoom: 3, .. }));
    }
}
