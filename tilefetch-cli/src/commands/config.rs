//! Config command - show, locate or create the configuration file.

use std::path::Path;

use tilefetch::config::{config_file_path, FetchConfig};

use crate::error::CliError;

/// Arguments for the config command.
pub struct ConfigArgs {
    pub path: bool,
    pub init: bool,
}

/// Run the config command.
///
/// Does not initialize logging, so it can be used before a log directory
/// exists.
pub fn run(config_path: Option<&Path>, args: ConfigArgs) -> Result<(), CliError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);

    if args.init {
        let existed = path.exists();
        FetchConfig::ensure_exists(&path)?;
        if existed {
            println!("Config file already exists: {}", path.display());
        } else {
            println!("Created config file: {}", path.display());
        }
        return Ok(());
    }

    if args.path {
        println!("{}", path.display());
        return Ok(());
    }

    let config = FetchConfig::load_from(&path)?;
    if path.exists() {
        println!("; Effective configuration from {}", path.display());
    } else {
        println!("; No config file at {}, showing defaults", path.display());
    }
    print!("{}", config.to_config_string());
    Ok(())
}
