//! INI parsing logic for converting `Ini` → `FetchConfig`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::settings::FetchConfig;
use super::ConfigFileError;

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse an `Ini` object into a `FetchConfig`.
///
/// Starts from `FetchConfig::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<FetchConfig, ConfigFileError> {
    let mut config = FetchConfig::default();

    // [source] section
    if let Some(section) = ini.section(Some("source")) {
        const S: &str = "source";
        if let Some(v) = section.get("url") {
            config.source.url = non_empty(v);
        }
        if let Some(v) = section.get("servers") {
            config.source.servers = parse_servers(v);
        }
        if let Some(v) = section.get("fallback_url") {
            config.source.fallback_url = non_empty(v);
        }
        if let Some(v) = section.get("path") {
            config.source.path = v.trim().to_string();
        }
        if let Some(v) = section.get("key_name") {
            let name = non_empty(v).ok_or_else(|| invalid(S, "key_name", v, "must not be empty"))?;
            config.source.key_name = name;
        }
        if let Some(v) = section.get("api_key") {
            config.source.api_key = non_empty(v);
        }
        if let Some(v) = section.get("content") {
            config.source.content = parse_value(S, "content", v, "must be 'bitmap' or 'vector'")?;
        }
        if let Some(v) = section.get("min_zoom") {
            config.source.min_zoom = parse_value(S, "min_zoom", v, "must be an integer 0-30")?;
        }
        if let Some(v) = section.get("max_zoom") {
            config.source.max_zoom = parse_value(S, "max_zoom", v, "must be an integer 0-30")?;
        }
        if let Some(v) = section.get("tms") {
            config.source.tms = parse_bool(S, "tms", v)?;
        }
    }

    // [headers] section
    if let Some(section) = ini.section(Some("headers")) {
        config.headers = section
            .iter()
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();
    }

    // [transport] section
    if let Some(section) = ini.section(Some("transport")) {
        const S: &str = "transport";
        if let Some(v) = section.get("connect_timeout") {
            config.transport.connect_timeout =
                parse_value(S, "connect_timeout", v, "must be a positive integer (seconds)")?;
        }
        if let Some(v) = section.get("request_timeout") {
            config.transport.request_timeout =
                parse_value(S, "request_timeout", v, "must be a positive integer (seconds)")?;
        }
        if let Some(v) = section.get("max_retries") {
            config.transport.max_retries =
                parse_value(S, "max_retries", v, "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("backoff_unit_ms") {
            config.transport.backoff_unit_ms =
                parse_value(S, "backoff_unit_ms", v, "must be a non-negative integer (ms)")?;
        }
        if let Some(v) = section.get("retry_reporting") {
            config.transport.retry_reporting =
                parse_value(S, "retry_reporting", v, "must be 'surface' or 'recovered'")?;
        }
        if config.transport.connect_timeout == 0 {
            return Err(invalid(S, "connect_timeout", "0", "must be greater than zero"));
        }
        if config.transport.request_timeout == 0 {
            return Err(invalid(S, "request_timeout", "0", "must be greater than zero"));
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        const S: &str = "cache";
        if let Some(v) = section.get("kind") {
            config.cache.kind = parse_value(S, "kind", v, "must be one of: none, memory, disk")?;
        }
        if let Some(v) = section.get("directory") {
            if let Some(dir) = non_empty(v) {
                config.cache.directory = expand_tilde(&dir);
            }
        }
        if let Some(v) = section.get("memory_size") {
            config.cache.memory_size = parse_size(v).ok_or_else(|| {
                invalid(S, "memory_size", v, "expected format like '256MB', '1GB', or '1024KB'")
            })?;
        }
    }

    // [workers] section
    if let Some(section) = ini.section(Some("workers")) {
        const S: &str = "workers";
        if let Some(v) = section.get("count") {
            config.workers.count = parse_value(S, "count", v, "must be a positive integer")?;
            if config.workers.count == 0 {
                return Err(invalid(S, "count", v, "must be a positive integer"));
            }
        }
        if let Some(v) = section.get("queue_capacity") {
            config.workers.queue_capacity =
                parse_value(S, "queue_capacity", v, "must be a positive integer")?;
            if config.workers.queue_capacity == 0 {
                return Err(invalid(S, "queue_capacity", v, "must be a positive integer"));
            }
        }
    }

    Ok(config)
}

/// Parses `a1|a2, b1` into `[[a1, a2], [b1]]`.
fn parse_servers(value: &str) -> Vec<Vec<String>> {
    value
        .split(',')
        .map(|server| {
            server
                .split('|')
                .filter_map(non_empty)
                .collect::<Vec<_>>()
        })
        .filter(|urls| !urls.is_empty())
        .collect()
}

/// Parses a human-readable size ("256MB", "1 GB", "4096") into bytes.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let upper = value.to_ascii_uppercase();
    let (number, multiplier) = [("GB", 1u64 << 30), ("G", 1 << 30), ("MB", 1 << 20), ("M", 1 << 20), ("KB", 1 << 10), ("K", 1 << 10), ("B", 1)]
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|number| (number.trim().to_string(), *multiplier))
        })
        .unwrap_or_else(|| (upper.clone(), 1));
    number.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
