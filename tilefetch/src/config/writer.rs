//! INI serialization for `FetchConfig`.
//!
//! Produces the commented file written by `tilefetch config --init` and by
//! [`FetchConfig::save_to`](super::FetchConfig::save_to).

use std::fmt::Write;
use std::path::Path;

use super::settings::FetchConfig;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Formats a byte count the way `parse_size` reads it back.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    if bytes % GIB == 0 {
        format!("{}GB", bytes / GIB)
    } else if bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        bytes.to_string()
    }
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn format_servers(servers: &[Vec<String>]) -> String {
    servers
        .iter()
        .map(|urls| urls.join("|"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a `FetchConfig` to a commented INI string for saving.
pub(super) fn to_config_string(config: &FetchConfig) -> String {
    let source = &config.source;
    let transport = &config.transport;
    let cache = &config.cache;
    let workers = &config.workers;

    let mut headers = String::new();
    for (name, value) in &config.headers {
        // Writing to a String cannot fail.
        let _ = writeln!(headers, "{} = {}", name, value);
    }

    format!(
        r#"[source]
; Base URL of the tile server, e.g. https://tiles.example.com
url = {}
; Alternative to url: comma-separated servers. Equivalent URLs of one
; server are separated by '|'. A second server becomes the fallback host.
servers = {}
; Host used once a request has had to retry
fallback_url = {}
; Path template appended to the host. Placeholders: {{X}} {{Y}} {{Z}}
path = {}
; Query parameter carrying the API key
key_name = {}
api_key = {}
; bitmap or vector
content = {}
min_zoom = {}
max_zoom = {}
; Flip rows to the TMS scheme (origin at the bottom)
tms = {}

[headers]
; Extra request headers, one per line: Name = value
{}
[transport]
; Seconds to wait for a connection
connect_timeout = {}
; Seconds to wait for a whole response
request_timeout = {}
; Retries after a timeout or unreachable host
max_retries = {}
; The n-th retry waits n * backoff_unit_ms
backoff_unit_ms = {}
; surface   - report the first error even if a retry succeeded
; recovered - return the tile fetched by the retry
retry_reporting = {}

[cache]
; none, memory or disk
kind = {}
directory = {}
; Size limit of the memory cache, e.g. 256MB or 1GB
memory_size = {}

[workers]
count = {}
queue_capacity = {}
"#,
        source.url.as_deref().unwrap_or(""),
        format_servers(&source.servers),
        source.fallback_url.as_deref().unwrap_or(""),
        source.path,
        source.key_name,
        source.api_key.as_deref().unwrap_or(""),
        source.content,
        source.min_zoom,
        source.max_zoom,
        source.tms,
        headers,
        transport.connect_timeout,
        transport.request_timeout,
        transport.max_retries,
        transport.backoff_unit_ms,
        transport.retry_reporting.as_str(),
        cache.kind,
        path_to_string(&cache.directory),
        format_size(cache.memory_size),
        workers.count,
        workers.queue_capacity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::{parse_ini, parse_size};
    use crate::config::settings::CacheKind;
    use ini::Ini;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0");
        assert_eq!(format_size(512), "512");
        assert_eq!(format_size(4 * KIB), "4KB");
        assert_eq!(format_size(256 * MIB), "256MB");
        assert_eq!(format_size(2 * GIB), "2GB");
        assert_eq!(format_size(1536 * KIB), "1536KB");
    }

    #[test]
    fn test_format_size_parses_back() {
        for bytes in [1, 1000, 4096, 3 * MIB, 5 * GIB] {
            assert_eq!(parse_size(&format_size(bytes)), Some(bytes));
        }
    }

    #[test]
    fn test_default_config_survives_writing() {
        let config = FetchConfig::default();
        let text = to_config_string(&config);
        let parsed = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_custom_config_survives_writing() {
        let mut config = FetchConfig::default();
        config.source.servers = vec![
            vec!["https://a1.example".into(), "https://a2.example".into()],
            vec!["https://b.example".into()],
        ];
        config.source.api_key = Some("secret".into());
        config.source.tms = true;
        config.headers = vec![("Referer".into(), "https://app.example".into())];
        config.transport.max_retries = 2;
        config.cache.kind = CacheKind::Disk;
        config.cache.directory = "/tmp/tiles".into();
        config.workers.count = 16;

        let text = to_config_string(&config);
        let parsed = parse_ini(&Ini::load_from_str(&text).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
