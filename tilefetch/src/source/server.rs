//! Tile server selection.
//!
//! A logical server may be reachable through several equivalent URLs (DNS
//! aliases behind a load balancer). When more than one server is known, one
//! is picked as the default host and a different one as the fallback host.

use rand::Rng;

use super::SourceError;

/// How many draws are spent trying to pick a fallback distinct from the default.
const FALLBACK_DRAW_ATTEMPTS: usize = 50;

/// One logical tile server and the URLs that point at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDns {
    urls: Vec<String>,
}

impl ServerDns {
    /// Creates a server from its URLs.
    pub fn new(urls: Vec<String>) -> Result<Self, SourceError> {
        if urls.is_empty() {
            return Err(SourceError::NoServers);
        }
        Ok(Self { urls })
    }

    /// Creates a server reachable through a single URL.
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
        }
    }

    /// Picks one of the server's URLs at random.
    pub fn url(&self) -> &str {
        let index = rand::rng().random_range(0..self.urls.len());
        &self.urls[index]
    }

    /// All URLs pointing at this server.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }
}

/// A default server URL and an optional fallback server URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrlWithFallback {
    pub default_url: String,
    pub fallback_url: Option<String>,
}

impl ServerUrlWithFallback {
    /// Chooses a default and a fallback server from the given list.
    ///
    /// With a single server there is no fallback. With several, the fallback
    /// is drawn until it differs from the default (bounded number of draws).
    pub fn new(servers: &[ServerDns]) -> Result<Self, SourceError> {
        match servers {
            [] => Err(SourceError::NoServers),
            [only] => Ok(Self {
                default_url: only.url().to_string(),
                fallback_url: None,
            }),
            _ => {
                let mut rng = rand::rng();
                let default_index = rng.random_range(0..servers.len());
                let mut fallback_index = rng.random_range(0..servers.len());
                for _ in 0..FALLBACK_DRAW_ATTEMPTS {
                    if fallback_index != default_index {
                        break;
                    }
                    fallback_index = rng.random_range(0..servers.len());
                }
                Ok(Self {
                    default_url: servers[default_index].url().to_string(),
                    fallback_url: Some(servers[fallback_index].url().to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_dns_rejects_empty() {
        assert_eq!(ServerDns::new(vec![]), Err(SourceError::NoServers));
    }

    #[test]
    fn test_server_dns_picks_one_of_its_urls() {
        let server = ServerDns::new(vec!["https://a1.example".into(), "https://a2.example".into()])
            .unwrap();
        for _ in 0..20 {
            let picked = server.url();
            assert!(server.urls().iter().any(|u| u == picked));
        }
    }

    #[test]
    fn test_empty_server_list_is_an_error() {
        assert_eq!(ServerUrlWithFallback::new(&[]), Err(SourceError::NoServers));
    }

    #[test]
    fn test_single_server_has_no_fallback() {
        let chosen = ServerUrlWithFallback::new(&[ServerDns::single("https://a.example")]).unwrap();
        assert_eq!(chosen.default_url, "https://a.example");
        assert_eq!(chosen.fallback_url, None);
    }

    #[test]
    fn test_two_servers_pick_distinct_fallback() {
        let servers = [
            ServerDns::single("https://a.example"),
            ServerDns::single("https://b.example"),
        ];
        // 50 redraws at p = 1/2 make a collision practically impossible.
        for _ in 0..20 {
            let chosen = ServerUrlWithFallback::new(&servers).unwrap();
            let fallback = chosen.fallback_url.expect("fallback expected");
            assert_ne!(chosen.default_url, fallback);
        }
    }
}
