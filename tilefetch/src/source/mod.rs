//! Tile source: where tiles come from and how their URLs are built.
//!
//! A [`TileSource`] holds the primary host, an optional fallback host, the
//! path template and the API key for one map layer. It also owns the
//! session-wide fallback latch: once any fetch against the source fails at
//! the transport level, every later fetch resolves against the fallback host.
//!
//! # Example
//!
//! ```
//! use tilefetch::coord::TileAddress;
//! use tilefetch::source::TileSource;
//!
//! let source = TileSource::builder("https://a.example", "/{Z}/{X}/{Y}.png")
//!     .build()
//!     .unwrap();
//! let url = source.resolve_url(&TileAddress::new(1, 2, 3), false);
//! assert_eq!(url, "https://a.example/3/1/2.png");
//! ```

mod server;
mod template;

pub use server::{ServerDns, ServerUrlWithFallback};
pub use template::{PathSegment, PathTemplate};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tracing::warn;

use crate::coord::{TileAddress, MAX_ZOOM};
use crate::decode::ContentKind;

/// Default query parameter name for the API key.
pub const DEFAULT_KEY_NAME: &str = "key";

/// Default path template.
pub const DEFAULT_TILE_PATH: &str = "/{Z}/{X}/{Y}.png";

/// Errors raised while building a tile source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Tile source requires a URL")]
    MissingUrl,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid path template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Invalid zoom range {min}..={max}")]
    InvalidZoomRange { min: u8, max: u8 },

    #[error("No tile servers configured")]
    NoServers,
}

/// Formats the path portion of a tile URL.
///
/// The default implementation walks the source's [`PathTemplate`]. Sources
/// whose servers use a different addressing scheme can install their own.
pub trait TileUrlFormatter: Send + Sync {
    fn format_tile_path(&self, source: &TileSource, address: &TileAddress) -> String;
}

/// Remaps tile coordinates before they are written into a URL.
///
/// Every method defaults to the identity.
pub trait UrlCoordinateMapper: Send + Sync {
    fn x(&self, x: u32) -> u32 {
        x
    }

    fn y(&self, y: u32) -> u32 {
        y
    }

    fn z(&self, zoom: u8) -> u8 {
        zoom
    }
}

/// Identity coordinate mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl UrlCoordinateMapper for IdentityMapper {}

/// Formatter that substitutes `{X}`, `{Y}` and `{Z}` in the path template.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateFormatter;

impl TileUrlFormatter for TemplateFormatter {
    fn format_tile_path(&self, source: &TileSource, address: &TileAddress) -> String {
        let mapper = source.mapper();
        let mut path = String::with_capacity(source.template().as_str().len() + 16);
        for segment in source.template().segments() {
            match segment {
                PathSegment::Literal(text) => path.push_str(text),
                PathSegment::X => path.push_str(&mapper.x(address.x).to_string()),
                PathSegment::Y => path.push_str(&mapper.y(address.y).to_string()),
                PathSegment::Z => path.push_str(&mapper.z(address.zoom).to_string()),
            }
        }
        path
    }
}

/// API key appended to every request as a query parameter.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// A remote tile layer.
///
/// Shared across all workers behind an `Arc`. Everything except the fallback
/// latch is immutable after construction.
pub struct TileSource {
    primary_url: String,
    fallback_url: Option<String>,
    template: PathTemplate,
    api_key: Option<ApiKey>,
    headers: Vec<(String, String)>,
    min_zoom: u8,
    max_zoom: u8,
    content_kind: ContentKind,
    tms: bool,
    formatter: Arc<dyn TileUrlFormatter>,
    mapper: Arc<dyn UrlCoordinateMapper>,
    use_fallback: AtomicBool,
}

impl TileSource {
    /// Starts building a source from a base URL and a path template.
    pub fn builder(url: impl Into<String>, tile_path: impl Into<String>) -> TileSourceBuilder {
        TileSourceBuilder::new(url, tile_path)
    }

    /// Builds the request URL for a tile.
    ///
    /// `use_fallback` selects the fallback host when one is configured and
    /// the primary host otherwise. No I/O happens here.
    pub fn resolve_url(&self, address: &TileAddress, use_fallback: bool) -> String {
        let base = if use_fallback {
            self.fallback_url()
        } else {
            self.primary_url()
        };
        let path = self.formatter.format_tile_path(self, address);

        let mut url = String::with_capacity(base.len() + path.len() + 32);
        url.push_str(base);
        url.push_str(&path);
        if let Some(key) = &self.api_key {
            url.push(if path.contains('?') { '&' } else { '?' });
            url.push_str(&key.name);
            url.push('=');
            url.push_str(&key.value);
        }
        url
    }

    /// Builds the request URL against whichever host is currently active.
    pub fn current_url(&self, address: &TileAddress) -> String {
        self.resolve_url(address, self.use_fallback())
    }

    /// Whether requests currently go to the fallback host.
    pub fn use_fallback(&self) -> bool {
        self.use_fallback.load(Ordering::Acquire)
    }

    /// Switches every later request to the fallback host.
    ///
    /// The switch is one-way. Returns true only for the caller that flipped
    /// the latch, so concurrent failures produce a single activation.
    pub fn activate_fallback(&self) -> bool {
        let activated = self
            .use_fallback
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if activated {
            warn!(
                fallback = %self.fallback_url(),
                primary = %self.primary_url,
                "Fallback server will be used for requesting tiles"
            );
        }
        activated
    }

    /// The primary host.
    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    /// The fallback host, or the primary host when none is configured.
    pub fn fallback_url(&self) -> &str {
        self.fallback_url.as_deref().unwrap_or(&self.primary_url)
    }

    /// Whether a distinct fallback host was configured.
    pub fn has_fallback(&self) -> bool {
        self.fallback_url.is_some()
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn mapper(&self) -> &dyn UrlCoordinateMapper {
        self.mapper.as_ref()
    }

    /// Headers attached to every request.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Checks if this source serves the given zoom level.
    pub fn supports_zoom(&self, zoom: u8) -> bool {
        zoom >= self.min_zoom && zoom <= self.max_zoom
    }

    /// Kind of content served, which selects the decoder.
    pub fn content_kind(&self) -> ContentKind {
        self.content_kind
    }

    /// Whether the server numbers rows TMS-style (origin at the bottom).
    pub fn tms(&self) -> bool {
        self.tms
    }

    /// The address in the server's own row numbering.
    pub fn remote_address(&self, address: &TileAddress) -> TileAddress {
        if self.tms {
            address.to_tms()
        } else {
            *address
        }
    }
}

impl fmt::Debug for TileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileSource")
            .field("primary_url", &self.primary_url)
            .field("fallback_url", &self.fallback_url)
            .field("template", &self.template.as_str())
            .field("api_key", &self.api_key)
            .field("zoom", &(self.min_zoom..=self.max_zoom))
            .field("content_kind", &self.content_kind)
            .field("tms", &self.tms)
            .field("use_fallback", &self.use_fallback())
            .finish()
    }
}

/// Builder for [`TileSource`].
pub struct TileSourceBuilder {
    url: Option<String>,
    fallback_url: Option<String>,
    tile_path: String,
    key_name: String,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
    min_zoom: u8,
    max_zoom: u8,
    content_kind: ContentKind,
    tms: bool,
    formatter: Arc<dyn TileUrlFormatter>,
    mapper: Arc<dyn UrlCoordinateMapper>,
}

impl TileSourceBuilder {
    /// Creates a builder with the given base URL and path template.
    pub fn new(url: impl Into<String>, tile_path: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            fallback_url: None,
            tile_path: tile_path.into(),
            key_name: DEFAULT_KEY_NAME.to_string(),
            api_key: None,
            headers: Vec::new(),
            min_zoom: 0,
            max_zoom: 20,
            content_kind: ContentKind::Bitmap,
            tms: false,
            formatter: Arc::new(TemplateFormatter),
            mapper: Arc::new(IdentityMapper),
        }
    }

    /// Creates a builder whose hosts are chosen from a server list.
    pub fn from_servers(servers: &[ServerDns], tile_path: impl Into<String>) -> Result<Self, SourceError> {
        let chosen = ServerUrlWithFallback::new(servers)?;
        Ok(Self::new(String::new(), tile_path).servers(&chosen))
    }

    /// Takes primary and fallback hosts from a server choice.
    pub fn servers(mut self, chosen: &ServerUrlWithFallback) -> Self {
        self.url = Some(chosen.default_url.clone());
        self.fallback_url = chosen.fallback_url.clone();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn fallback_url(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    pub fn tile_path(mut self, tile_path: impl Into<String>) -> Self {
        self.tile_path = tile_path.into();
        self
    }

    pub fn key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = kind;
        self
    }

    pub fn tms(mut self, tms: bool) -> Self {
        self.tms = tms;
        self
    }

    pub fn formatter(mut self, formatter: Arc<dyn TileUrlFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn mapper(mut self, mapper: Arc<dyn UrlCoordinateMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Validates the settings and builds the source.
    pub fn build(self) -> Result<TileSource, SourceError> {
        let primary_url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or(SourceError::MissingUrl)?;
        validate_url(&primary_url)?;
        if let Some(fallback) = &self.fallback_url {
            validate_url(fallback)?;
        }
        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(SourceError::InvalidZoomRange {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        let template = PathTemplate::parse(&self.tile_path)?;
        let api_key = self.api_key.map(|value| ApiKey {
            name: self.key_name,
            value,
        });

        Ok(TileSource {
            primary_url,
            fallback_url: self.fallback_url,
            template,
            api_key,
            headers: self.headers,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            content_kind: self.content_kind,
            tms: self.tms,
            formatter: self.formatter,
            mapper: self.mapper,
            use_fallback: AtomicBool::new(false),
        })
    }
}

fn validate_url(url: &str) -> Result<(), SourceError> {
    Url::parse(url).map(|_| ()).map_err(|e| SourceError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
