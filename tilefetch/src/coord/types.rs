//! Coordinate type definitions

use std::fmt;

use thiserror::Error;

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Highest zoom level whose tile indices still fit a `u32`.
pub const MAX_ZOOM: u8 = 30;

/// Most tiles a single area listing may produce (the whole world at zoom 10).
pub const MAX_AREA_TILES: u64 = 1 << 20;

/// Address of a single map tile in the XYZ (slippy map) scheme.
///
/// Addresses compare and hash by value, so they double as cache keys and as
/// identifiers for in-flight requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    /// Column (west to east), 0 at the antimeridian
    pub x: u32,
    /// Row (north to south), 0 at the top
    pub y: u32,
    /// Zoom level
    pub zoom: u8,
}

impl TileAddress {
    /// Creates a new tile address.
    #[inline]
    pub const fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Number of tiles along one axis at this address's zoom level.
    #[inline]
    pub fn tiles_per_axis(&self) -> u64 {
        1u64 << self.zoom.min(MAX_ZOOM)
    }

    /// Returns true if the indices lie inside the grid for this zoom.
    pub fn is_valid(&self) -> bool {
        self.zoom <= MAX_ZOOM
            && (self.x as u64) < self.tiles_per_axis()
            && (self.y as u64) < self.tiles_per_axis()
    }

    /// Converts the row to TMS numbering (origin at the bottom).
    ///
    /// The conversion is its own inverse.
    pub fn to_tms(&self) -> Self {
        let max_index = self.tiles_per_axis() - 1;
        Self {
            x: self.x,
            y: max_index.saturating_sub(self.y as u64) as u32,
            zoom: self.zoom,
        }
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Geographic rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Creates a bounding box, validating ranges and ordering.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self, CoordError> {
        for lat in [min_lat, max_lat] {
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        for lon in [min_lon, max_lon] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        if min_lat > max_lat || min_lon > max_lon {
            return Err(CoordError::InvertedBounds);
        }
        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }
}

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("Invalid latitude: {0} (must be between {MIN_LAT} and {MAX_LAT})")]
    InvalidLatitude(f64),
    #[error("Invalid longitude: {0} (must be between {MIN_LON} and {MAX_LON})")]
    InvalidLongitude(f64),
    #[error("Invalid zoom level: {0} (must be between 0 and {MAX_ZOOM})")]
    InvalidZoom(u8),
    #[error("Bounding box minimum exceeds maximum")]
    InvertedBounds,
    #[error("Area covers {count} tiles (limit is {limit})")]
    TooManyTiles { count: u64, limit: u64 },
}
