//! Coordinate conversion module
//!
//! Provides the [`TileAddress`] value type and conversions between geographic
//! coordinates and Web Mercator tile indices, including the tile ranges that
//! cover a bounding box.

mod types;

pub use types::{
    BoundingBox, CoordError, TileAddress, MAX_AREA_TILES, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON,
};

use std::collections::HashSet;
use std::f64::consts::PI;

/// Converts a longitude to a tile column, clamped to the grid.
#[inline]
pub fn lon_to_tile_x(lon: f64, zoom: u8) -> u32 {
    let n = 2.0_f64.powi(zoom as i32);
    let x = ((lon + 180.0) / 360.0 * n).floor();
    x.clamp(0.0, n - 1.0) as u32
}

/// Converts a latitude to a tile row, clamped to the grid.
#[inline]
pub fn lat_to_tile_y(lat: f64, zoom: u8) -> u32 {
    let n = 2.0_f64.powi(zoom as i32);
    let lat_rad = lat.clamp(MIN_LAT, MAX_LAT) * PI / 180.0;
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();
    y.clamp(0.0, n - 1.0) as u32
}

/// Converts geographic coordinates to the tile containing them.
pub fn to_tile_address(lat: f64, lon: f64, zoom: u8) -> Result<TileAddress, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    Ok(TileAddress::new(
        lon_to_tile_x(lon, zoom),
        lat_to_tile_y(lat, zoom),
        zoom,
    ))
}

/// Returns the tile at the north-west corner of the box.
pub fn upper_left(bbox: &BoundingBox, zoom: u8) -> TileAddress {
    TileAddress::new(
        lon_to_tile_x(bbox.min_lon, zoom),
        lat_to_tile_y(bbox.max_lat, zoom),
        zoom,
    )
}

/// Returns the tile at the south-east corner of the box.
pub fn lower_right(bbox: &BoundingBox, zoom: u8) -> TileAddress {
    TileAddress::new(
        lon_to_tile_x(bbox.max_lon, zoom),
        lat_to_tile_y(bbox.min_lat, zoom),
        zoom,
    )
}

/// Lists every tile covering the box, row by row from the north-west corner.
pub fn tiles_in_bbox(bbox: &BoundingBox, zoom: u8) -> Result<Vec<TileAddress>, CoordError> {
    tiles_in_bbox_with_buffer(bbox, zoom, 0)
}

/// Lists every tile covering the box grown by `buffer` tiles on each side.
///
/// The grown range is clamped to the grid, so tiles near the edges of the
/// world are never duplicated or wrapped. Listings larger than
/// [`MAX_AREA_TILES`] are refused.
pub fn tiles_in_bbox_with_buffer(
    bbox: &BoundingBox,
    zoom: u8,
    buffer: u32,
) -> Result<Vec<TileAddress>, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    let max_index = ((1u64 << zoom) - 1) as u32;
    let ul = upper_left(bbox, zoom);
    let lr = lower_right(bbox, zoom);

    let left = ul.x.saturating_sub(buffer);
    let top = ul.y.saturating_sub(buffer);
    let right = lr.x.saturating_add(buffer).min(max_index);
    let bottom = lr.y.saturating_add(buffer).min(max_index);

    let width = u64::from(right - left) + 1;
    let height = u64::from(bottom - top) + 1;
    let count = width.saturating_mul(height);
    if count > MAX_AREA_TILES {
        return Err(CoordError::TooManyTiles {
            count,
            limit: MAX_AREA_TILES,
        });
    }
    let mut tiles = Vec::with_capacity(count as usize);
    for y in top..=bottom {
        for x in left..=right {
            tiles.push(TileAddress::new(x, y, zoom));
        }
    }
    Ok(tiles)
}

/// Returns the set of tiles spanned by two corner tiles.
///
/// The zoom level is taken from `upper_left`.
pub fn tiles_between(upper_left: &TileAddress, lower_right: &TileAddress) -> HashSet<TileAddress> {
    let mut tiles = HashSet::new();
    for y in upper_left.y..=lower_right.y {
        for x in upper_left.x..=lower_right.x {
            tiles.insert(TileAddress::new(x, y, upper_left.zoom));
        }
    }
    tiles
}
