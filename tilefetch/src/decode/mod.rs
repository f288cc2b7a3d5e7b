//! Tile content decoding.
//!
//! Raw tile bytes become a [`DecodedTile`] through a [`TileDecoder`]. The
//! decoder is chosen once per source from its [`ContentKind`]. Decoders are
//! pure: they validate the whole payload before returning, never hand back a
//! partially built tile and do not keep the input around.

mod bitmap;
mod vector;

pub use bitmap::{BitmapDecoder, BitmapTile};
pub use vector::{VectorDecoder, VectorTile, MAX_INFLATED_SIZE};

#[cfg(test)]
pub(crate) use bitmap::tests::png_bytes;
#[cfg(test)]
pub(crate) use vector::tests::mvt_bytes;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::coord::TileAddress;

/// Errors produced while decoding tile content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Tile {tile} is empty")]
    Empty { tile: TileAddress },

    #[error("Tile {tile} is not a valid image: {reason}")]
    InvalidImage { tile: TileAddress, reason: String },

    #[error("Tile {tile} is not a valid vector tile: {reason}")]
    InvalidVector { tile: TileAddress, reason: String },

    #[error("Decoder for tile {tile} did not finish: {reason}")]
    Aborted { tile: TileAddress, reason: String },
}

/// Kind of content a source serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentKind {
    #[default]
    Bitmap,
    Vector,
}

impl ContentKind {
    /// Returns the decoder for this kind of content.
    pub fn decoder(self) -> Arc<dyn TileDecoder> {
        match self {
            ContentKind::Bitmap => Arc::new(BitmapDecoder),
            ContentKind::Vector => Arc::new(VectorDecoder),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Bitmap => "bitmap",
            ContentKind::Vector => "vector",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitmap" | "raster" => Ok(ContentKind::Bitmap),
            "vector" | "mvt" => Ok(ContentKind::Vector),
            other => Err(format!("expected 'bitmap' or 'vector', got '{}'", other)),
        }
    }
}

/// A fully decoded tile, ready to hand to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedTile {
    Bitmap(BitmapTile),
    Vector(VectorTile),
}

impl DecodedTile {
    pub fn kind(&self) -> ContentKind {
        match self {
            DecodedTile::Bitmap(_) => ContentKind::Bitmap,
            DecodedTile::Vector(_) => ContentKind::Vector,
        }
    }

    /// Size of the decoded payload in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            DecodedTile::Bitmap(tile) => tile.pixels.len(),
            DecodedTile::Vector(tile) => tile.data.len(),
        }
    }
}

impl fmt::Display for DecodedTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedTile::Bitmap(tile) => {
                write!(f, "bitmap {}x{} RGBA", tile.width, tile.height)
            }
            DecodedTile::Vector(tile) => {
                write!(
                    f,
                    "vector, {} layer(s) [{}], {} bytes",
                    tile.layers.len(),
                    tile.layers.join(", "),
                    tile.data.len()
                )
            }
        }
    }
}

/// Turns raw tile bytes into decoded content.
pub trait TileDecoder: Send + Sync {
    /// The content kind this decoder understands.
    fn kind(&self) -> ContentKind;

    /// Decodes one tile.
    fn decode(&self, address: &TileAddress, bytes: &[u8]) -> Result<DecodedTile, DecodeError>;
}
