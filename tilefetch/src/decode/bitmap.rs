//! Raster tile decoding via the `image` crate.

use super::{ContentKind, DecodeError, DecodedTile, TileDecoder};
use crate::coord::TileAddress;

/// Decoded raster tile in RGBA8, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct BitmapTile {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for BitmapTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapTile")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixels", &format_args!("[{} bytes]", self.pixels.len()))
            .finish()
    }
}

/// Decodes PNG, JPEG and the other formats `image` is built with.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitmapDecoder;

impl TileDecoder for BitmapDecoder {
    fn kind(&self) -> ContentKind {
        ContentKind::Bitmap
    }

    fn decode(&self, address: &TileAddress, bytes: &[u8]) -> Result<DecodedTile, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty { tile: *address });
        }

        let image = image::load_from_memory(bytes).map_err(|e| DecodeError::InvalidImage {
            tile: *address,
            reason: e.to_string(),
        })?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::InvalidImage {
                tile: *address,
                reason: format!("zero-sized image {}x{}", width, height),
            });
        }

        Ok(DecodedTile::Bitmap(BitmapTile {
            width,
            height,
            pixels: rgba.into_raw(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encodes a solid-colour PNG for use as a test payload.
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_png() {
        let tile = TileAddress::new(0, 0, 0);
        let decoded = BitmapDecoder.decode(&tile, &png_bytes(4, 2)).unwrap();
        match decoded {
            DecodedTile::Bitmap(bitmap) => {
                assert_eq!(bitmap.width, 4);
                assert_eq!(bitmap.height, 2);
                assert_eq!(bitmap.pixels.len(), 4 * 2 * 4);
                assert_eq!(&bitmap.pixels[..4], &[10, 20, 30, 255]);
            }
            other => panic!("expected bitmap, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_payload() {
        let tile = TileAddress::new(0, 0, 0);
        assert_eq!(
            BitmapDecoder.decode(&tile, &[]),
            Err(DecodeError::Empty { tile })
        );
    }

    #[test]
    fn test_garbage_payload() {
        let tile = TileAddress::new(1, 1, 1);
        let result = BitmapDecoder.decode(&tile, b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::InvalidImage { .. })));
    }

    #[test]
    fn test_truncated_png() {
        let tile = TileAddress::new(1, 1, 1);
        let png = png_bytes(16, 16);
        let result = BitmapDecoder.decode(&tile, &png[..png.len() / 2]);
        assert!(result.is_err());
    }
}
