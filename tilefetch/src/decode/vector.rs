//! Vector tile decoding.
//!
//! Payloads follow the Mapbox Vector Tile layout: a protobuf message whose
//! field 3 repeats `Layer` messages, each carrying its name in field 1.
//! Gzip-compressed payloads are inflated first. Only the framing is
//! validated; features are left for the consumer to interpret.

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;

use super::{ContentKind, DecodeError, DecodedTile, TileDecoder};
use crate::coord::TileAddress;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Largest inflated payload accepted from a gzip-compressed tile.
pub const MAX_INFLATED_SIZE: usize = 16 * 1024 * 1024;

const TILE_LAYERS_FIELD: u64 = 3;
const LAYER_NAME_FIELD: u64 = 1;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Decoded vector tile: layer names plus the uncompressed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorTile {
    pub layers: Vec<String>,
    pub data: Bytes,
}

/// Validates and unpacks vector tiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorDecoder;

impl TileDecoder for VectorDecoder {
    fn kind(&self) -> ContentKind {
        ContentKind::Vector
    }

    fn decode(&self, address: &TileAddress, bytes: &[u8]) -> Result<DecodedTile, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty { tile: *address });
        }
        let invalid = |reason: String| DecodeError::InvalidVector {
            tile: *address,
            reason,
        };

        let data = if bytes.starts_with(&GZIP_MAGIC) {
            inflate(bytes, MAX_INFLATED_SIZE).map_err(invalid)?
        } else {
            Bytes::copy_from_slice(bytes)
        };

        let layers = parse_layers(&data).map_err(invalid)?;
        Ok(DecodedTile::Vector(VectorTile { layers, data }))
    }
}

/// Gunzips `bytes`, refusing output larger than `limit`.
fn inflate(bytes: &[u8], limit: usize) -> Result<Bytes, String> {
    let mut inflated = Vec::with_capacity(bytes.len().saturating_mul(4).min(limit));
    GzDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| format!("gzip: {}", e))?;
    if inflated.len() > limit {
        return Err(format!("gzip: inflated size exceeds {} bytes", limit));
    }
    Ok(Bytes::from(inflated))
}

/// A single protobuf field with its payload still encoded.
struct Field<'a> {
    number: u64,
    wire_type: u8,
    payload: &'a [u8],
}

/// Iterates over the top-level fields of a protobuf message.
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_varint(&mut self) -> Result<u64, String> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| "truncated varint".to_string())?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err("varint longer than 10 bytes".to_string())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| format!("field of {} bytes overruns message", len))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn next_field(&mut self) -> Result<Field<'a>, String> {
        let key = self.read_varint()?;
        let number = key >> 3;
        let wire_type = (key & 0x7) as u8;
        if number == 0 {
            return Err("field number 0".to_string());
        }
        let start = self.pos;
        let payload = match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
                &self.buf[start..self.pos]
            }
            WIRE_FIXED64 => self.take(8)?,
            WIRE_LEN => {
                let len = self.read_varint()?;
                let len = usize::try_from(len).map_err(|_| "length overflow".to_string())?;
                self.take(len)?
            }
            WIRE_FIXED32 => self.take(4)?,
            other => return Err(format!("unsupported wire type {}", other)),
        };
        Ok(Field {
            number,
            wire_type,
            payload,
        })
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<Field<'a>, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let field = self.next_field();
        if field.is_err() {
            // Stop after the first framing error.
            self.pos = self.buf.len();
        }
        Some(field)
    }
}

fn parse_layers(message: &[u8]) -> Result<Vec<String>, String> {
    let mut layers = Vec::new();
    for field in Fields::new(message) {
        let field = field?;
        if field.number != TILE_LAYERS_FIELD {
            continue;
        }
        if field.wire_type != WIRE_LEN {
            return Err(format!("layer field has wire type {}", field.wire_type));
        }
        layers.push(parse_layer_name(field.payload, layers.len())?);
    }
    Ok(layers)
}

fn parse_layer_name(layer: &[u8], index: usize) -> Result<String, String> {
    let mut name = None;
    for field in Fields::new(layer) {
        let field = field?;
        if field.number == LAYER_NAME_FIELD && field.wire_type == WIRE_LEN {
            let text = std::str::from_utf8(field.payload)
                .map_err(|_| format!("layer {} name is not UTF-8", index))?;
            name = Some(text.to_string());
        }
    }
    name.ok_or_else(|| format!("layer {} has no name", index))
}
