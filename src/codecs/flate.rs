//! Deflate-based member compression: gzip and zlib framing over flate2.

use crate::error::{ShardError, ShardResult};
use flate2::Compression as Level;
use flate2::read::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use std::io::Read;

use super::read_exact_len;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GzipCodec {
    #[serde(default = "default_gzip_level")]
    pub level: u32,
}

fn default_gzip_level() -> u32 {
    5
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: default_gzip_level(),
        }
    }
}

impl GzipCodec {
    pub fn decompress(&self, data: &[u8], raw_len: usize) -> ShardResult<Vec<u8>> {
        read_exact_len(GzDecoder::new(data), raw_len, "Gzip")
    }

    pub fn compress(&self, data: &[u8]) -> ShardResult<Vec<u8>> {
        deflate(GzEncoder::new(data, level(self.level)), "Gzip")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZlibCodec {
    #[serde(default = "default_zlib_level")]
    pub level: u32,
}

fn default_zlib_level() -> u32 {
    1
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self {
            level: default_zlib_level(),
        }
    }
}

impl ZlibCodec {
    pub fn decompress(&self, data: &[u8], raw_len: usize) -> ShardResult<Vec<u8>> {
        read_exact_len(ZlibDecoder::new(data), raw_len, "Zlib")
    }

    pub fn compress(&self, data: &[u8]) -> ShardResult<Vec<u8>> {
        deflate(ZlibEncoder::new(data, level(self.level)), "Zlib")
    }
}

fn level(level: u32) -> Level {
    Level::new(level.min(9))
}

fn deflate(mut encoder: impl Read, name: &str) -> ShardResult<Vec<u8>> {
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| ShardError::Codec(format!("{name} compress failed: {e}")))?;
    Ok(out)
}
