use crate::error::{ShardError, ShardResult};
use serde::{Deserialize, Serialize};

use super::read_exact_len;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZstdCodec {
    #[serde(default = "default_level")]
    pub level: i32,
}

fn default_level() -> i32 {
    3
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl ZstdCodec {
    /// Streams the frame, so `raw_len` never sizes an allocation up front.
    pub fn decompress(&self, data: &[u8], raw_len: usize) -> ShardResult<Vec<u8>> {
        let decoder = zstd::stream::read::Decoder::with_buffer(data)
            .map_err(|e| ShardError::Codec(format!("Zstd decompress failed: {e}")))?;
        read_exact_len(decoder, raw_len, "Zstd")
    }

    pub fn compress(&self, data: &[u8]) -> ShardResult<Vec<u8>> {
        zstd::bulk::compress(data, self.level)
            .map_err(|e| ShardError::Codec(format!("Zstd compress failed: {e}")))
    }
}
