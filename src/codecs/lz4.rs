use crate::error::{ShardError, ShardResult};
use serde::{Deserialize, Serialize};

/// Raw LZ4 block codec. The member's PAX header already carries the decompressed
/// length, so blocks are stored without a size prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lz4Codec {
    #[serde(default = "default_acceleration")]
    pub acceleration: i32,
}

fn default_acceleration() -> i32 {
    1
}

impl Default for Lz4Codec {
    fn default() -> Self {
        Self {
            acceleration: default_acceleration(),
        }
    }
}

impl Lz4Codec {
    pub fn decompress(&self, data: &[u8], raw_len: usize) -> ShardResult<Vec<u8>> {
        let decompressed = lz4_flex::block::decompress(data, raw_len)
            .map_err(|e| ShardError::Codec(format!("LZ4 decompress failed: {e}")))?;

        if decompressed.len() != raw_len {
            return Err(ShardError::Codec(format!(
                "LZ4 decompression error: expected {raw_len} bytes, got {}",
                decompressed.len()
            )));
        }

        Ok(decompressed)
    }

    pub fn compress(&self, data: &[u8]) -> ShardResult<Vec<u8>> {
        Ok(lz4_flex::block::compress(data))
    }
}
