pub mod audio;
pub mod flate;
pub mod lz4;
pub mod numeric;
pub mod text;
pub mod zstd;

use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ShardError, ShardResult};
use crate::features::Feature;
use crate::value::Value;

// ---------------------------------------------------------------------------
// LeafKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    Scalar,
    Tensor,
    Text,
    Json,
    Audio,
}

impl LeafKind {
    pub const ALL: [LeafKind; 5] = [
        LeafKind::Scalar,
        LeafKind::Tensor,
        LeafKind::Text,
        LeafKind::Json,
        LeafKind::Audio,
    ];

    fn slot(self) -> usize {
        match self {
            LeafKind::Scalar => 0,
            LeafKind::Tensor => 1,
            LeafKind::Text => 2,
            LeafKind::Json => 3,
            LeafKind::Audio => 4,
        }
    }
}

impl std::fmt::Display for LeafKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeafKind::Scalar => write!(f, "scalar"),
            LeafKind::Tensor => write!(f, "tensor"),
            LeafKind::Text => write!(f, "text"),
            LeafKind::Json => write!(f, "json"),
            LeafKind::Audio => write!(f, "audio"),
        }
    }
}

// ---------------------------------------------------------------------------
// LeafCodec / CodecRegistry
// ---------------------------------------------------------------------------

/// Turns one leaf value into member bytes and back.
///
/// `feature` is the leaf's schema node, carrying dtype, shape and sample
/// rate. Failures are reported as [`ShardError::Codec`]; the caller tags
/// them with the member path.
pub trait LeafCodec: Send + Sync + std::fmt::Debug {
    fn encode(&self, feature: &Feature, value: &Value) -> ShardResult<Vec<u8>>;

    fn decode(&self, feature: &Feature, data: &[u8]) -> ShardResult<Value>;

    /// Whether readers should hand out a [`LazyValue`](crate::LazyValue)
    /// instead of decoding eagerly.
    fn decodes_lazily(&self) -> bool {
        false
    }
}

/// One codec per leaf kind. Every kind always has a codec; registering
/// replaces the built-in one.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    codecs: [Arc<dyn LeafCodec>; 5],
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            codecs: [
                Arc::new(numeric::ScalarCodec),
                Arc::new(numeric::TensorCodec),
                Arc::new(text::TextCodec),
                Arc::new(text::JsonCodec),
                Arc::new(audio::AudioCodec),
            ],
        }
    }

    pub fn register(&mut self, kind: LeafKind, codec: Arc<dyn LeafCodec>) -> &mut Self {
        self.codecs[kind.slot()] = codec;
        self
    }

    pub fn get(&self, kind: LeafKind) -> &Arc<dyn LeafCodec> {
        &self.codecs[kind.slot()]
    }

    pub fn decodes_lazily(&self, kind: LeafKind) -> bool {
        self.get(kind).decodes_lazily()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Compression  (per-member, applied after the leaf codec)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Stored,
    Gzip(flate::GzipCodec),
    Zlib(flate::ZlibCodec),
    Zstd(zstd::ZstdCodec),
    Lz4(lz4::Lz4Codec),
}

impl Compression {
    /// Inverse of [`Compression::name`]. Levels only matter when
    /// compressing, so defaults are used.
    pub fn from_name(name: &str) -> ShardResult<Self> {
        match name {
            "stored" => Ok(Compression::Stored),
            "gzip" => Ok(Compression::Gzip(Default::default())),
            "zlib" => Ok(Compression::Zlib(Default::default())),
            "zstd" => Ok(Compression::Zstd(Default::default())),
            "lz4" => Ok(Compression::Lz4(Default::default())),
            other => Err(ShardError::Codec(format!("Unknown compression: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::Stored => "stored",
            Compression::Gzip(_) => "gzip",
            Compression::Zlib(_) => "zlib",
            Compression::Zstd(_) => "zstd",
            Compression::Lz4(_) => "lz4",
        }
    }

    pub fn compress<'a>(&self, data: &'a [u8]) -> ShardResult<Cow<'a, [u8]>> {
        match self {
            Compression::Stored => Ok(Cow::Borrowed(data)),
            Compression::Gzip(c) => c.compress(data).map(Cow::Owned),
            Compression::Zlib(c) => c.compress(data).map(Cow::Owned),
            Compression::Zstd(c) => c.compress(data).map(Cow::Owned),
            Compression::Lz4(c) => c.compress(data).map(Cow::Owned),
        }
    }

    /// Largest output `stored_len` bytes can expand to, from each format's
    /// worst-case ratio.
    pub fn max_raw_len(&self, stored_len: usize) -> usize {
        let (ratio, slack) = match self {
            Compression::Stored => (1, 0),
            Compression::Gzip(_) | Compression::Zlib(_) => (1032, 64),
            Compression::Zstd(_) => (1 << 15, 1 << 17),
            Compression::Lz4(_) => (255, 64),
        };
        stored_len.saturating_mul(ratio).saturating_add(slack)
    }

    pub fn decompress<'a>(&self, data: &'a [u8], raw_len: usize) -> ShardResult<Cow<'a, [u8]>> {
        if raw_len > self.max_raw_len(data.len()) {
            return Err(ShardError::Codec(format!(
                "{} bytes of {} cannot expand to {raw_len}",
                data.len(),
                self.name()
            )));
        }
        let out = match self {
            Compression::Stored => Cow::Borrowed(data),
            Compression::Gzip(c) => Cow::Owned(c.decompress(data, raw_len)?),
            Compression::Zlib(c) => Cow::Owned(c.decompress(data, raw_len)?),
            Compression::Zstd(c) => Cow::Owned(c.decompress(data, raw_len)?),
            Compression::Lz4(c) => Cow::Owned(c.decompress(data, raw_len)?),
        };
        if out.len() != raw_len {
            return Err(ShardError::Codec(format!(
                "{} member holds {} bytes, header says {raw_len}",
                self.name(),
                out.len()
            )));
        }
        Ok(out)
    }
}

/// Read a decompressing stream that must yield exactly `raw_len` bytes.
/// Never reads more than one byte past that, however much the stream holds.
pub(crate) fn read_exact_len(reader: impl Read, raw_len: usize, name: &str) -> ShardResult<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take((raw_len as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| ShardError::Codec(format!("{name} decompress failed: {e}")))?;
    if out.len() != raw_len {
        return Err(ShardError::Codec(format!(
            "{name} member expands to {}{} bytes, expected {raw_len}",
            if out.len() > raw_len { "more than " } else { "" },
            out.len().min(raw_len)
        )));
    }
    Ok(out)
}

/// JSON envelope for compression settings:
/// `{ "name": "zstd", "configuration": { "level": 3 } }`.
#[derive(Debug, Deserialize, Serialize)]
struct CodecEnvelope {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configuration: Option<serde_json::Value>,
}

fn parse_config<T: serde::de::DeserializeOwned>(
    name: &str,
    config: Option<serde_json::Value>,
) -> ShardResult<T> {
    let config = config.unwrap_or(serde_json::Value::Object(Default::default()));
    serde_json::from_value(config)
        .map_err(|e| ShardError::Config(format!("Invalid {name} configuration: {e}")))
}

impl TryFrom<CodecEnvelope> for Compression {
    type Error = ShardError;

    fn try_from(env: CodecEnvelope) -> Result<Self, Self::Error> {
        match env.name.to_lowercase().as_str() {
            "stored" | "none" => Ok(Compression::Stored),
            "gzip" => parse_config(&env.name, env.configuration).map(Compression::Gzip),
            "zlib" => parse_config(&env.name, env.configuration).map(Compression::Zlib),
            "zstd" => parse_config(&env.name, env.configuration).map(Compression::Zstd),
            "lz4" => parse_config(&env.name, env.configuration).map(Compression::Lz4),
            other => Err(ShardError::Config(format!("Unknown compression: {other}"))),
        }
    }
}

impl Serialize for Compression {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let configuration = match self {
            Compression::Stored => None,
            Compression::Gzip(c) => serde_json::to_value(c).ok(),
            Compression::Zlib(c) => serde_json::to_value(c).ok(),
            Compression::Zstd(c) => serde_json::to_value(c).ok(),
            Compression::Lz4(c) => serde_json::to_value(c).ok(),
        };
        CodecEnvelope {
            name: self.name().to_string(),
            configuration,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Compression {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let env = CodecEnvelope::deserialize(deserializer)?;
        Compression::try_from(env).map_err(serde::de::Error::custom)
    }
}
