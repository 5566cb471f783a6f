//! Deferred leaf decoding.
//!
//! A [`LazyValue`] holds a cheap slice of its shard's byte source covering
//! exactly one member, the codec that understands it, and a cache cell.
//! Clones share the cell: the first successful [`LazyValue::force`]
//! decodes, later calls return the cached value. Failures are not cached,
//! so a failing handle reports the same error on every access.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use crate::archive::Entry;
use crate::codecs::audio::frames_between;
use crate::codecs::{Compression, LeafCodec};
use crate::error::{ShardError, ShardResult};
use crate::features::Feature;
use crate::path::MemberPath;
use crate::types::Tensor;
use crate::value::Value;

#[derive(Clone)]
pub struct LazyValue {
    inner: Arc<Inner>,
}

struct Inner {
    path: MemberPath,
    feature: Feature,
    codec: Arc<dyn LeafCodec>,
    stored: Bytes,
    range: Range<usize>,
    compression: Compression,
    raw_len: usize,
    decoded: OnceLock<Value>,
}

impl LazyValue {
    pub(crate) fn new(
        feature: &Feature,
        codec: Arc<dyn LeafCodec>,
        shard: &Bytes,
        entry: &Entry,
    ) -> Self {
        LazyValue {
            inner: Arc::new(Inner {
                path: entry.path.clone(),
                feature: feature.clone(),
                codec,
                stored: shard.slice(entry.range.clone()),
                range: entry.range.clone(),
                compression: entry.compression,
                raw_len: entry.raw_len,
                decoded: OnceLock::new(),
            }),
        }
    }

    /// Decode the member, or return the value decoded by an earlier call.
    pub fn force(&self) -> ShardResult<&Value> {
        if let Some(value) = self.inner.decoded.get() {
            return Ok(value);
        }
        let value = self.decode()?;
        Ok(self.inner.decoded.get_or_init(|| value))
    }

    /// The decoded value, if [`force`](Self::force) has already succeeded.
    pub fn decoded(&self) -> Option<&Value> {
        self.inner.decoded.get()
    }

    pub fn is_decoded(&self) -> bool {
        self.inner.decoded.get().is_some()
    }

    pub fn path(&self) -> &MemberPath {
        &self.inner.path
    }

    pub fn feature(&self) -> &Feature {
        &self.inner.feature
    }

    /// Stored (possibly compressed) member bytes.
    pub fn raw_bytes(&self) -> &Bytes {
        &self.inner.stored
    }

    /// Location of the stored bytes within the shard file.
    pub fn byte_range(&self) -> Range<usize> {
        self.inner.range.clone()
    }

    /// Audio frames in `[start_secs, end_secs)`. Decodes the clip if needed.
    pub fn read_range(&self, start_secs: f64, end_secs: f64) -> ShardResult<Tensor> {
        let Feature::Audio { sample_rate, .. } = &self.inner.feature else {
            return Err(self.decode_error(format!(
                "read_range needs an audio leaf, this is {}",
                self.inner.feature.kind_name()
            )));
        };
        let Some(rate) = *sample_rate else {
            return Err(self.decode_error("audio feature has no sample_rate".into()));
        };
        let Value::Tensor(clip) = self.force()? else {
            return Err(self.decode_error("audio codec did not produce a tensor".into()));
        };
        frames_between(clip, rate, start_secs, end_secs).map_err(|e| self.decode_error(e.to_string()))
    }

    fn decode(&self) -> ShardResult<Value> {
        let inner = &self.inner;
        let raw = inner
            .compression
            .decompress(&inner.stored, inner.raw_len)
            .map_err(|e| self.decode_error(e.to_string()))?;
        inner
            .codec
            .decode(&inner.feature, &raw)
            .map_err(|e| self.decode_error(e.to_string()))
    }

    fn decode_error(&self, reason: String) -> ShardError {
        ShardError::Decode {
            path: self.inner.path.to_string(),
            reason,
        }
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyValue")
            .field("path", &self.inner.path.to_string())
            .field("kind", &self.inner.feature.kind_name())
            .field("range", &self.inner.range)
            .field("decoded", &self.is_decoded())
            .finish()
    }
}

/// Two handles are equal when they refer to the same stored member bytes.
impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.path == other.inner.path
                && self.inner.compression == other.inner.compression
                && self.inner.stored == other.inner.stored)
    }
}
