use super::LeafCodec;
use super::numeric::wrong_feature;
use crate::error::{ShardError, ShardResult};
use crate::features::Feature;
use crate::value::Value;

/// UTF-8 text, stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl LeafCodec for TextCodec {
    fn encode(&self, feature: &Feature, value: &Value) -> ShardResult<Vec<u8>> {
        if !matches!(feature, Feature::Text) {
            return Err(wrong_feature("text", feature));
        }
        match value {
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(ShardError::Codec(format!(
                "expected text, got {}",
                other.kind_name()
            ))),
        }
    }

    fn decode(&self, feature: &Feature, data: &[u8]) -> ShardResult<Value> {
        if !matches!(feature, Feature::Text) {
            return Err(wrong_feature("text", feature));
        }
        String::from_utf8(data.to_vec())
            .map(Value::Text)
            .map_err(|e| ShardError::Codec(format!("text member is not UTF-8: {e}")))
    }
}

/// Arbitrary JSON documents, stored as compact UTF-8 JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl LeafCodec for JsonCodec {
    fn encode(&self, feature: &Feature, value: &Value) -> ShardResult<Vec<u8>> {
        if !matches!(feature, Feature::Json) {
            return Err(wrong_feature("json", feature));
        }
        match value {
            Value::Json(doc) => serde_json::to_vec(doc)
                .map_err(|e| ShardError::Codec(format!("json encode failed: {e}"))),
            other => Err(ShardError::Codec(format!(
                "expected a json document, got {}",
                other.kind_name()
            ))),
        }
    }

    fn decode(&self, feature: &Feature, data: &[u8]) -> ShardResult<Value> {
        if !matches!(feature, Feature::Json) {
            return Err(wrong_feature("json", feature));
        }
        serde_json::from_slice(data)
            .map(Value::Json)
            .map_err(|e| ShardError::Codec(format!("invalid json member: {e}")))
    }
}
