//! Feature schemas: the recursive description of a sample's shape.
//!
//! Leaves (`Scalar`, `Tensor`, `Text`, `Json`, `Audio`) map to exactly one
//! archive member each; containers (`Sequence`, `Struct`) recurse.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue, json};

use crate::codecs::LeafKind;
use crate::error::{ShardError, ShardResult};
use crate::types::DataType;

const TYPE_KEY: &str = "_type";

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Scalar {
        dtype: DataType,
    },
    Tensor {
        shape: Vec<Option<usize>>,
        dtype: DataType,
    },
    Text,
    Json,
    Audio {
        shape: Vec<Option<usize>>,
        dtype: DataType,
        sample_rate: Option<u32>,
    },
    Sequence {
        feature: Box<Feature>,
        length: Option<usize>,
    },
    Struct(Features),
}

impl Feature {
    pub fn scalar(dtype: DataType) -> Self {
        Feature::Scalar { dtype }
    }

    pub fn tensor(shape: impl IntoIterator<Item = Option<usize>>, dtype: DataType) -> Self {
        Feature::Tensor {
            shape: shape.into_iter().collect(),
            dtype,
        }
    }

    /// Mono float32 audio of any length.
    pub fn audio(sample_rate: Option<u32>) -> Self {
        Feature::Audio {
            shape: vec![None],
            dtype: DataType::Float32,
            sample_rate,
        }
    }

    pub fn sequence(feature: Feature) -> Self {
        Feature::Sequence {
            feature: Box::new(feature),
            length: None,
        }
    }

    pub fn fixed_sequence(feature: Feature, length: usize) -> Self {
        Feature::Sequence {
            feature: Box::new(feature),
            length: Some(length),
        }
    }

    /// The `_type` discriminator used in the persisted schema.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Feature::Scalar { .. } => "Scalar",
            Feature::Tensor { .. } => "Tensor",
            Feature::Text => "Text",
            Feature::Json => "Json",
            Feature::Audio { .. } => "Audio",
            Feature::Sequence { .. } => "Sequence",
            Feature::Struct(_) => "Struct",
        }
    }

    /// The codec kind for leaf features, `None` for containers.
    pub fn leaf_kind(&self) -> Option<LeafKind> {
        match self {
            Feature::Scalar { .. } => Some(LeafKind::Scalar),
            Feature::Tensor { .. } => Some(LeafKind::Tensor),
            Feature::Text => Some(LeafKind::Text),
            Feature::Json => Some(LeafKind::Json),
            Feature::Audio { .. } => Some(LeafKind::Audio),
            Feature::Sequence { .. } | Feature::Struct(_) => None,
        }
    }

    fn validate(&self) -> ShardResult<()> {
        match self {
            Feature::Tensor { shape, .. } => validate_shape(self.kind_name(), shape),
            Feature::Audio {
                shape, sample_rate, ..
            } => {
                if *sample_rate == Some(0) {
                    return Err(ShardError::Config("audio sample_rate must be positive".into()));
                }
                validate_shape(self.kind_name(), shape)
            }
            Feature::Sequence { feature, .. } => feature.validate(),
            // Struct fields are validated when the `Features` is built.
            Feature::Scalar { .. } | Feature::Text | Feature::Json | Feature::Struct(_) => Ok(()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Feature::Scalar { dtype } => json!({ "_type": "Scalar", "dtype": dtype }),
            Feature::Tensor { shape, dtype } => {
                json!({ "_type": "Tensor", "shape": shape, "dtype": dtype })
            }
            Feature::Text => json!({ "_type": "Text" }),
            Feature::Json => json!({ "_type": "Json" }),
            Feature::Audio {
                shape,
                dtype,
                sample_rate,
            } => json!({
                "_type": "Audio",
                "shape": shape,
                "dtype": dtype,
                "sample_rate": sample_rate,
            }),
            Feature::Sequence { feature, length } => json!({
                "_type": "Sequence",
                "feature": feature.to_json(),
                "length": length.map(|l| l as i64).unwrap_or(-1),
            }),
            Feature::Struct(fields) => json!({ "_type": "Struct", "fields": fields.to_json() }),
        }
    }

    /// Rebuild a feature from its persisted JSON form.
    ///
    /// Objects without a `_type` key are read as structs and one-element
    /// arrays as sequences.
    pub fn from_json(value: &JsonValue) -> ShardResult<Feature> {
        let feature = match value {
            JsonValue::Array(items) => match items.as_slice() {
                [inner] => Feature::sequence(Feature::from_json(inner)?),
                _ => {
                    return Err(ShardError::Config(format!(
                        "list feature must hold exactly one element type, got {}",
                        items.len()
                    )));
                }
            },
            JsonValue::Object(obj) => match obj.get(TYPE_KEY) {
                None => Feature::Struct(Features::from_object(obj)?),
                Some(JsonValue::String(kind)) => parse_tagged(kind, obj)?,
                Some(other) => {
                    return Err(ShardError::Config(format!("invalid {TYPE_KEY}: {other}")));
                }
            },
            other => return Err(ShardError::Config(format!("unexpected feature JSON: {other}"))),
        };
        feature.validate()?;
        Ok(feature)
    }
}

fn parse_tagged(kind: &str, obj: &Map<String, JsonValue>) -> ShardResult<Feature> {
    match kind {
        "Scalar" => Ok(Feature::Scalar {
            dtype: parse_dtype(obj)?,
        }),
        "Tensor" => Ok(Feature::Tensor {
            shape: parse_shape(obj.get("shape"))?,
            dtype: parse_dtype(obj)?,
        }),
        "Text" => Ok(Feature::Text),
        "Json" => Ok(Feature::Json),
        "Audio" => {
            let shape = match obj.get("shape") {
                None | Some(JsonValue::Null) => vec![None],
                shape => parse_shape(shape)?,
            };
            let dtype = match obj.get("dtype") {
                None => DataType::Float32,
                Some(_) => parse_dtype(obj)?,
            };
            let sample_rate = match obj.get("sample_rate") {
                None | Some(JsonValue::Null) => None,
                Some(v) => Some(
                    v.as_u64()
                        .and_then(|r| u32::try_from(r).ok())
                        .ok_or_else(|| ShardError::Config(format!("invalid sample_rate: {v}")))?,
                ),
            };
            Ok(Feature::Audio {
                shape,
                dtype,
                sample_rate,
            })
        }
        "Sequence" => {
            let inner = obj
                .get("feature")
                .ok_or_else(|| ShardError::Config("Sequence is missing 'feature'".into()))?;
            let length = match obj.get("length") {
                None | Some(JsonValue::Null) => None,
                Some(v) => match v.as_i64() {
                    Some(-1) => None,
                    Some(n) if n >= 0 => Some(n as usize),
                    _ => return Err(ShardError::Config(format!("invalid Sequence length: {v}"))),
                },
            };
            Ok(Feature::Sequence {
                feature: Box::new(Feature::from_json(inner)?),
                length,
            })
        }
        "Struct" => {
            let fields = obj
                .get("fields")
                .and_then(|v| v.as_object())
                .ok_or_else(|| ShardError::Config("Struct is missing 'fields'".into()))?;
            Ok(Feature::Struct(Features::from_object(fields)?))
        }
        other => Err(ShardError::Config(format!("Unknown feature type: {other}"))),
    }
}

fn parse_dtype(obj: &Map<String, JsonValue>) -> ShardResult<DataType> {
    obj.get("dtype")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ShardError::Config("feature is missing a string 'dtype'".into()))?
        .parse()
}

fn parse_shape(value: Option<&JsonValue>) -> ShardResult<Vec<Option<usize>>> {
    let dims = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| ShardError::Config("feature is missing an array 'shape'".into()))?;
    dims.iter()
        .map(|d| match d {
            JsonValue::Null => Ok(None),
            other => other
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| ShardError::Config(format!("invalid dimension: {other}"))),
        })
        .collect()
}

fn validate_shape(kind: &str, shape: &[Option<usize>]) -> ShardResult<()> {
    if shape.contains(&Some(0)) {
        return Err(ShardError::Config(format!(
            "{kind} dimensions must be positive, got {}",
            format_shape(shape)
        )));
    }
    Ok(())
}

pub(crate) fn format_shape(shape: &[Option<usize>]) -> String {
    let dims: Vec<String> = shape
        .iter()
        .map(|d| d.map(|n| n.to_string()).unwrap_or_else(|| "?".into()))
        .collect();
    format!("({})", dims.join(", "))
}

// ---------------------------------------------------------------------------
// Features  (ordered struct fields)
// ---------------------------------------------------------------------------

/// An ordered mapping from field name to [`Feature`]. Field order is the
/// declaration order and drives member order on write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Features {
    fields: Vec<(String, Feature)>,
}

impl Features {
    /// Build a schema, rejecting empty, duplicate, `/`-containing or all-digit
    /// field names (digit segments address sequence elements).
    pub fn new<I, S>(fields: I) -> ShardResult<Self>
    where
        I: IntoIterator<Item = (S, Feature)>,
        S: Into<String>,
    {
        let mut out: Vec<(String, Feature)> = Vec::new();
        for (name, feature) in fields {
            let name = name.into();
            validate_field_name(&name)?;
            if out.iter().any(|(existing, _)| *existing == name) {
                return Err(ShardError::Config(format!("duplicate field name '{name}'")));
            }
            feature.validate()?;
            out.push((name, feature));
        }
        Ok(Features { fields: out })
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Feature)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Plain JSON object, one entry per field in declaration order.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (name, feature) in &self.fields {
            map.insert(name.clone(), feature.to_json());
        }
        JsonValue::Object(map)
    }

    pub fn from_json(value: &JsonValue) -> ShardResult<Self> {
        match value {
            JsonValue::Object(obj) if obj.get(TYPE_KEY).is_none() => Features::from_object(obj),
            // A tagged struct at the root is accepted too.
            other => match Feature::from_json(other)? {
                Feature::Struct(fields) => Ok(fields),
                feature => Err(ShardError::Config(format!(
                    "root features must be a struct, got {}",
                    feature.kind_name()
                ))),
            },
        }
    }

    fn from_object(obj: &Map<String, JsonValue>) -> ShardResult<Self> {
        let fields = obj
            .iter()
            .map(|(name, v)| Ok((name.clone(), Feature::from_json(v)?)))
            .collect::<ShardResult<Vec<_>>>()?;
        Features::new(fields)
    }
}

fn validate_field_name(name: &str) -> ShardResult<()> {
    if name.is_empty() {
        return Err(ShardError::Config("field names cannot be empty".into()));
    }
    if name.contains(crate::path::SEPARATOR) {
        return Err(ShardError::Config(format!(
            "field name '{name}' cannot contain '{}'",
            crate::path::SEPARATOR
        )));
    }
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ShardError::Config(format!(
            "field name '{name}' is reserved: numeric names address sequence elements"
        )));
    }
    Ok(())
}

impl Serialize for Features {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Features {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        Features::from_json(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Feature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Feature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        Feature::from_json(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Features {
        Features::new([
            ("text", Feature::Text),
            ("tokens", Feature::sequence(Feature::scalar(DataType::Int32))),
            ("image", Feature::tensor([Some(3), None], DataType::Float32)),
            ("audio", Feature::audio(Some(16_000))),
            ("extra", Feature::Json),
            (
                "post",
                Feature::fixed_sequence(
                    Feature::Struct(
                        Features::new([
                            ("body", Feature::Text),
                            ("upvotes", Feature::scalar(DataType::Int64)),
                        ])
                        .unwrap(),
                    ),
                    2,
                ),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn json_roundtrip_keeps_field_order() {
        let features = sample_schema();
        let json = serde_json::to_string(&features).unwrap();
        let back: Features = serde_json::from_str(&json).unwrap();
        assert_eq!(back, features);
        let names: Vec<&str> = back.names().collect();
        assert_eq!(names, vec!["text", "tokens", "image", "audio", "extra", "post"]);
    }

    #[test]
    fn persisted_nodes_carry_type_tags() {
        let json = sample_schema().to_json();
        assert_eq!(json["text"]["_type"], "Text");
        assert_eq!(json["tokens"]["_type"], "Sequence");
        assert_eq!(json["tokens"]["length"], -1);
        assert_eq!(json["tokens"]["feature"]["dtype"], "int32");
        assert_eq!(json["image"]["shape"], json!([3, null]));
        assert_eq!(json["audio"]["sample_rate"], 16_000);
        assert_eq!(json["post"]["feature"]["_type"], "Struct");
    }

    #[test]
    fn untagged_objects_and_lists_are_accepted() {
        let raw = json!({
            "meta": { "id": { "_type": "Scalar", "dtype": "int64" } },
            "words": [ { "_type": "Text" } ],
        });
        let features = Features::from_json(&raw).unwrap();
        assert!(matches!(features.get("meta"), Some(Feature::Struct(_))));
        assert_eq!(features.get("words"), Some(&Feature::sequence(Feature::Text)));
    }

    #[test]
    fn reserved_and_duplicate_names_are_rejected() {
        assert!(Features::new([("12", Feature::Text)]).is_err());
        assert!(Features::new([("a/b", Feature::Text)]).is_err());
        assert!(Features::new([("", Feature::Text)]).is_err());
        assert!(Features::new([("a", Feature::Text), ("a", Feature::Json)]).is_err());
        // Names with digits in them are fine.
        assert!(Features::new([("layer12", Feature::Text)]).is_ok());
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let err = Features::new([("t", Feature::tensor([Some(0)], DataType::UInt8))]).unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }

    #[test]
    fn unknown_kinds_fail_to_load() {
        let raw = json!({ "x": { "_type": "Image" } });
        assert!(matches!(Features::from_json(&raw), Err(ShardError::Config(_))));
    }
}
