//! Value trees: runtime samples that conform to a [`Features`](crate::Features) schema.

use std::collections::BTreeMap;

use half::f16;
use num_complex::Complex;

use crate::error::ShardResult;
use crate::lazy::LazyValue;
use crate::types::{ScalarValue, Tensor};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(ScalarValue),
    Tensor(Tensor),
    Text(String),
    Json(serde_json::Value),
    List(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    /// A leaf whose decoding is deferred until [`LazyValue::force`].
    Lazy(LazyValue),
}

impl Value {
    /// Build a struct value from `(name, value)` pairs.
    pub fn record<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Tensor(_) => "tensor",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
            Value::List(_) => "list",
            Value::Struct(_) => "struct",
            Value::Lazy(_) => "lazy",
        }
    }

    /// Field `name` of a struct value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_lazy(&self) -> Option<&LazyValue> {
        match self {
            Value::Lazy(handle) => Some(handle),
            _ => None,
        }
    }

    /// Copy of this tree with every lazy leaf decoded.
    pub fn force_all(&self) -> ShardResult<Value> {
        match self {
            Value::Lazy(handle) => handle.force().map(Clone::clone),
            Value::List(items) => items
                .iter()
                .map(Value::force_all)
                .collect::<ShardResult<Vec<_>>>()
                .map(Value::List),
            Value::Struct(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), v.force_all()?)))
                .collect::<ShardResult<BTreeMap<_, _>>>()
                .map(Value::Struct),
            leaf => Ok(leaf.clone()),
        }
    }
}

macro_rules! value_from_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Scalar(ScalarValue::from(v))
                }
            }
        )*
    };
}

value_from_scalar!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f16,
    f32,
    f64,
    Complex<f32>,
    Complex<f64>,
);

impl From<ScalarValue> for Value {
    fn from(v: ScalarValue) -> Self {
        Value::Scalar(v)
    }
}

impl From<Tensor> for Value {
    fn from(v: Tensor) -> Self {
        Value::Tensor(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<LazyValue> for Value {
    fn from(v: LazyValue) -> Self {
        Value::Lazy(v)
    }
}
