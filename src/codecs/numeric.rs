//! Scalar and tensor leaves.
//!
//! A scalar member is the raw little-endian element. A tensor member is a
//! small shape header followed by the row-major little-endian elements:
//!
//! ```text
//! rank: u8 | dim_0: u64 LE | ... | dim_{rank-1}: u64 LE | data
//! ```

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::LeafCodec;
use crate::error::{ShardError, ShardResult};
use crate::features::{Feature, format_shape};
use crate::types::{ArrayData, DataType, Tensor, element_count};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarCodec;

impl LeafCodec for ScalarCodec {
    fn encode(&self, feature: &Feature, value: &Value) -> ShardResult<Vec<u8>> {
        let Feature::Scalar { dtype } = feature else {
            return Err(wrong_feature("scalar", feature));
        };
        let Value::Scalar(scalar) = value else {
            return Err(ShardError::Codec(format!(
                "expected a scalar, got {}",
                value.kind_name()
            )));
        };
        check_dtype(*dtype, scalar.data_type())?;
        Ok(ArrayData::filled(scalar, 1).to_le_bytes())
    }

    fn decode(&self, feature: &Feature, data: &[u8]) -> ShardResult<Value> {
        let Feature::Scalar { dtype } = feature else {
            return Err(wrong_feature("scalar", feature));
        };
        if data.len() != dtype.byte_size() {
            return Err(ShardError::Codec(format!(
                "{dtype} scalar needs {} bytes, member holds {}",
                dtype.byte_size(),
                data.len()
            )));
        }
        ArrayData::from_le_bytes(*dtype, data)?
            .get(0)
            .map(Value::Scalar)
            .ok_or_else(|| ShardError::Codec("empty scalar member".into()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TensorCodec;

impl LeafCodec for TensorCodec {
    fn encode(&self, feature: &Feature, value: &Value) -> ShardResult<Vec<u8>> {
        let Feature::Tensor { shape, dtype } = feature else {
            return Err(wrong_feature("tensor", feature));
        };
        encode_tensor(shape, *dtype, value)
    }

    fn decode(&self, feature: &Feature, data: &[u8]) -> ShardResult<Value> {
        let Feature::Tensor { shape, dtype } = feature else {
            return Err(wrong_feature("tensor", feature));
        };
        decode_tensor(shape, *dtype, data).map(Value::Tensor)
    }
}

pub(crate) fn wrong_feature(codec: &str, feature: &Feature) -> ShardError {
    ShardError::Codec(format!(
        "{codec} codec cannot handle a {} feature",
        feature.kind_name()
    ))
}

fn check_dtype(expected: DataType, actual: DataType) -> ShardResult<()> {
    if expected != actual {
        return Err(ShardError::Codec(format!(
            "dtype mismatch: feature is {expected}, value is {actual}"
        )));
    }
    Ok(())
}

/// Fixed dimensions must match exactly; `None` accepts any extent.
pub(crate) fn check_shape(expected: &[Option<usize>], actual: &[usize]) -> ShardResult<()> {
    let compatible = expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(want, got)| want.is_none_or(|w| w == *got));
    if !compatible {
        return Err(ShardError::Codec(format!(
            "shape {actual:?} does not fit {}",
            format_shape(expected)
        )));
    }
    Ok(())
}

pub(crate) fn encode_tensor(
    expected: &[Option<usize>],
    dtype: DataType,
    value: &Value,
) -> ShardResult<Vec<u8>> {
    let Value::Tensor(tensor) = value else {
        return Err(ShardError::Codec(format!(
            "expected a tensor, got {}",
            value.kind_name()
        )));
    };
    check_dtype(dtype, tensor.data_type())?;
    check_shape(expected, tensor.shape())?;

    let rank = u8::try_from(tensor.shape().len())
        .map_err(|_| ShardError::Codec("tensor rank exceeds 255".into()))?;
    let payload = tensor.data().to_le_bytes();
    let mut out = Vec::with_capacity(1 + 8 * rank as usize + payload.len());
    out.write_u8(rank)?;
    for &dim in tensor.shape() {
        out.write_u64::<LittleEndian>(dim as u64)?;
    }
    out.extend_from_slice(&payload);
    Ok(out)
}

pub(crate) fn decode_tensor(
    expected: &[Option<usize>],
    dtype: DataType,
    data: &[u8],
) -> ShardResult<Tensor> {
    let truncated = |e: std::io::Error| ShardError::Codec(format!("truncated tensor header: {e}"));

    let mut cursor = Cursor::new(data);
    let rank = cursor.read_u8().map_err(truncated)?;
    let mut shape = Vec::with_capacity(rank as usize);
    for _ in 0..rank {
        let dim = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
        let dim = usize::try_from(dim)
            .map_err(|_| ShardError::Codec(format!("dimension {dim} does not fit in memory")))?;
        shape.push(dim);
    }
    check_shape(expected, &shape)?;

    let mut payload = Vec::new();
    cursor.read_to_end(&mut payload)?;
    let needed = element_count(&shape)
        .and_then(|elements| elements.checked_mul(dtype.byte_size()))
        .ok_or_else(|| ShardError::Codec(format!("shape {shape:?} of {dtype} is too large")))?;
    if payload.len() != needed {
        return Err(ShardError::Codec(format!(
            "shape {shape:?} of {dtype} needs {needed} bytes, member holds {}",
            payload.len()
        )));
    }
    Tensor::new(shape, ArrayData::from_le_bytes(dtype, &payload)?)
}
