use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use half::f16;
use num_complex::Complex;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Cursor;
use std::str::FromStr;

use crate::error::{ShardError, ShardResult};

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Element type of a numeric leaf. Persisted as a lowercase token
/// (`"int32"`, `"float32"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DataType {
    /// Number of bytes per element.
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::UInt8 => 1,
            DataType::UInt16 => 2,
            DataType::UInt32 => 4,
            DataType::UInt64 => 8,
            DataType::Float16 => 2,
            DataType::Float32 => 4,
            DataType::Float64 => 8,
            DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Complex64 => "complex64",
            DataType::Complex128 => "complex128",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bool" => Ok(DataType::Bool),
            "int8" => Ok(DataType::Int8),
            "int16" => Ok(DataType::Int16),
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "uint8" => Ok(DataType::UInt8),
            "uint16" => Ok(DataType::UInt16),
            "uint32" => Ok(DataType::UInt32),
            "uint64" => Ok(DataType::UInt64),
            "float16" | "half" => Ok(DataType::Float16),
            "float32" | "float" => Ok(DataType::Float32),
            "float64" | "double" => Ok(DataType::Float64),
            "complex64" => Ok(DataType::Complex64),
            "complex128" => Ok(DataType::Complex128),
            other => Err(ShardError::Config(format!("Unknown dtype: {other}"))),
        }
    }
}

impl Serialize for DataType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ScalarValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float16(f16),
    Float32(f32),
    Float64(f64),
    Complex64(Complex<f32>),
    Complex128(Complex<f64>),
}

impl ScalarValue {
    /// Return the [`DataType`] that this value belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Bool(_) => DataType::Bool,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float16(_) => DataType::Float16,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Complex64(_) => DataType::Complex64,
            ScalarValue::Complex128(_) => DataType::Complex128,
        }
    }

    /// Lossily convert this scalar to `f64`.
    pub fn to_f64(&self) -> f64 {
        match self {
            ScalarValue::Bool(true) => 1.0,
            ScalarValue::Bool(false) => 0.0,
            ScalarValue::Int8(v) => *v as f64,
            ScalarValue::Int16(v) => *v as f64,
            ScalarValue::Int32(v) => *v as f64,
            ScalarValue::Int64(v) => *v as f64,
            ScalarValue::UInt8(v) => *v as f64,
            ScalarValue::UInt16(v) => *v as f64,
            ScalarValue::UInt32(v) => *v as f64,
            ScalarValue::UInt64(v) => *v as f64,
            ScalarValue::Float16(v) => v.to_f64(),
            ScalarValue::Float32(v) => *v as f64,
            ScalarValue::Float64(v) => *v,
            ScalarValue::Complex64(c) => c.re as f64,
            ScalarValue::Complex128(c) => c.re,
        }
    }
}

macro_rules! scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for ScalarValue {
                fn from(v: $t) -> Self {
                    ScalarValue::$variant(v)
                }
            }

            impl From<Vec<$t>> for ArrayData {
                fn from(v: Vec<$t>) -> Self {
                    ArrayData::$variant(v)
                }
            }
        )*
    };
}

scalar_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f16 => Float16,
    f32 => Float32,
    f64 => Float64,
    Complex<f32> => Complex64,
    Complex<f64> => Complex128,
}

// ---------------------------------------------------------------------------
// ArrayData  (typed, flat element buffer)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float16(Vec<f16>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Complex64(Vec<Complex<f32>>),
    Complex128(Vec<Complex<f64>>),
}

/// Apply the same expression to the vector inside any `ArrayData` variant,
/// rewrapping the result in the same variant.
macro_rules! map_array {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($v) => ArrayData::Bool($body),
            ArrayData::Int8($v) => ArrayData::Int8($body),
            ArrayData::Int16($v) => ArrayData::Int16($body),
            ArrayData::Int32($v) => ArrayData::Int32($body),
            ArrayData::Int64($v) => ArrayData::Int64($body),
            ArrayData::UInt8($v) => ArrayData::UInt8($body),
            ArrayData::UInt16($v) => ArrayData::UInt16($body),
            ArrayData::UInt32($v) => ArrayData::UInt32($body),
            ArrayData::UInt64($v) => ArrayData::UInt64($body),
            ArrayData::Float16($v) => ArrayData::Float16($body),
            ArrayData::Float32($v) => ArrayData::Float32($body),
            ArrayData::Float64($v) => ArrayData::Float64($body),
            ArrayData::Complex64($v) => ArrayData::Complex64($body),
            ArrayData::Complex128($v) => ArrayData::Complex128($body),
        }
    };
}

impl ArrayData {
    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int8(v) => v.len(),
            ArrayData::Int16(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::UInt8(v) => v.len(),
            ArrayData::UInt16(v) => v.len(),
            ArrayData::UInt32(v) => v.len(),
            ArrayData::UInt64(v) => v.len(),
            ArrayData::Float16(v) => v.len(),
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
            ArrayData::Complex64(v) => v.len(),
            ArrayData::Complex128(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ArrayData::Bool(_) => DataType::Bool,
            ArrayData::Int8(_) => DataType::Int8,
            ArrayData::Int16(_) => DataType::Int16,
            ArrayData::Int32(_) => DataType::Int32,
            ArrayData::Int64(_) => DataType::Int64,
            ArrayData::UInt8(_) => DataType::UInt8,
            ArrayData::UInt16(_) => DataType::UInt16,
            ArrayData::UInt32(_) => DataType::UInt32,
            ArrayData::UInt64(_) => DataType::UInt64,
            ArrayData::Float16(_) => DataType::Float16,
            ArrayData::Float32(_) => DataType::Float32,
            ArrayData::Float64(_) => DataType::Float64,
            ArrayData::Complex64(_) => DataType::Complex64,
            ArrayData::Complex128(_) => DataType::Complex128,
        }
    }

    /// Element at `index`, if in bounds.
    pub fn get(&self, index: usize) -> Option<ScalarValue> {
        match self {
            ArrayData::Bool(v) => v.get(index).map(|x| ScalarValue::Bool(*x)),
            ArrayData::Int8(v) => v.get(index).map(|x| ScalarValue::Int8(*x)),
            ArrayData::Int16(v) => v.get(index).map(|x| ScalarValue::Int16(*x)),
            ArrayData::Int32(v) => v.get(index).map(|x| ScalarValue::Int32(*x)),
            ArrayData::Int64(v) => v.get(index).map(|x| ScalarValue::Int64(*x)),
            ArrayData::UInt8(v) => v.get(index).map(|x| ScalarValue::UInt8(*x)),
            ArrayData::UInt16(v) => v.get(index).map(|x| ScalarValue::UInt16(*x)),
            ArrayData::UInt32(v) => v.get(index).map(|x| ScalarValue::UInt32(*x)),
            ArrayData::UInt64(v) => v.get(index).map(|x| ScalarValue::UInt64(*x)),
            ArrayData::Float16(v) => v.get(index).map(|x| ScalarValue::Float16(*x)),
            ArrayData::Float32(v) => v.get(index).map(|x| ScalarValue::Float32(*x)),
            ArrayData::Float64(v) => v.get(index).map(|x| ScalarValue::Float64(*x)),
            ArrayData::Complex64(v) => v.get(index).map(|x| ScalarValue::Complex64(*x)),
            ArrayData::Complex128(v) => v.get(index).map(|x| ScalarValue::Complex128(*x)),
        }
    }

    /// Copy of the elements in `range`, clamped to the buffer length.
    pub fn slice(&self, range: std::ops::Range<usize>) -> ArrayData {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        map_array!(self, v => v[start..end].to_vec())
    }

    /// A buffer holding `count` copies of `value`.
    pub fn filled(value: &ScalarValue, count: usize) -> ArrayData {
        match value {
            ScalarValue::Bool(b) => ArrayData::Bool(vec![*b; count]),
            ScalarValue::Int8(v) => ArrayData::Int8(vec![*v; count]),
            ScalarValue::Int16(v) => ArrayData::Int16(vec![*v; count]),
            ScalarValue::Int32(v) => ArrayData::Int32(vec![*v; count]),
            ScalarValue::Int64(v) => ArrayData::Int64(vec![*v; count]),
            ScalarValue::UInt8(v) => ArrayData::UInt8(vec![*v; count]),
            ScalarValue::UInt16(v) => ArrayData::UInt16(vec![*v; count]),
            ScalarValue::UInt32(v) => ArrayData::UInt32(vec![*v; count]),
            ScalarValue::UInt64(v) => ArrayData::UInt64(vec![*v; count]),
            ScalarValue::Float16(v) => ArrayData::Float16(vec![*v; count]),
            ScalarValue::Float32(v) => ArrayData::Float32(vec![*v; count]),
            ScalarValue::Float64(v) => ArrayData::Float64(vec![*v; count]),
            ScalarValue::Complex64(v) => ArrayData::Complex64(vec![*v; count]),
            ScalarValue::Complex128(v) => ArrayData::Complex128(vec![*v; count]),
        }
    }

    /// Serialize the elements as packed little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.data_type().byte_size());
        // Writes into a Vec<u8> cannot fail.
        let _ = self.write_le(&mut out);
        out
    }

    fn write_le(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        match self {
            ArrayData::Bool(v) => out.extend(v.iter().map(|b| *b as u8)),
            ArrayData::Int8(v) => out.extend(v.iter().map(|x| *x as u8)),
            ArrayData::UInt8(v) => out.extend_from_slice(v),
            ArrayData::Int16(v) => {
                for x in v {
                    out.write_i16::<LittleEndian>(*x)?;
                }
            }
            ArrayData::Int32(v) => {
                for x in v {
                    out.write_i32::<LittleEndian>(*x)?;
                }
            }
            ArrayData::Int64(v) => {
                for x in v {
                    out.write_i64::<LittleEndian>(*x)?;
                }
            }
            ArrayData::UInt16(v) => {
                for x in v {
                    out.write_u16::<LittleEndian>(*x)?;
                }
            }
            ArrayData::UInt32(v) => {
                for x in v {
                    out.write_u32::<LittleEndian>(*x)?;
                }
            }
            ArrayData::UInt64(v) => {
                for x in v {
                    out.write_u64::<LittleEndian>(*x)?;
                }
            }
            ArrayData::Float16(v) => {
                for x in v {
                    out.write_u16::<LittleEndian>(x.to_bits())?;
                }
            }
            ArrayData::Float32(v) => {
                for x in v {
                    out.write_f32::<LittleEndian>(*x)?;
                }
            }
            ArrayData::Float64(v) => {
                for x in v {
                    out.write_f64::<LittleEndian>(*x)?;
                }
            }
            ArrayData::Complex64(v) => {
                for c in v {
                    out.write_f32::<LittleEndian>(c.re)?;
                    out.write_f32::<LittleEndian>(c.im)?;
                }
            }
            ArrayData::Complex128(v) => {
                for c in v {
                    out.write_f64::<LittleEndian>(c.re)?;
                    out.write_f64::<LittleEndian>(c.im)?;
                }
            }
        }
        Ok(())
    }

    /// Interpret packed little-endian bytes as a typed buffer of `dtype`.
    ///
    /// Fails when `data` is not a whole number of elements.
    pub fn from_le_bytes(dtype: DataType, data: &[u8]) -> ShardResult<ArrayData> {
        let elem_size = dtype.byte_size();
        if data.len() % elem_size != 0 {
            return Err(ShardError::Codec(format!(
                "{} bytes is not a multiple of the {dtype} element size {elem_size}",
                data.len()
            )));
        }

        match dtype {
            DataType::Bool => Ok(ArrayData::Bool(data.iter().map(|b| *b != 0).collect())),
            DataType::Int8 => Ok(ArrayData::Int8(data.iter().map(|b| *b as i8).collect())),
            DataType::UInt8 => Ok(ArrayData::UInt8(data.to_vec())),
            DataType::Int16 => read_vec_typed(data, |c| c.read_i16::<LittleEndian>(), ArrayData::Int16),
            DataType::Int32 => read_vec_typed(data, |c| c.read_i32::<LittleEndian>(), ArrayData::Int32),
            DataType::Int64 => read_vec_typed(data, |c| c.read_i64::<LittleEndian>(), ArrayData::Int64),
            DataType::UInt16 => {
                read_vec_typed(data, |c| c.read_u16::<LittleEndian>(), ArrayData::UInt16)
            }
            DataType::UInt32 => {
                read_vec_typed(data, |c| c.read_u32::<LittleEndian>(), ArrayData::UInt32)
            }
            DataType::UInt64 => {
                read_vec_typed(data, |c| c.read_u64::<LittleEndian>(), ArrayData::UInt64)
            }
            DataType::Float16 => read_vec_typed(
                data,
                |c| c.read_u16::<LittleEndian>().map(f16::from_bits),
                ArrayData::Float16,
            ),
            DataType::Float32 => {
                read_vec_typed(data, |c| c.read_f32::<LittleEndian>(), ArrayData::Float32)
            }
            DataType::Float64 => {
                read_vec_typed(data, |c| c.read_f64::<LittleEndian>(), ArrayData::Float64)
            }
            DataType::Complex64 => read_vec_typed(
                data,
                |c| Ok(Complex::new(c.read_f32::<LittleEndian>()?, c.read_f32::<LittleEndian>()?)),
                ArrayData::Complex64,
            ),
            DataType::Complex128 => read_vec_typed(
                data,
                |c| Ok(Complex::new(c.read_f64::<LittleEndian>()?, c.read_f64::<LittleEndian>()?)),
                ArrayData::Complex128,
            ),
        }
    }
}

/// Helper: read a vector of a fixed-size numeric type.
fn read_vec_typed<T, F>(
    data: &[u8],
    read: F,
    wrap: fn(Vec<T>) -> ArrayData,
) -> ShardResult<ArrayData>
where
    F: Fn(&mut Cursor<&[u8]>) -> std::io::Result<T>,
{
    let elem_size = std::mem::size_of::<T>();
    let count = data.len() / elem_size;
    let mut out = Vec::with_capacity(count);
    let mut cursor = Cursor::new(data);
    for _ in 0..count {
        let val = read(&mut cursor)
            .map_err(|e| ShardError::Codec(format!("Failed to read value: {e}")))?;
        out.push(val);
    }
    Ok(wrap(out))
}

// ---------------------------------------------------------------------------
// Tensor
// ---------------------------------------------------------------------------

/// Product of `shape`, or `None` if it does not fit in a `usize`.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// A dense, row-major n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: ArrayData,
}

impl Tensor {
    /// Build a tensor, checking that `shape` covers exactly `data.len()` elements.
    pub fn new(shape: Vec<usize>, data: impl Into<ArrayData>) -> ShardResult<Self> {
        let data = data.into();
        let expected = element_count(&shape).ok_or_else(|| {
            ShardError::Codec(format!("shape {shape:?} overflows the element count"))
        })?;
        if expected != data.len() {
            return Err(ShardError::Codec(format!(
                "shape {shape:?} holds {expected} elements but {} were given",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A one-dimensional tensor over `data`.
    pub fn vector(data: impl Into<ArrayData>) -> Self {
        let data = data.into();
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_tokens_parse_and_print() {
        for dtype in [
            DataType::Bool,
            DataType::Int32,
            DataType::UInt64,
            DataType::Float16,
            DataType::Complex128,
        ] {
            assert_eq!(dtype.as_str().parse::<DataType>().unwrap(), dtype);
        }
        assert!("int33".parse::<DataType>().is_err());
    }

    #[test]
    fn le_bytes_layout() {
        let data = ArrayData::from(vec![1i32, -2]);
        assert_eq!(data.to_le_bytes(), vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
        let back = ArrayData::from_le_bytes(DataType::Int32, &data.to_le_bytes()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn complex_and_half_survive_bytes() {
        let data = ArrayData::from(vec![Complex::new(1.5f32, -0.25)]);
        let back = ArrayData::from_le_bytes(DataType::Complex64, &data.to_le_bytes()).unwrap();
        assert_eq!(back, data);

        let data = ArrayData::from(vec![f16::from_f32(0.5), f16::from_f32(-3.0)]);
        let back = ArrayData::from_le_bytes(DataType::Float16, &data.to_le_bytes()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn ragged_bytes_are_rejected() {
        assert!(ArrayData::from_le_bytes(DataType::Float64, &[0u8; 12]).is_err());
    }

    #[test]
    fn tensor_shape_must_cover_data() {
        assert!(Tensor::new(vec![2, 3], vec![0f32; 6]).is_ok());
        assert!(Tensor::new(vec![2, 3], vec![0f32; 5]).is_err());
        assert_eq!(Tensor::vector(vec![1u8, 2, 3]).shape(), &[3]);
    }

    #[test]
    fn slice_clamps_to_len() {
        let data = ArrayData::from(vec![1i64, 2, 3, 4]);
        assert_eq!(data.slice(1..3), ArrayData::from(vec![2i64, 3]));
        assert_eq!(data.slice(3..10), ArrayData::from(vec![4i64]));
        assert!(data.slice(7..9).is_empty());
    }
}
