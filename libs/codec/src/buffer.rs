//! Typed numeric buffers
//!
//! A [`TypedBuffer`] is the codec's representation of a multi-dimensional
//! numeric array: element type, shape, byte order and the raw element bytes.
//! Buffers compare by logical content, so a big-endian buffer equals the
//! little-endian buffer holding the same numbers.

use crate::error::CodecError;
use bytemuck::Pod;
use std::fmt;
use std::str::FromStr;

/// Element type of a typed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    /// Size of one element in bytes
    pub fn item_size(self) -> usize {
        match self {
            DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }

    /// Wire name of the dtype
    pub fn name(self) -> &'static str {
        match self {
            DType::Int8 => "int8",
            DType::UInt8 => "uint8",
            DType::Int16 => "int16",
            DType::UInt16 => "uint16",
            DType::Int32 => "int32",
            DType::UInt32 => "uint32",
            DType::Int64 => "int64",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s {
            "int8" => DType::Int8,
            "uint8" => DType::UInt8,
            "int16" => DType::Int16,
            "uint16" => DType::UInt16,
            "int32" => DType::Int32,
            "uint32" => DType::UInt32,
            "int64" => DType::Int64,
            "uint64" => DType::UInt64,
            "float32" => DType::Float32,
            "float64" => DType::Float64,
            other => {
                return Err(CodecError::invalid_buffer(format!(
                    "unknown dtype '{}'",
                    other
                )))
            }
        };
        Ok(dtype)
    }
}

/// Byte order of the raw element bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the host
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        }
    }
}

impl FromStr for ByteOrder {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "little" => Ok(ByteOrder::Little),
            "big" => Ok(ByteOrder::Big),
            other => Err(CodecError::invalid_buffer(format!(
                "unknown byte order '{}'",
                other
            ))),
        }
    }
}

/// Rust element types that map onto a [`DType`]
pub trait Element: Pod {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = $dtype;
        })*
    };
}

impl_element! {
    i8 => DType::Int8,
    u8 => DType::UInt8,
    i16 => DType::Int16,
    u16 => DType::UInt16,
    i32 => DType::Int32,
    u32 => DType::UInt32,
    i64 => DType::Int64,
    u64 => DType::UInt64,
    f32 => DType::Float32,
    f64 => DType::Float64,
}

/// Multi-dimensional numeric buffer with explicit dtype, shape and byte order
#[derive(Debug, Clone)]
pub struct TypedBuffer {
    dtype: DType,
    shape: Vec<usize>,
    byte_order: ByteOrder,
    data: Vec<u8>,
}

impl TypedBuffer {
    /// Build a buffer from raw parts, validating length against shape
    pub fn from_raw(
        dtype: DType,
        shape: Vec<usize>,
        byte_order: ByteOrder,
        data: Vec<u8>,
    ) -> Result<Self, CodecError> {
        let expected = byte_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(CodecError::invalid_buffer(format!(
                "{} buffer of shape {:?} needs {} bytes, got {}",
                dtype,
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            dtype,
            shape,
            byte_order,
            data,
        })
    }

    /// Build a native-order buffer from a slice of elements
    pub fn from_slice<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self, CodecError> {
        Self::from_raw(
            T::DTYPE,
            shape,
            ByteOrder::native(),
            bytemuck::cast_slice(values).to_vec(),
        )
    }

    /// Zero-filled native-order buffer
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Result<Self, CodecError> {
        let len = byte_len(dtype, &shape)?;
        Ok(Self {
            dtype,
            shape,
            byte_order: ByteOrder::native(),
            data: vec![0; len],
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Raw element bytes in the buffer's own byte order
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.item_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to host byte order, swapping element bytes when they differ
    pub fn into_native_order(mut self) -> Self {
        if self.byte_order != ByteOrder::native() {
            swap_elements(&mut self.data, self.dtype.item_size());
            self.byte_order = ByteOrder::native();
        }
        self
    }

    /// Convert to the requested byte order
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        if self.byte_order != order {
            swap_elements(&mut self.data, self.dtype.item_size());
            self.byte_order = order;
        }
        self
    }

    /// Copy the elements out as `T`, in host byte order
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, CodecError> {
        if T::DTYPE != self.dtype {
            return Err(CodecError::DTypeMismatch {
                expected: T::DTYPE.to_string(),
                actual: self.dtype.to_string(),
            });
        }
        let native = self.native_bytes();
        Ok(native
            .chunks_exact(self.dtype.item_size())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }

    fn native_bytes(&self) -> std::borrow::Cow<'_, [u8]> {
        if self.byte_order == ByteOrder::native() {
            std::borrow::Cow::Borrowed(&self.data)
        } else {
            let mut swapped = self.data.clone();
            swap_elements(&mut swapped, self.dtype.item_size());
            std::borrow::Cow::Owned(swapped)
        }
    }
}

impl PartialEq for TypedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.shape == other.shape
            && self.native_bytes() == other.native_bytes()
    }
}

/// Byte length of a buffer; every dimension must be positive and the total must fit `usize`
fn byte_len(dtype: DType, shape: &[usize]) -> Result<usize, CodecError> {
    if shape.contains(&0) {
        return Err(CodecError::invalid_buffer(format!(
            "shape {:?} has a zero dimension",
            shape
        )));
    }
    shape
        .iter()
        .try_fold(dtype.item_size(), |total, dim| total.checked_mul(*dim))
        .ok_or_else(|| {
            CodecError::invalid_buffer(format!("shape {:?} overflows the addressable size", shape))
        })
}

fn swap_elements(data: &mut [u8], item_size: usize) {
    if item_size > 1 {
        for chunk in data.chunks_exact_mut(item_size) {
            chunk.reverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_and_back() {
        let buffer = TypedBuffer::from_slice(vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(buffer.dtype(), DType::Float32);
        assert_eq!(buffer.shape(), &[2, 2]);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_length_must_match_shape() {
        let result = TypedBuffer::from_raw(DType::Int16, vec![3], ByteOrder::Little, vec![0; 5]);
        assert!(matches!(result, Err(CodecError::InvalidBuffer { .. })));
    }

    #[test]
    fn test_dtype_mismatch_on_read() {
        let buffer = TypedBuffer::from_slice(vec![2], &[1u8, 2]).unwrap();
        let err = buffer.to_vec::<i16>().unwrap_err();
        assert!(matches!(err, CodecError::DTypeMismatch { .. }));
    }

    #[test]
    fn test_byte_order_correction() {
        let values = [1.5f64, -2.25];
        let native = TypedBuffer::from_slice(vec![2], &values).unwrap();
        let foreign_order = match ByteOrder::native() {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        };
        let swapped = native.clone().with_byte_order(foreign_order);

        assert_ne!(swapped.as_bytes(), native.as_bytes());
        assert_eq!(swapped, native);
        assert_eq!(swapped.to_vec::<f64>().unwrap(), values.to_vec());

        let restored = swapped.into_native_order();
        assert_eq!(restored.byte_order(), ByteOrder::native());
        assert_eq!(restored.as_bytes(), native.as_bytes());
    }

    #[test]
    fn test_dtype_names_round_trip() {
        for dtype in [
            DType::Int8,
            DType::UInt8,
            DType::Int16,
            DType::UInt16,
            DType::Int32,
            DType::UInt32,
            DType::Int64,
            DType::UInt64,
            DType::Float32,
            DType::Float64,
        ] {
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
        }
        assert!("complex128".parse::<DType>().is_err());
    }

    #[test]
    fn test_zeros() {
        let buffer = TypedBuffer::zeros(DType::UInt16, vec![4, 3]).unwrap();
        assert_eq!(buffer.as_bytes().len(), 24);
        assert_eq!(buffer.len(), 12);
        assert!(buffer.to_vec::<u16>().unwrap().iter().all(|v| *v == 0));
    }

    #[test]
    fn test_oversized_shape_is_rejected() {
        let huge = vec![usize::MAX / 2, 4, 2];
        let result = TypedBuffer::from_raw(DType::UInt8, huge.clone(), ByteOrder::Little, vec![]);
        assert!(matches!(result, Err(CodecError::InvalidBuffer { .. })));
        // fits as an element count but not once multiplied by the item size
        let wide = vec![usize::MAX / 2 + 1];
        assert!(TypedBuffer::zeros(DType::Float64, wide).is_err());
        assert!(TypedBuffer::zeros(DType::UInt8, huge).is_err());
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        let result = TypedBuffer::from_raw(DType::Int32, vec![2, 0], ByteOrder::Little, vec![]);
        assert!(matches!(result, Err(CodecError::InvalidBuffer { .. })));
        assert!(TypedBuffer::zeros(DType::UInt8, vec![0]).is_err());
    }
}
