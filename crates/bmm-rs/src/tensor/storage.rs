//! Defines the scalar element trait implemented by tensor storages.

use std::fmt::Debug;
use std::sync::Arc;

use half::bf16;

use super::dtype::DType;

/// Typed payload of a [`Tensor`](super::Tensor).
///
/// Buffers are reference counted and copied on first write, so reshaped aliases share memory.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Arc<Vec<f32>>),
    BF16(Arc<Vec<bf16>>),
    I8(Arc<Vec<i8>>),
    U8(Arc<Vec<u8>>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::BF16(_) => DType::BF16,
            TensorData::I8(_) => DType::I8,
            TensorData::U8(_) => DType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::BF16(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-filled payload of `len` elements.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => f32::wrap(vec![0.0; len]),
            DType::BF16 => bf16::wrap(vec![bf16::ZERO; len]),
            DType::I8 => i8::wrap(vec![0; len]),
            DType::U8 => u8::wrap(vec![0; len]),
        }
    }
}

/// Scalar types the kernel can read and write.
///
/// Products are always accumulated in `f32`; implementations only describe how to widen
/// and narrow a single element.
pub trait Element: Copy + Default + Debug + Send + Sync + 'static {
    /// Dtype tag matching this element type.
    const DTYPE: DType;

    /// Converts from a 32-bit float into this element type.
    fn from_f32(v: f32) -> Self;

    /// Converts the element into a 32-bit float for accumulation.
    fn to_f32(self) -> f32;

    /// Zero-copy view of an `f32` buffer; `None` for every other element type.
    fn as_f32_slice(_values: &[Self]) -> Option<&[f32]> {
        None
    }

    fn slice(data: &TensorData) -> Option<&[Self]>;

    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]>;

    fn wrap(values: Vec<Self>) -> TensorData;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn from_f32(v: f32) -> Self {
        v
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn as_f32_slice(values: &[Self]) -> Option<&[f32]> {
        Some(values)
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::F32(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
        match data {
            TensorData::F32(v) => Some(Arc::make_mut(v).as_mut_slice()),
            _ => None,
        }
    }

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::F32(Arc::new(values))
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }

    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::BF16(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
        match data {
            TensorData::BF16(v) => Some(Arc::make_mut(v).as_mut_slice()),
            _ => None,
        }
    }

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::BF16(Arc::new(values))
    }
}

impl Element for i8 {
    const DTYPE: DType = DType::I8;

    fn from_f32(v: f32) -> Self {
        v.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8
    }

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::I8(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
        match data {
            TensorData::I8(v) => Some(Arc::make_mut(v).as_mut_slice()),
            _ => None,
        }
    }

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::I8(Arc::new(values))
    }
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;

    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, u8::MAX as f32) as u8
    }

    fn to_f32(self) -> f32 {
        self as f32
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::U8(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
        match data {
            TensorData::U8(v) => Some(Arc::make_mut(v).as_mut_slice()),
            _ => None,
        }
    }

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::U8(Arc::new(values))
    }
}
