//! Host-backed tensor consumed and produced by the matmul kernel.

use half::bf16;
use rand::Rng;

use super::dtype::DType;
use super::shape::{Dims, Shape};
use super::storage::{Element, TensorData};
use crate::error::{KernelError, KernelResult};
use crate::shape_helpers;

/// Dense tensor with a dtype-tagged payload and a strides layout descriptor.
///
/// The payload is always densely packed; `strides` describes how the logical axes map
/// onto it and is rewritten by the kernel after it produces an output.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    strides: Dims,
    data: TensorData,
}

impl Tensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> KernelResult<Self> {
        Self::from_elements(shape, data)
    }

    /// Constructs a tensor of any supported element type.
    pub fn from_elements<T: Element>(shape: Shape, data: Vec<T>) -> KernelResult<Self> {
        Self::from_data(shape, T::wrap(data))
    }

    /// Wraps an existing payload, checking that it covers the shape.
    pub fn from_data(shape: Shape, data: TensorData) -> KernelResult<Self> {
        if data.len() != shape.num_elements() {
            return Err(KernelError::shape(format!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Tensor {
            strides: shape.contiguous_strides(),
            shape,
            data,
        })
    }

    /// Returns a zero-initialized tensor of the requested dtype and shape.
    pub fn zeros(dtype: DType, shape: Shape) -> Self {
        let data = TensorData::zeros(dtype, shape.num_elements());
        Tensor {
            strides: shape.contiguous_strides(),
            shape,
            data,
        }
    }

    /// Samples from a normal distribution (`N(0, std^2)`) using the Box-Muller transform.
    pub fn randn(shape: Shape, std: f32, rng: &mut impl Rng) -> Self {
        let len = shape.num_elements();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen::<f32>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            values.push(r * theta.cos() * std);
            if values.len() < len {
                values.push(r * theta.sin() * std);
            }
        }
        Tensor {
            strides: shape.contiguous_strides(),
            shape,
            data: f32::wrap(values),
        }
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Provides access to the tensor shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[i64] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Layout descriptor: element strides per logical axis.
    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// Returns the scalar dtype of the tensor payload.
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// True when `strides` describes the row-major layout of `shape`.
    pub fn is_contiguous(&self) -> bool {
        self.strides.as_slice() == self.shape.contiguous_strides().as_slice()
    }

    /// Typed view of the payload.
    pub fn as_slice<T: Element>(&self) -> KernelResult<&[T]> {
        T::slice(&self.data).ok_or_else(|| {
            KernelError::argument(format!(
                "tensor holds {:?} elements, requested {:?}",
                self.dtype(),
                T::DTYPE
            ))
        })
    }

    /// Mutable typed view of the payload; copies the buffer first if it is shared.
    pub fn as_mut_slice<T: Element>(&mut self) -> KernelResult<&mut [T]> {
        let dtype = self.dtype();
        T::slice_mut(&mut self.data).ok_or_else(|| {
            KernelError::argument(format!(
                "tensor holds {dtype:?} elements, requested {:?}",
                T::DTYPE
            ))
        })
    }

    /// Borrows the underlying `f32` data slice; a test and inspection convenience.
    ///
    /// # Panics
    ///
    /// When the tensor is not `F32`. Use [`Tensor::as_slice`] for a typed, fallible view.
    pub fn data(&self) -> &[f32] {
        match f32::slice(&self.data) {
            Some(values) => values,
            None => panic!("tensor data is not stored as f32"),
        }
    }

    /// Widens every element to `f32`, walking the logical layout in row-major order.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(v) => self.gather_logical(v),
            TensorData::BF16(v) => widen(&self.gather_logical(v)),
            TensorData::I8(v) => widen(&self.gather_logical(v)),
            TensorData::U8(v) => widen(&self.gather_logical(v)),
        }
    }

    /// Changes the logical shape, keeping the payload when the element count is unchanged
    /// and reallocating a zeroed payload otherwise. The layout is reset to row-major.
    pub fn resize(&mut self, shape: Shape) {
        if shape.num_elements() != self.data.len() {
            self.data = TensorData::zeros(self.dtype(), shape.num_elements());
        }
        self.strides = shape.contiguous_strides();
        self.shape = shape;
    }

    /// Reallocates as a zeroed tensor of `dtype` unless it already matches.
    pub fn resize_as(&mut self, dtype: DType, shape: Shape) {
        if self.dtype() != dtype {
            self.data = TensorData::zeros(dtype, shape.num_elements());
        }
        self.resize(shape);
    }

    /// Shares the payload under a new shape with the same element count.
    pub fn reshaped(&self, shape: Shape) -> KernelResult<Tensor> {
        if shape.num_elements() != self.len() {
            return Err(KernelError::ReshapeMismatch {
                from: self.dims().to_vec(),
                target: shape.dims().to_vec(),
                elements: self.len() as i64,
            });
        }
        if !self.is_contiguous() {
            return Err(KernelError::shape(format!(
                "cannot reshape non-contiguous tensor {:?} with strides {:?}",
                self.shape,
                self.strides.as_slice()
            )));
        }
        Ok(Tensor {
            strides: shape.contiguous_strides(),
            shape,
            data: self.data.clone(),
        })
    }

    /// Physically reorders the payload so that output axis `i` is input axis `axis[i]`.
    pub fn permuted(&self, axis: &[i64]) -> KernelResult<Tensor> {
        let dims = shape_helpers::permute(self.dims(), axis)?;
        let strides = shape_helpers::permute(&self.strides, axis)?;
        let shape = Shape::try_new(&dims)?;
        let data = match &self.data {
            TensorData::F32(v) => f32::wrap(gather(v, &dims, &strides)),
            TensorData::BF16(v) => bf16::wrap(gather(v, &dims, &strides)),
            TensorData::I8(v) => i8::wrap(gather(v, &dims, &strides)),
            TensorData::U8(v) => u8::wrap(gather(v, &dims, &strides)),
        };
        Tensor::from_data(shape, data)
    }

    /// Returns a row-major copy when the layout is strided, or a cheap clone otherwise.
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() {
            return self.clone();
        }
        let data = match &self.data {
            TensorData::F32(v) => f32::wrap(self.gather_logical(v)),
            TensorData::BF16(v) => bf16::wrap(self.gather_logical(v)),
            TensorData::I8(v) => i8::wrap(self.gather_logical(v)),
            TensorData::U8(v) => u8::wrap(self.gather_logical(v)),
        };
        Tensor {
            strides: self.shape.contiguous_strides(),
            shape: self.shape.clone(),
            data,
        }
    }

    /// Re-lays the payload so that `strides` addresses the same logical values.
    ///
    /// `strides` must describe a dense layout: every element of a buffer as long as the
    /// tensor is addressed exactly once.
    pub fn with_layout(&self, strides: &[i64]) -> KernelResult<Tensor> {
        if strides.len() != self.rank() {
            return Err(KernelError::shape(format!(
                "strides {strides:?} do not match rank of {:?}",
                self.shape
            )));
        }
        let span = shape_helpers::max_offset(self.dims(), strides).map_or(0, |last| last + 1);
        if span != self.len() || strides.iter().any(|&s| s < 0) {
            return Err(KernelError::shape(format!(
                "strides {strides:?} do not describe a dense layout of {:?}",
                self.shape
            )));
        }
        let data = match &self.data {
            TensorData::F32(v) => f32::wrap(scatter(&self.gather_logical(v), self.dims(), strides)),
            TensorData::BF16(v) => {
                bf16::wrap(scatter(&self.gather_logical(v), self.dims(), strides))
            }
            TensorData::I8(v) => i8::wrap(scatter(&self.gather_logical(v), self.dims(), strides)),
            TensorData::U8(v) => u8::wrap(scatter(&self.gather_logical(v), self.dims(), strides)),
        };
        Ok(Tensor {
            shape: self.shape.clone(),
            strides: Dims::from_slice(strides),
            data,
        })
    }

    fn gather_logical<T: Copy>(&self, values: &[T]) -> Vec<T> {
        if self.is_contiguous() {
            return values.to_vec();
        }
        gather(values, self.dims(), &self.strides)
    }
}

fn widen<T: Element>(values: &[T]) -> Vec<f32> {
    values.iter().map(|v| v.to_f32()).collect()
}

/// Visits the strided offset of every logical element in row-major order of `dims`.
fn for_each_offset(dims: &[i64], strides: &[i64], mut visit: impl FnMut(usize)) {
    let len = dims.iter().product::<i64>() as usize;
    let mut coord = vec![0i64; dims.len()];
    for _ in 0..len {
        let offset: i64 = coord.iter().zip(strides).map(|(c, s)| c * s).sum();
        visit(offset as usize);
        for axis in (0..dims.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < dims[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
}

/// Reads `values` through `strides` in row-major order of `dims`.
fn gather<T: Copy>(values: &[T], dims: &[i64], strides: &[i64]) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for_each_offset(dims, strides, |offset| out.push(values[offset]));
    out
}

/// Inverse of [`gather`] for dense layouts.
fn scatter<T: Copy + Default>(logical: &[T], dims: &[i64], strides: &[i64]) -> Vec<T> {
    let mut out = vec![T::default(); logical.len()];
    let mut next = logical.iter();
    for_each_offset(dims, strides, |offset| {
        if let Some(&value) = next.next() {
            out[offset] = value;
        }
    });
    out
}
