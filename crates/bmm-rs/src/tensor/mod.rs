//! Host tensor abstractions consumed by the matmul kernel.
//!
//! The tensor module defines shapes, dtypes, the element trait implemented by every
//! supported scalar type, and the dense [`Tensor`] wrapper whose strides descriptor the
//! kernel rewrites after producing an output.

pub mod dtype;
mod host_tensor;
pub mod shape;
pub mod storage;

pub use dtype::DType;
pub use host_tensor::Tensor;
pub use shape::{Dims, Shape, MAX_RANK};
pub use storage::{Element, TensorData};
