//! Matrix view of an N-d operand: leading axes fold into a single batch count.

use crate::error::{KernelError, KernelResult};
use crate::tensor::Dims;

/// `{batch_size, height, width, transposed}` summary of an operand.
///
/// `height`/`width` are the stored extents of the trailing two axes; [`rows`](Self::rows)
/// and [`cols`](Self::cols) report the extents of the operand as it enters the product.
/// A `batch_size` of `0` means the operand has no batch axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixDescriptor {
    batch_size: i64,
    height: i64,
    width: i64,
    transposed: bool,
}

impl MatrixDescriptor {
    pub fn new(dims: &[i64], transposed: bool) -> KernelResult<Self> {
        let rank = dims.len();
        if rank < 2 {
            return Err(KernelError::shape(format!(
                "matrix descriptor needs rank >= 2, got {dims:?}"
            )));
        }
        let batch_size = if rank == 2 {
            0
        } else {
            dims[..rank - 2].iter().product()
        };
        Ok(MatrixDescriptor {
            batch_size,
            height: dims[rank - 2],
            width: dims[rank - 1],
            transposed,
        })
    }

    /// Drops a batch axis of total extent 1, leaving a plain matrix.
    pub fn without_unit_batch(self) -> Self {
        if self.batch_size == 1 {
            MatrixDescriptor {
                batch_size: 0,
                ..self
            }
        } else {
            self
        }
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn transposed(&self) -> bool {
        self.transposed
    }

    pub fn rows(&self) -> i64 {
        if self.transposed {
            self.width
        } else {
            self.height
        }
    }

    pub fn cols(&self) -> i64 {
        if self.transposed {
            self.height
        } else {
            self.width
        }
    }

    /// Stored shape as `[batch, height, width]`, or `[height, width]` without a batch.
    pub fn matrix_sequence_dims(&self) -> Dims {
        if self.batch_size == 0 {
            smallvec::smallvec![self.height, self.width]
        } else {
            smallvec::smallvec![self.batch_size, self.height, self.width]
        }
    }
}

/// Treats a rank-1 operand as a single row `[1, K]`.
pub fn row_matrix_dims(dims: &[i64]) -> Dims {
    match dims {
        [k] => smallvec::smallvec![1, *k],
        _ => Dims::from_slice(dims),
    }
}

/// Treats a rank-1 operand as a single column `[K, 1]`.
pub fn column_matrix_dims(dims: &[i64]) -> Dims {
    match dims {
        [k] => smallvec::smallvec![*k, 1],
        _ => Dims::from_slice(dims),
    }
}
