//! Lightweight wrapper for tensor shapes and dimension bookkeeping.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{KernelError, KernelResult};
use crate::shape_helpers;

/// Largest rank a shape may carry; dims and strides live inline up to this size.
pub const MAX_RANK: usize = 8;

/// Inline storage for extents and strides.
pub type Dims = SmallVec<[i64; MAX_RANK]>;

/// Stores the logical dimensions of a tensor.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Dims,
}

impl Shape {
    /// Constructs a new shape from literal dimensions, for tests and fixed shapes.
    ///
    /// # Panics
    ///
    /// On negative extents, element-count overflow or a rank above [`MAX_RANK`]. Kernel
    /// paths and caller-supplied dimensions go through [`Shape::try_new`].
    pub fn new(dims: impl AsRef<[i64]>) -> Self {
        match Self::try_new(dims) {
            Ok(shape) => shape,
            Err(err) => panic!("invalid shape: {err}"),
        }
    }

    /// Fallible constructor validating rank and extents.
    pub fn try_new(dims: impl AsRef<[i64]>) -> KernelResult<Self> {
        let dims = dims.as_ref();
        if dims.len() > MAX_RANK {
            return Err(KernelError::RankOverflow {
                rank: dims.len(),
                max: MAX_RANK,
            });
        }
        if let Some(negative) = dims.iter().find(|&&d| d < 0) {
            return Err(KernelError::shape(format!(
                "negative extent {negative} in {dims:?}"
            )));
        }
        shape_helpers::checked_element_count_or_error(dims, || {
            KernelError::shape(format!("element count of {dims:?} overflows usize"))
        })?;
        Ok(Shape {
            dims: Dims::from_slice(dims),
        })
    }

    /// Rank-0 shape holding a single element.
    pub fn scalar() -> Self {
        Shape { dims: Dims::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product::<i64>() as usize
    }

    /// Row-major strides for a densely packed tensor of this shape.
    pub fn contiguous_strides(&self) -> Dims {
        shape_helpers::contiguous_strides(&self.dims)
    }

    /// Reinterprets the shape with `target` extents, honouring `0` (copy) and `-1` (infer).
    pub fn reshape(&self, target: &[i64]) -> KernelResult<Shape> {
        let dims = shape_helpers::reshape_dims(&self.dims, target)?;
        Ok(Shape { dims })
    }

    /// Reorders axes so that output axis `i` is input axis `axis[i]`.
    pub fn transpose(&self, axis: &[i64]) -> KernelResult<Shape> {
        let dims = shape_helpers::permute(&self.dims, axis)?;
        Ok(Shape { dims })
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}

impl TryFrom<&[i64]> for Shape {
    type Error = KernelError;

    fn try_from(dims: &[i64]) -> KernelResult<Self> {
        Shape::try_new(dims)
    }
}
