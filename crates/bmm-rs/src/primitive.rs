//! Interface between the batched executor and a dense GEMM implementation.
//!
//! The executor lowers every logical batch of matrix products onto a sequence of
//! [`GemmCall`]s. Each call describes up to `batch` independent products whose operands
//! are addressed through element strides, so broadcast operands (stride `0`), transposed
//! views and fused-permutation layouts all reach the primitive without a copy.

use crate::error::{PrimitiveError, PrimitiveResult};
use crate::tensor::Element;

/// Element-stride addressing of a batch of matrices inside a flat buffer.
///
/// Element `(b, r, c)` lives at `offset + b * batch_stride + r * row_stride + c * col_stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StridedMatrix {
    pub offset: usize,
    pub batch_stride: usize,
    pub row_stride: usize,
    pub col_stride: usize,
}

impl StridedMatrix {
    /// Densely packed row-major batch of `rows x cols` matrices.
    pub fn row_major(rows: usize, cols: usize) -> Self {
        StridedMatrix {
            offset: 0,
            batch_stride: rows * cols,
            row_stride: cols,
            col_stride: 1,
        }
    }

    #[inline]
    pub fn index(&self, batch: usize, row: usize, col: usize) -> usize {
        self.offset + batch * self.batch_stride + row * self.row_stride + col * self.col_stride
    }

    /// Highest element index touched by a `batch x rows x cols` view, `None` when empty.
    pub fn max_index(&self, batch: usize, rows: usize, cols: usize) -> Option<usize> {
        if batch == 0 || rows == 0 || cols == 0 {
            return None;
        }
        Some(self.index(batch - 1, rows - 1, cols - 1))
    }

    /// True when each matrix is a packed row-major `rows x cols` block.
    pub fn is_row_major(&self, cols: usize) -> bool {
        self.col_stride == 1 && self.row_stride == cols
    }

    /// True when each matrix is a packed column-major `rows x cols` block.
    pub fn is_col_major(&self, rows: usize) -> bool {
        self.row_stride == 1 && self.col_stride == rows
    }
}

/// Read-only operand of a [`GemmCall`].
#[derive(Debug, Clone, Copy)]
pub struct GemmOperand<'a, T> {
    pub data: &'a [T],
    pub layout: StridedMatrix,
}

impl<'a, T> GemmOperand<'a, T> {
    pub fn new(data: &'a [T], layout: StridedMatrix) -> Self {
        GemmOperand { data, layout }
    }

    fn check(&self, what: &str, batch: usize, rows: usize, cols: usize) -> PrimitiveResult<()> {
        check_bounds(what, self.data.len(), &self.layout, batch, rows, cols)
    }
}

/// One primitive invocation: `out[b] = alpha * lhs[b] · rhs[b] + residual[b]` for
/// `b in 0..batch`, with `lhs[b]` of shape `m x k`, `rhs[b]` of shape `k x n` and
/// `out[b]`/`residual[b]` of shape `m x n`.
///
/// Products are accumulated in `f32` and narrowed to `O` on store.
#[derive(Debug)]
pub struct GemmCall<'a, X, O> {
    pub batch: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub lhs: GemmOperand<'a, X>,
    pub rhs: GemmOperand<'a, X>,
    pub residual: Option<GemmOperand<'a, X>>,
    pub out: &'a mut [O],
    pub out_layout: StridedMatrix,
}

impl<X, O> GemmCall<'_, X, O> {
    /// Checks that every view stays inside its buffer.
    pub fn validate(&self) -> PrimitiveResult<()> {
        self.lhs.check("lhs", self.batch, self.m, self.k)?;
        self.rhs.check("rhs", self.batch, self.k, self.n)?;
        if let Some(residual) = &self.residual {
            residual.check("residual", self.batch, self.m, self.n)?;
        }
        check_bounds(
            "out",
            self.out.len(),
            &self.out_layout,
            self.batch,
            self.m,
            self.n,
        )
    }
}

fn check_bounds(
    what: &str,
    len: usize,
    layout: &StridedMatrix,
    batch: usize,
    rows: usize,
    cols: usize,
) -> PrimitiveResult<()> {
    match layout.max_index(batch, rows, cols) {
        Some(last) if last >= len => Err(PrimitiveError::new(format!(
            "{what} view {batch}x{rows}x{cols} with layout {layout:?} reaches element {last} \
             of a {len}-element buffer"
        ))),
        _ => Ok(()),
    }
}

/// Dense single-multiply primitive driven by the batched executor.
///
/// Implementations carry no per-call state; the executor issues calls strictly in order
/// and calls [`GemmPrimitive::synchronize`] once after the last one.
pub trait GemmPrimitive: Send + Sync {
    /// Human-readable identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Largest `batch` a single call accepts.
    fn max_native_batch(&self) -> usize {
        usize::MAX
    }

    /// Executes one batched multiply.
    fn gemm<X: Element, O: Element>(&self, call: GemmCall<'_, X, O>) -> PrimitiveResult<()>;

    /// Blocks until all previously issued calls have completed.
    fn synchronize(&self) -> PrimitiveResult<()> {
        Ok(())
    }
}
