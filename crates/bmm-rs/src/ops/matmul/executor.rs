//! Lowers a broadcast batch of matrix products onto sequential primitive calls.
//!
//! Operands are described by their padded stored dims, element strides and a transpose flag.
//! The executor derives the logical (product-order) view of each operand, gives broadcast
//! axes a zero stride and walks the batch: every outer batch axis is iterated in increasing
//! order while the innermost one is handed to the primitive as a native batch, chunked by
//! [`ExecutionContext::native_batch`].

use tracing::{debug, trace};

use super::descriptor::MatrixDescriptor;
use crate::context::ExecutionContext;
use crate::error::{KernelError, KernelResult, PrimitiveError};
use crate::primitive::{GemmCall, GemmOperand, GemmPrimitive, StridedMatrix};
use crate::shape_helpers;
use crate::tensor::{Dims, Element};

/// Stored layout of one operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandPlan {
    dims: Dims,
    strides: Dims,
    transposed: bool,
}

impl OperandPlan {
    /// Row-major operand of the given stored dims.
    pub fn new(dims: &[i64], transposed: bool) -> Self {
        OperandPlan {
            dims: Dims::from_slice(dims),
            strides: shape_helpers::contiguous_strides(dims),
            transposed,
        }
    }

    /// Row-major operand shaped as the descriptor's matrix sequence.
    pub fn from_descriptor(descriptor: &MatrixDescriptor) -> Self {
        Self::new(&descriptor.matrix_sequence_dims(), descriptor.transposed())
    }

    /// Replaces the default strides with `strides` given in product order (trailing pair
    /// already swapped for a transposed operand). Shorter lists are left-padded with `0`.
    pub fn with_logical_strides(mut self, strides: &[i64]) -> KernelResult<Self> {
        let rank = self.dims.len();
        if strides.len() > rank {
            return Err(KernelError::shape(format!(
                "stride override {strides:?} exceeds operand rank {rank} ({:?})",
                self.dims.as_slice()
            )));
        }
        let mut padded: Dims = smallvec::smallvec![0; rank - strides.len()];
        padded.extend_from_slice(strides);
        if self.transposed && rank >= 2 {
            padded.swap(rank - 1, rank - 2);
        }
        self.strides = padded;
        Ok(self)
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn transposed(&self) -> bool {
        self.transposed
    }

    fn padded(&self, rank: usize) -> OperandPlan {
        let extra = rank - self.dims.len();
        let mut dims: Dims = smallvec::smallvec![1; extra];
        dims.extend_from_slice(&self.dims);
        let mut strides: Dims = smallvec::smallvec![0; extra];
        strides.extend_from_slice(&self.strides);
        OperandPlan {
            dims,
            strides,
            transposed: self.transposed,
        }
    }

    /// Dims and strides in product order.
    fn logical(&self) -> (Dims, Dims) {
        let mut dims = self.dims.clone();
        let mut strides = self.strides.clone();
        let rank = dims.len();
        if self.transposed {
            dims.swap(rank - 1, rank - 2);
            strides.swap(rank - 1, rank - 2);
        }
        (dims, strides)
    }
}

/// Per-axis element strides of an operand aligned to the output batch, `0` on broadcast axes.
#[derive(Debug, Clone)]
struct BatchView {
    batch_strides: Dims,
    row_stride: i64,
    col_stride: i64,
}

impl BatchView {
    fn new(dims: &[i64], strides: &[i64], out_batch: &[i64]) -> Self {
        let rank = dims.len();
        let batch_strides = out_batch
            .iter()
            .enumerate()
            .map(|(axis, &extent)| {
                if dims[axis] == 1 && extent != 1 {
                    0
                } else {
                    strides[axis]
                }
            })
            .collect();
        BatchView {
            batch_strides,
            row_stride: strides[rank - 2],
            col_stride: strides[rank - 1],
        }
    }

    /// Largest element offset the view reaches for a `rows x cols` matrix per batch entry.
    fn max_offset(&self, out_batch: &[i64], rows: i64, cols: i64) -> Option<usize> {
        let mut dims: Dims = Dims::from_slice(out_batch);
        dims.push(rows);
        dims.push(cols);
        let mut strides = self.batch_strides.clone();
        strides.push(self.row_stride);
        strides.push(self.col_stride);
        shape_helpers::max_offset(&dims, &strides)
    }

    fn offset(&self, coord: &[i64]) -> usize {
        coord
            .iter()
            .zip(self.batch_strides.iter())
            .map(|(c, s)| c * s)
            .sum::<i64>() as usize
    }

    fn layout(&self, offset: usize) -> StridedMatrix {
        StridedMatrix {
            offset,
            batch_stride: self.batch_strides.last().copied().unwrap_or(0) as usize,
            row_stride: self.row_stride as usize,
            col_stride: self.col_stride as usize,
        }
    }
}

/// Fully validated plan for `out = alpha * op(x) · op(y) + residual` over a broadcast batch.
#[derive(Debug, Clone)]
pub struct BatchedMultiply {
    x: BatchView,
    y: BatchView,
    out: BatchView,
    out_dims: Dims,
    out_strides: Dims,
    m: i64,
    n: i64,
    k: i64,
    alpha: f32,
}

impl BatchedMultiply {
    pub fn new(x: OperandPlan, y: OperandPlan) -> KernelResult<Self> {
        for plan in [&x, &y] {
            if plan.dims.len() < 2 || plan.dims.len() != plan.strides.len() {
                return Err(KernelError::shape(format!(
                    "operand dims {:?} with strides {:?} cannot form a matrix batch",
                    plan.dims.as_slice(),
                    plan.strides.as_slice()
                )));
            }
        }
        let rank = x.dims.len().max(y.dims.len()).max(3);
        let (x_dims, x_strides) = x.padded(rank).logical();
        let (y_dims, y_strides) = y.padded(rank).logical();

        let batch_rank = rank - 2;
        let mut out_dims = Dims::with_capacity(rank);
        for axis in 0..batch_rank {
            let (xe, ye) = (x_dims[axis], y_dims[axis]);
            if xe != ye && xe != 1 && ye != 1 {
                return Err(KernelError::BroadcastMismatch {
                    axis,
                    x_extent: xe,
                    y_extent: ye,
                });
            }
            out_dims.push(if xe == 1 { ye } else { xe });
        }

        let (m, k) = (x_dims[rank - 2], x_dims[rank - 1]);
        let (y_k, n) = (y_dims[rank - 2], y_dims[rank - 1]);
        if k != y_k {
            return Err(KernelError::ContractionMismatch { x_k: k, y_k });
        }
        out_dims.push(m);
        out_dims.push(n);
        let out_strides = shape_helpers::contiguous_strides(&out_dims);

        let out_batch = &out_dims[..batch_rank];
        let x = BatchView::new(&x_dims, &x_strides, out_batch);
        let y = BatchView::new(&y_dims, &y_strides, out_batch);
        let out = BatchView::new(&out_dims, &out_strides, out_batch);
        Ok(BatchedMultiply {
            x,
            y,
            out,
            out_strides,
            out_dims,
            m,
            n,
            k,
            alpha: 1.0,
        })
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Lays the output out so that `permute(out_dims, axis)` is row-major.
    pub fn with_output_permutation(mut self, axis: &[i64]) -> KernelResult<Self> {
        let strides = shape_helpers::permuted_contiguous_strides(&self.out_dims, axis)?;
        let batch_rank = self.out_dims.len() - 2;
        self.out = BatchView::new(&self.out_dims, &strides, &self.out_dims[..batch_rank]);
        self.out_strides = strides;
        Ok(self)
    }

    /// Broadcast batch extents followed by `[M, N]`.
    pub fn out_dims(&self) -> &[i64] {
        &self.out_dims
    }

    /// Element strides of the output buffer per axis of [`out_dims`](Self::out_dims).
    pub fn out_strides(&self) -> &[i64] {
        &self.out_strides
    }

    pub fn out_len(&self) -> usize {
        self.out_dims.iter().product::<i64>() as usize
    }

    /// Number of matrix products in the broadcast batch.
    pub fn batch_count(&self) -> usize {
        self.out_dims[..self.out_dims.len() - 2]
            .iter()
            .product::<i64>() as usize
    }

    fn check_buffer(
        what: &str,
        view: &BatchView,
        out_batch: &[i64],
        rows: i64,
        cols: i64,
        len: usize,
    ) -> KernelResult<()> {
        match view.max_offset(out_batch, rows, cols) {
            Some(last) if last >= len => Err(KernelError::shape(format!(
                "{what} buffer holds {len} elements but the planned view reaches element {last}"
            ))),
            _ => Ok(()),
        }
    }

    /// Issues the primitive calls for the whole batch and drains the stream.
    ///
    /// `residual` is addressed with the output layout. Every buffer is bounds-checked before
    /// the first call; the first failing call aborts the remaining batch.
    pub fn run<P, X, O>(
        &self,
        ctx: &mut ExecutionContext<'_, P>,
        x: &[X],
        y: &[X],
        residual: Option<&[X]>,
        out: &mut [O],
    ) -> KernelResult<()>
    where
        P: GemmPrimitive,
        X: Element,
        O: Element,
    {
        let batch_rank = self.out_dims.len() - 2;
        let out_batch = &self.out_dims[..batch_rank];
        let (m, n, k) = (self.m, self.n, self.k);
        Self::check_buffer("x", &self.x, out_batch, m, k, x.len())?;
        Self::check_buffer("y", &self.y, out_batch, k, n, y.len())?;
        if let Some(residual) = residual {
            Self::check_buffer("residual", &self.out, out_batch, m, n, residual.len())?;
        }
        Self::check_buffer("out", &self.out, out_batch, m, n, out.len())?;

        let inner = out_batch[batch_rank - 1] as usize;
        let outer_count: usize = out_batch[..batch_rank - 1].iter().product::<i64>() as usize;
        let native = ctx.native_batch();
        debug!(
            primitive = ctx.primitive().name(),
            out = ?self.out_dims.as_slice(),
            m,
            n,
            k,
            alpha = self.alpha,
            native_batch = native,
            calls = outer_count * inner.div_ceil(native),
            "batched multiply"
        );
        if inner == 0 || m == 0 || n == 0 {
            return ctx.wait().map_err(|source| self.failure(ctx, 0, source));
        }

        let mut coord: Dims = smallvec::smallvec![0; batch_rank];
        for outer in 0..outer_count {
            let mut rem = outer;
            for axis in (0..batch_rank - 1).rev() {
                let extent = out_batch[axis] as usize;
                coord[axis] = (rem % extent) as i64;
                rem /= extent;
            }

            let mut start = 0usize;
            while start < inner {
                let batch = native.min(inner - start);
                coord[batch_rank - 1] = start as i64;
                let batch_index = outer * inner + start;
                let x_layout = self.x.layout(self.x.offset(&coord));
                let y_layout = self.y.layout(self.y.offset(&coord));
                let out_layout = self.out.layout(self.out.offset(&coord));
                trace!(
                    batch_index,
                    batch,
                    x_byte_offset = x_layout.offset * X::DTYPE.size_in_bytes(),
                    y_byte_offset = y_layout.offset * X::DTYPE.size_in_bytes(),
                    out_byte_offset = out_layout.offset * O::DTYPE.size_in_bytes(),
                    "gemm call"
                );
                let call = GemmCall {
                    batch,
                    m: m as usize,
                    n: n as usize,
                    k: k as usize,
                    alpha: self.alpha,
                    lhs: GemmOperand::new(x, x_layout),
                    rhs: GemmOperand::new(y, y_layout),
                    residual: residual.map(|data| GemmOperand::new(data, out_layout)),
                    out: &mut *out,
                    out_layout,
                };
                ctx.submit(|primitive| primitive.gemm(call))
                    .map_err(|source| self.failure(ctx, batch_index, source))?;
                start += batch;
            }
        }

        ctx.wait()
            .map_err(|source| self.failure(ctx, outer_count * inner, source))
    }

    fn failure<P: GemmPrimitive>(
        &self,
        ctx: &ExecutionContext<'_, P>,
        batch_index: usize,
        source: PrimitiveError,
    ) -> KernelError {
        KernelError::PrimitiveFailure {
            primitive: ctx.primitive().name().to_string(),
            batch_index,
            source,
        }
    }
}
