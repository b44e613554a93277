//! Gradient kernel: `dX` and `dY` from `dOut` through the transpose identities of the
//! product rule.
//!
//! | trans_x | trans_y | dX | dY |
//! |---|---|---|---|
//! | T | T | `Yᵀ·dOutᵀ` | `dOutᵀ·Xᵀ` |
//! | T | F | `Y·dOutᵀ` | `X·dOut` |
//! | F | T | `dOut·Y` | `dOutᵀ·X` |
//! | F | F | `dOut·Yᵀ` | `Xᵀ·dOut` |
//!
//! When a gradient has no batch axis but one of its factors does, the factors are folded to
//! rank 2 so the product sums over the broadcast batch. An operand whose batch has total
//! extent 1 is treated as a plain matrix and restored to its shape afterwards.

use tracing::{debug, debug_span};

use super::attrs::MatMulConfig;
use super::descriptor::{column_matrix_dims, row_matrix_dims, MatrixDescriptor};
use super::executor::{BatchedMultiply, OperandPlan};
use super::fold::{fold_first_and_last_dims, fold_outer_dims};
use crate::context::ExecutionContext;
use crate::error::{KernelError, KernelResult};
use crate::primitive::GemmPrimitive;
use crate::tensor::{DType, Shape, Tensor};

/// How a rank-3 factor collapses to rank 2 before a batch-summing product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// `[P, M, N] -> [P*M, N]`.
    Outer,
    /// `[P, M, N] -> [M, P*N]`.
    FirstAndLast,
}

/// One factor of a gradient product.
#[derive(Debug, Clone, Copy)]
struct Factor<'t> {
    tensor: &'t Tensor,
    transposed: bool,
    fold: Fold,
}

impl<'t> Factor<'t> {
    fn new(tensor: &'t Tensor, transposed: bool, fold: Fold) -> Self {
        Factor {
            tensor,
            transposed,
            fold,
        }
    }

    fn folded(&self) -> KernelResult<Tensor> {
        match self.fold {
            Fold::Outer => fold_outer_dims(self.tensor),
            Fold::FirstAndLast => fold_first_and_last_dims(self.tensor),
        }
    }
}

/// `x`, `y` and `dOut` reshaped to matrix sequences (`[batch, h, w]` or `[h, w]`).
#[derive(Debug)]
struct MatrixSequences {
    x: Tensor,
    y: Tensor,
    dout: Tensor,
}

impl MatrixSequences {
    fn new(
        x: &Tensor,
        y: &Tensor,
        dout: &Tensor,
        trans_x: bool,
        trans_y: bool,
    ) -> KernelResult<Self> {
        let mut x_desc = MatrixDescriptor::new(&row_matrix_dims(x.dims()), trans_x)?;
        let mut y_desc = MatrixDescriptor::new(&column_matrix_dims(y.dims()), trans_y)?;
        // A unit batch is broadcast over the other operand's batch and folds like a matrix.
        if x_desc.batch_size() != y_desc.batch_size() {
            x_desc = x_desc.without_unit_batch();
            y_desc = y_desc.without_unit_batch();
        }
        let (bx, by) = (x_desc.batch_size(), y_desc.batch_size());
        if bx != 0 && by != 0 && (bx != by || batch_axes(x.dims()) != batch_axes(y.dims())) {
            return Err(KernelError::unimplemented(
                "matmul gradient with mutually broadcast batches",
                format!(
                    "x batch {:?} and y batch {:?} differ",
                    batch_axes(x.dims()),
                    batch_axes(y.dims())
                ),
            ));
        }
        if x_desc.cols() != y_desc.rows() {
            return Err(KernelError::ContractionMismatch {
                x_k: x_desc.cols(),
                y_k: y_desc.rows(),
            });
        }

        let dout_dims = if bx == 0 && by == 0 {
            vec![x_desc.rows(), y_desc.cols()]
        } else {
            vec![bx.max(by), x_desc.rows(), y_desc.cols()]
        };
        debug!(
            x = ?x_desc.matrix_sequence_dims().as_slice(),
            y = ?y_desc.matrix_sequence_dims().as_slice(),
            dout = ?dout_dims,
            "matmul grad matrix sequences"
        );
        Ok(MatrixSequences {
            x: x.reshaped(Shape::try_new(x_desc.matrix_sequence_dims())?)?,
            y: y.reshaped(Shape::try_new(y_desc.matrix_sequence_dims())?)?,
            dout: dout.reshaped(Shape::try_new(&dout_dims)?)?,
        })
    }
}

/// Batch axes with leading unit axes stripped.
fn batch_axes(dims: &[i64]) -> &[i64] {
    let batch = &dims[..dims.len().saturating_sub(2)];
    let first = batch.iter().position(|&e| e != 1).unwrap_or(batch.len());
    &batch[first..]
}

/// Computes `dX` and/or `dY`; a `None` target is skipped.
///
/// Both targets are resized to their input's shape and take its dtype and layout
/// descriptor. Fused reshape/transpose attributes and multi-head configurations are
/// rejected.
pub fn matmul_grad<P: GemmPrimitive>(
    ctx: &mut ExecutionContext<'_, P>,
    x: &Tensor,
    y: &Tensor,
    dout: &Tensor,
    config: &MatMulConfig,
    dx: Option<&mut Tensor>,
    dy: Option<&mut Tensor>,
) -> KernelResult<()> {
    let _span = debug_span!(
        "bmm.grad",
        x = ?x.dims(),
        y = ?y.dims(),
        dout = ?dout.dims(),
        dtype = ?x.dtype()
    )
    .entered();

    config.ensure_single_head()?;
    if config.is_input_fused() || config.is_output_fused() {
        return Err(KernelError::unimplemented(
            "matmul gradient",
            "fused reshape/transpose attributes are not supported by the gradient kernel",
        ));
    }
    for (name, tensor) in [("y", y), ("dout", dout)] {
        if tensor.dtype() != x.dtype() {
            return Err(KernelError::argument(format!(
                "matmul grad x has dtype {:?} but {name} has dtype {:?}",
                x.dtype(),
                tensor.dtype()
            )));
        }
    }
    if !matches!(x.dtype(), DType::F32 | DType::BF16) {
        return Err(KernelError::unimplemented(
            "matmul gradient",
            format!("dtype {:?} has no gradient kernel", x.dtype()),
        ));
    }

    let trans_x = config.trans_x && x.rank() >= 2;
    let trans_y = config.trans_y && y.rank() >= 2;
    let seq = MatrixSequences::new(
        &x.contiguous(),
        &y.contiguous(),
        &dout.contiguous(),
        trans_x,
        trans_y,
    )?;
    let (xs, ys, ds) = (&seq.x, &seq.y, &seq.dout);

    use Fold::{FirstAndLast, Outer};
    let (dx_factors, dy_factors) = match (trans_x, trans_y) {
        (true, true) => (
            (Factor::new(ys, true, Outer), Factor::new(ds, true, FirstAndLast)),
            (Factor::new(ds, true, Outer), Factor::new(xs, true, FirstAndLast)),
        ),
        (true, false) => (
            (Factor::new(ys, false, FirstAndLast), Factor::new(ds, true, FirstAndLast)),
            (Factor::new(xs, false, FirstAndLast), Factor::new(ds, false, Outer)),
        ),
        (false, true) => (
            (Factor::new(ds, false, FirstAndLast), Factor::new(ys, false, Outer)),
            (Factor::new(ds, true, Outer), Factor::new(xs, false, Outer)),
        ),
        (false, false) => (
            (Factor::new(ds, false, FirstAndLast), Factor::new(ys, true, FirstAndLast)),
            (Factor::new(xs, true, Outer), Factor::new(ds, false, Outer)),
        ),
    };

    if let Some(dx) = dx {
        compute_gradient(ctx, dx_factors, xs, x, config.alpha, dx)?;
    }
    if let Some(dy) = dy {
        compute_gradient(ctx, dy_factors, ys, y, config.alpha, dy)?;
    }
    Ok(())
}

/// Runs one gradient product into `target`, shaped like `sequence` while computing and
/// restored to `input`'s shape and layout afterwards.
fn compute_gradient<P: GemmPrimitive>(
    ctx: &mut ExecutionContext<'_, P>,
    (lhs, rhs): (Factor<'_>, Factor<'_>),
    sequence: &Tensor,
    input: &Tensor,
    alpha: f32,
    target: &mut Tensor,
) -> KernelResult<()> {
    target.resize_as(input.dtype(), sequence.shape().clone());

    let combine = (lhs.tensor.rank() == 3 || rhs.tensor.rank() == 3) && target.rank() == 2;
    let (lhs_tensor, rhs_tensor) = if combine {
        (lhs.folded()?, rhs.folded()?)
    } else {
        (lhs.tensor.clone(), rhs.tensor.clone())
    };

    let lhs_desc = MatrixDescriptor::new(lhs_tensor.dims(), lhs.transposed)?;
    let rhs_desc = MatrixDescriptor::new(rhs_tensor.dims(), rhs.transposed)?;
    let exec = BatchedMultiply::new(
        OperandPlan::from_descriptor(&lhs_desc),
        OperandPlan::from_descriptor(&rhs_desc),
    )?
    .with_alpha(alpha);
    if exec.out_len() != target.len() {
        return Err(KernelError::shape(format!(
            "gradient product {:?} does not fit gradient {:?}",
            exec.out_dims(),
            target.dims()
        )));
    }

    super::dispatch(ctx, &exec, &lhs_tensor, &rhs_tensor, None, target)?;

    target.resize(input.shape().clone());
    if !input.is_contiguous() {
        *target = target.with_layout(input.strides())?;
    }
    Ok(())
}
