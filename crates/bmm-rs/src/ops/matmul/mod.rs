//! Batched matrix multiplication: forward and gradient kernels.
//!
//! A forward call resolves each operand's effective shape from its fused reshape/transpose
//! metadata ([`resolve`]), plans the joint broadcast ([`broadcast`]), and lowers the batch
//! onto a [`GemmPrimitive`] ([`executor`]). The gradient kernel ([`grad`]) reuses the same
//! executor with the transpose identities of the product rule.
//!
//! Output element types follow the input: `F32 -> F32`, `BF16 -> BF16`, `I8 -> I8`,
//! `U8 -> I8`, with `force_fp32_output` widening every reduced type to `F32`.

pub mod attrs;
pub mod broadcast;
pub mod descriptor;
pub mod executor;
pub mod fold;
pub mod grad;
pub mod resolve;

use half::bf16;
use tracing::debug_span;

use crate::context::ExecutionContext;
use crate::error::{KernelError, KernelResult};
use crate::primitive::GemmPrimitive;
use crate::tensor::{DType, Element, Shape, Tensor};

pub use attrs::{AttrValue, AttributeMap, FusedAttributes, MatMulConfig};
pub use broadcast::BroadcastPlan;
pub use descriptor::MatrixDescriptor;
pub use executor::{BatchedMultiply, OperandPlan};
pub use grad::matmul_grad;
pub use resolve::{resolve_operand, OperandRole, ResolvedOperand};

/// Computes `alpha * op(x) · op(y) (+ residual)` into a freshly allocated tensor.
pub fn matmul<P: GemmPrimitive>(
    ctx: &mut ExecutionContext<'_, P>,
    x: &Tensor,
    y: &Tensor,
    residual: Option<&Tensor>,
    config: &MatMulConfig,
) -> KernelResult<Tensor> {
    let mut out = Tensor::zeros(
        x.dtype().matmul_output(config.force_fp32_output),
        Shape::scalar(),
    );
    matmul_into(ctx, x, y, residual, config, &mut out)?;
    Ok(out)
}

/// Forward kernel writing into a caller-owned output tensor.
///
/// `out` is resized to the planned output shape (reallocated when its element count or
/// dtype differ). The residual, when present, must hold as many elements as the output and
/// is read in output order.
pub fn matmul_into<P: GemmPrimitive>(
    ctx: &mut ExecutionContext<'_, P>,
    x: &Tensor,
    y: &Tensor,
    residual: Option<&Tensor>,
    config: &MatMulConfig,
    out: &mut Tensor,
) -> KernelResult<()> {
    let _span = debug_span!(
        "bmm.forward",
        x = ?x.dims(),
        y = ?y.dims(),
        dtype = ?x.dtype()
    )
    .entered();

    config.ensure_single_head()?;
    ensure_same_dtype("x", x, "y", y)?;
    if let Some(residual) = residual {
        ensure_same_dtype("x", x, "residual", residual)?;
    }
    let x = x.contiguous();
    let y = y.contiguous();

    let rx = resolve_operand(x.dims(), &config.fused_x, OperandRole::X, config.trans_x)?;
    let ry = resolve_operand(y.dims(), &config.fused_y, OperandRole::Y, config.trans_y)?;
    let plan = BroadcastPlan::new(
        &rx.dims,
        &ry.dims,
        config.trans_x,
        config.trans_y,
        &config.fused_out,
    )?;

    let mut x_plan = OperandPlan::new(&plan.x_bd_dims, plan.trans_x);
    if let Some(strides) = &rx.strides_override {
        x_plan = x_plan.with_logical_strides(strides)?;
    }
    let mut y_plan = OperandPlan::new(&plan.y_bd_dims, plan.trans_y);
    if let Some(strides) = &ry.strides_override {
        y_plan = y_plan.with_logical_strides(strides)?;
    }

    let out_dtype = x.dtype().matmul_output(config.force_fp32_output);
    let mut exec = BatchedMultiply::new(x_plan, y_plan)?.with_alpha(config.alpha);
    // 8-bit outputs keep the plain product order under a fused output.
    if config.is_output_fused() && !out_dtype.is_integer() {
        exec = exec.with_output_permutation(&config.fused_out.transpose)?;
    }

    let output_shape = Shape::try_new(&plan.output_shape)?;
    if output_shape.num_elements() != exec.out_len() {
        return Err(KernelError::ReshapeMismatch {
            from: exec.out_dims().to_vec(),
            target: plan.output_shape.to_vec(),
            elements: exec.out_len() as i64,
        });
    }
    let residual = match residual {
        Some(residual) if residual.len() != exec.out_len() => {
            return Err(KernelError::shape(format!(
                "residual {:?} does not match output {:?}",
                residual.dims(),
                output_shape
            )));
        }
        Some(residual) => Some(residual.contiguous()),
        None => None,
    };

    out.resize_as(out_dtype, output_shape);
    dispatch(ctx, &exec, &x, &y, residual.as_ref(), out)
}

fn ensure_same_dtype(
    lhs_name: &str,
    lhs: &Tensor,
    rhs_name: &str,
    rhs: &Tensor,
) -> KernelResult<()> {
    if lhs.dtype() != rhs.dtype() {
        return Err(KernelError::argument(format!(
            "matmul {lhs_name} has dtype {:?} but {rhs_name} has dtype {:?}",
            lhs.dtype(),
            rhs.dtype()
        )));
    }
    Ok(())
}

/// Runs `exec` monomorphised on the `(input, output)` element pair of the tensors.
pub(crate) fn dispatch<P: GemmPrimitive>(
    ctx: &mut ExecutionContext<'_, P>,
    exec: &BatchedMultiply,
    x: &Tensor,
    y: &Tensor,
    residual: Option<&Tensor>,
    out: &mut Tensor,
) -> KernelResult<()> {
    match (x.dtype(), out.dtype()) {
        (DType::F32, DType::F32) => run_typed::<P, f32, f32>(ctx, exec, x, y, residual, out),
        (DType::BF16, DType::BF16) => run_typed::<P, bf16, bf16>(ctx, exec, x, y, residual, out),
        (DType::BF16, DType::F32) => run_typed::<P, bf16, f32>(ctx, exec, x, y, residual, out),
        (DType::I8, DType::I8) => run_typed::<P, i8, i8>(ctx, exec, x, y, residual, out),
        (DType::I8, DType::F32) => run_typed::<P, i8, f32>(ctx, exec, x, y, residual, out),
        (DType::U8, DType::I8) => run_typed::<P, u8, i8>(ctx, exec, x, y, residual, out),
        (DType::U8, DType::F32) => run_typed::<P, u8, f32>(ctx, exec, x, y, residual, out),
        (input, output) => Err(KernelError::unimplemented(
            "matmul dtype combination",
            format!("{input:?} inputs cannot produce {output:?} outputs"),
        )),
    }
}

fn run_typed<P, X, O>(
    ctx: &mut ExecutionContext<'_, P>,
    exec: &BatchedMultiply,
    x: &Tensor,
    y: &Tensor,
    residual: Option<&Tensor>,
    out: &mut Tensor,
) -> KernelResult<()>
where
    P: GemmPrimitive,
    X: Element,
    O: Element,
{
    let lhs = x.as_slice::<X>()?;
    let rhs = y.as_slice::<X>()?;
    let residual = residual.map(|r| r.as_slice::<X>()).transpose()?;
    exec.run(ctx, lhs, rhs, residual, out.as_mut_slice::<O>()?)
}
