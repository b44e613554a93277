//! Resolves each operand's effective shape and layout from fused reshape/transpose metadata.

use super::attrs::FusedAttributes;
use super::descriptor::{column_matrix_dims, row_matrix_dims, MatrixDescriptor};
use crate::error::KernelResult;
use crate::shape_helpers;
use crate::tensor::Dims;

/// Which side of the product an operand sits on; decides how rank-1 operands are lifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRole {
    /// Left operand, lifted to a row vector.
    X,
    /// Right operand, lifted to a column vector.
    Y,
}

impl OperandRole {
    fn matrix_dims(self, dims: &[i64]) -> Dims {
        match self {
            OperandRole::X => row_matrix_dims(dims),
            OperandRole::Y => column_matrix_dims(dims),
        }
    }
}

/// Effective shape of an operand plus the strides that address it in the raw buffer when a
/// fused reshape is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOperand {
    pub dims: Dims,
    pub strides_override: Option<Dims>,
}

/// Raw shape reshaped and then transposed by `fused`, or `raw` unchanged without fusion.
pub fn effective_dims(raw: &[i64], fused: &FusedAttributes) -> KernelResult<Dims> {
    if !fused.is_enabled() {
        return Ok(Dims::from_slice(raw));
    }
    let reshaped = shape_helpers::reshape_dims(raw, &fused.reshape)?;
    shape_helpers::permute(&reshaped, &fused.transpose)
}

/// Strides addressing the effective (reshaped, transposed) operand inside its raw
/// row-major buffer, with a leading batch stride when the reshape is rank 2.
///
/// The trailing two entries are swapped when the operand enters the product transposed, so
/// the result is expressed in product (logical) order. `None` without fusion.
pub fn input_strides(
    raw: &[i64],
    fused: &FusedAttributes,
    role: OperandRole,
    trans: bool,
) -> KernelResult<Option<Dims>> {
    if !fused.is_enabled() {
        return Ok(None);
    }
    let effective = effective_dims(raw, fused)?;
    let reshaped = shape_helpers::reshape_dims(raw, &fused.reshape)?;
    let mut strides =
        shape_helpers::permute(&shape_helpers::contiguous_strides(&reshaped), &fused.transpose)?;
    if reshaped.len() == 2 {
        strides.insert(0, reshaped[0] * reshaped[1]);
    }

    let descriptor = MatrixDescriptor::new(&role.matrix_dims(&effective), trans)?;
    if descriptor.transposed() && effective.len() >= 2 {
        let len = strides.len();
        strides.swap(len - 1, len - 2);
    }
    Ok(Some(strides))
}

/// Bundles [`effective_dims`] and [`input_strides`].
pub fn resolve_operand(
    raw: &[i64],
    fused: &FusedAttributes,
    role: OperandRole,
    trans: bool,
) -> KernelResult<ResolvedOperand> {
    Ok(ResolvedOperand {
        dims: effective_dims(raw, fused)?,
        strides_override: input_strides(raw, fused, role, trans)?,
    })
}
