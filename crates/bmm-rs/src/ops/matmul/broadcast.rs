//! Joint broadcast planning for the forward kernel.

use tracing::debug;

use super::attrs::FusedAttributes;
use crate::error::{KernelError, KernelResult};
use crate::shape_helpers;
use crate::tensor::Dims;

/// Padded operand shapes and the resulting output shape of a forward matmul.
///
/// Both padded shapes share rank `max(rank(x), rank(y), 3)`; the leading axes are batch
/// axes and the trailing two hold the stored (untransposed) matrix extents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPlan {
    pub x_bd_dims: Dims,
    pub y_bd_dims: Dims,
    /// Broadcast batch extents followed by `[M, N]`, at the padded rank.
    pub out_dims: Dims,
    /// Shape published on the output tensor.
    pub output_shape: Dims,
    /// Transpose flags as applied; always `false` for rank-1 operands.
    pub trans_x: bool,
    pub trans_y: bool,
}

impl BroadcastPlan {
    pub fn new(
        x_dims: &[i64],
        y_dims: &[i64],
        trans_x: bool,
        trans_y: bool,
        fused_out: &FusedAttributes,
    ) -> KernelResult<Self> {
        if x_dims.is_empty() || y_dims.is_empty() {
            return Err(KernelError::shape(format!(
                "matmul operands must have rank >= 1, got x {x_dims:?} and y {y_dims:?}"
            )));
        }

        let ndims = x_dims.len().max(y_dims.len()).max(3);
        let trans_x = trans_x && x_dims.len() >= 2;
        let trans_y = trans_y && y_dims.len() >= 2;

        let mut x_bd_dims: Dims = smallvec::smallvec![1; ndims];
        if x_dims.len() == 1 {
            x_bd_dims[ndims - 1] = x_dims[0];
        } else {
            x_bd_dims[ndims - x_dims.len()..].copy_from_slice(x_dims);
        }
        let mut y_bd_dims: Dims = smallvec::smallvec![1; ndims];
        if y_dims.len() == 1 {
            y_bd_dims[ndims - 2] = y_dims[0];
        } else {
            y_bd_dims[ndims - y_dims.len()..].copy_from_slice(y_dims);
        }

        let output_fused = fused_out.is_enabled();
        let batch_axes = ndims - 2;
        if !output_fused && x_dims.len() > 2 && y_dims.len() > 2 {
            for axis in 0..batch_axes {
                let (xe, ye) = (x_bd_dims[axis], y_bd_dims[axis]);
                if xe != ye && xe != 1 && ye != 1 {
                    return Err(KernelError::BroadcastMismatch {
                        axis,
                        x_extent: xe,
                        y_extent: ye,
                    });
                }
            }
        }

        let (m, x_k) = if trans_x {
            (x_bd_dims[ndims - 1], x_bd_dims[ndims - 2])
        } else {
            (x_bd_dims[ndims - 2], x_bd_dims[ndims - 1])
        };
        let (y_k, n) = if trans_y {
            (y_bd_dims[ndims - 1], y_bd_dims[ndims - 2])
        } else {
            (y_bd_dims[ndims - 2], y_bd_dims[ndims - 1])
        };
        if x_k != y_k {
            return Err(KernelError::ContractionMismatch { x_k, y_k });
        }

        let mut out_dims: Dims = (0..batch_axes)
            .map(|axis| match (x_bd_dims[axis], y_bd_dims[axis]) {
                (1, ye) => ye,
                (xe, _) => xe,
            })
            .collect();
        out_dims.push(m);
        out_dims.push(n);

        let output_shape = if output_fused {
            let permuted = shape_helpers::permute(&out_dims, &fused_out.transpose)?;
            shape_helpers::reshape_dims(&permuted, &fused_out.reshape)?
        } else {
            let mut shape = Dims::new();
            if x_dims.len() > 2 || y_dims.len() > 2 {
                shape.extend_from_slice(&out_dims[..batch_axes]);
            }
            if x_dims.len() >= 2 {
                shape.push(m);
            }
            if y_dims.len() >= 2 {
                shape.push(n);
            }
            if shape.is_empty() {
                shape.push(1);
            }
            shape
        };

        debug!(
            x = ?x_bd_dims.as_slice(),
            y = ?y_bd_dims.as_slice(),
            out = ?out_dims.as_slice(),
            output_shape = ?output_shape.as_slice(),
            trans_x,
            trans_y,
            output_fused,
            "matmul broadcast plan"
        );

        Ok(BroadcastPlan {
            x_bd_dims,
            y_bd_dims,
            out_dims,
            output_shape,
            trans_x,
            trans_y,
        })
    }
}
