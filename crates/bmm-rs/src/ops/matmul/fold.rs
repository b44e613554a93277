//! Rank-3 to rank-2 folds used when a gradient sums over a broadcast batch.

use tracing::debug;

use crate::error::KernelResult;
use crate::tensor::{Shape, Tensor};

/// `[P, M, N] -> [P*M, N]` without moving data; other ranks pass through.
pub fn fold_outer_dims(input: &Tensor) -> KernelResult<Tensor> {
    match input.dims() {
        &[p, m, n] => {
            debug!(from = ?input.dims(), "fold outer dims");
            input.reshaped(Shape::try_new([p * m, n])?)
        }
        _ => Ok(input.clone()),
    }
}

/// `[P, M, N] -> [M, P*N]`: reorders to `[M, P, N]` and then merges the trailing axes.
/// Other ranks pass through.
pub fn fold_first_and_last_dims(input: &Tensor) -> KernelResult<Tensor> {
    match input.dims() {
        &[p, m, n] => {
            debug!(from = ?input.dims(), "fold first and last dims (copy)");
            input
                .permuted(&[1, 0, 2])?
                .reshaped(Shape::try_new([m, p * n])?)
        }
        _ => Ok(input.clone()),
    }
}
