//! Shared shape/stride helpers used by the matmul planner and the primitives.

use std::collections::BTreeSet;

use crate::error::{KernelError, KernelResult};
use crate::tensor::shape::Dims;

/// Computes `product(dims)` with overflow checking.
pub fn checked_element_count_or_error<E, F>(dims: &[i64], mut on_overflow: F) -> Result<usize, E>
where
    F: FnMut() -> E,
{
    let mut count = 1usize;
    for dim in dims {
        let dim = usize::try_from(*dim).map_err(|_| on_overflow())?;
        count = count.checked_mul(dim).ok_or_else(&mut on_overflow)?;
    }
    Ok(count)
}

/// Builds row-major contiguous strides.
pub fn contiguous_strides(dims: &[i64]) -> Dims {
    let mut strides: Dims = smallvec::smallvec![0; dims.len()];
    let mut stride = 1i64;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride *= dims[axis];
    }
    strides
}

/// Strides that make `permute(dims, axis)` a row-major layout while addressing the
/// un-permuted logical axes.
pub fn permuted_contiguous_strides(dims: &[i64], axis: &[i64]) -> KernelResult<Dims> {
    validate_permutation(dims.len(), axis)?;
    let mut strides: Dims = smallvec::smallvec![0; dims.len()];
    let mut total = 1i64;
    for &logical in axis.iter().rev() {
        let logical = logical as usize;
        strides[logical] = total;
        total *= dims[logical];
    }
    Ok(strides)
}

/// Checks that `axis` is a bijection on `0..rank`.
pub fn validate_permutation(rank: usize, axis: &[i64]) -> KernelResult<()> {
    let unique: BTreeSet<i64> = axis.iter().copied().collect();
    if unique.len() != axis.len() {
        return Err(KernelError::DuplicateAxis {
            axis: axis.to_vec(),
        });
    }
    if axis.len() != rank {
        return Err(KernelError::PermutationRank {
            rank,
            axis_len: axis.len(),
        });
    }
    if let Some(&bad) = axis.iter().find(|&&a| a < 0 || a as usize >= rank) {
        return Err(KernelError::AxisOutOfRange { value: bad, rank });
    }
    Ok(())
}

/// Returns `values` reordered so that entry `i` is `values[axis[i]]`.
pub fn permute(values: &[i64], axis: &[i64]) -> KernelResult<Dims> {
    validate_permutation(values.len(), axis)?;
    Ok(axis.iter().map(|&a| values[a as usize]).collect())
}

/// Resolves a reshape target against `dims`.
///
/// A `0` entry copies the source extent at the same index, a single `-1` is inferred from
/// the remaining element count. The resolved element count must match the source.
pub fn reshape_dims(dims: &[i64], target: &[i64]) -> KernelResult<Dims> {
    let elements: i64 = dims.iter().product();
    let mismatch = || KernelError::ReshapeMismatch {
        from: dims.to_vec(),
        target: target.to_vec(),
        elements,
    };

    let mut resolved = Dims::with_capacity(target.len());
    let mut inferred: Option<usize> = None;
    for (index, &extent) in target.iter().enumerate() {
        match extent {
            0 => {
                let copied = dims.get(index).copied().ok_or_else(mismatch)?;
                resolved.push(copied);
            }
            -1 => {
                if inferred.replace(index).is_some() {
                    return Err(KernelError::shape(format!(
                        "only one dimension can be inferred in reshape target {target:?}"
                    )));
                }
                resolved.push(1);
            }
            e if e > 0 => resolved.push(e),
            e => {
                return Err(KernelError::shape(format!(
                    "invalid extent {e} in reshape target {target:?}"
                )))
            }
        }
    }

    let known: i64 = resolved.iter().product();
    if let Some(index) = inferred {
        if known == 0 || elements % known != 0 {
            return Err(mismatch());
        }
        resolved[index] = elements / known;
    } else if known != elements {
        return Err(mismatch());
    }
    if resolved.len() > crate::tensor::shape::MAX_RANK {
        return Err(KernelError::RankOverflow {
            rank: resolved.len(),
            max: crate::tensor::shape::MAX_RANK,
        });
    }
    Ok(resolved)
}

/// Largest element offset a strided view can touch, or `None` when the view is empty.
pub fn max_offset(dims: &[i64], strides: &[i64]) -> Option<usize> {
    if dims.iter().any(|&d| d == 0) {
        return None;
    }
    let span = dims
        .iter()
        .zip(strides.iter())
        .map(|(&d, &s)| (d - 1) * s)
        .sum::<i64>();
    Some(span as usize)
}
