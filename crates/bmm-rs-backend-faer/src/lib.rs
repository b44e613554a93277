//! GEMM primitive backed by `faer::linalg::matmul`.
//!
//! Packed `f32` operands are viewed in place; every other layout or element type is widened
//! into an `f32` scratch matrix first. Products land in an `f32` scratch buffer and are then
//! narrowed into the strided output.

use bmm_rs::primitive::{GemmCall, GemmPrimitive, StridedMatrix};
use bmm_rs::{Element, PrimitiveResult};
use faer::linalg::matmul::matmul;
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Par};
use tracing::trace;

fn faer_parallelism() -> Par {
    match bmm_rs::env::faer_threads() {
        Some(1) => Par::Seq,
        Some(threads) => Par::rayon(threads),
        None => {
            let par = faer::get_global_parallelism();
            if par.degree() == 1 {
                Par::Seq
            } else {
                par
            }
        }
    }
}

/// Borrows matrix `batch` of an operand as a `rows x cols` faer view.
fn operand_view<'a, X: Element>(
    data: &'a [X],
    layout: &StridedMatrix,
    batch: usize,
    rows: usize,
    cols: usize,
    scratch: &'a mut Vec<f32>,
) -> MatRef<'a, f32> {
    let start = layout.index(batch, 0, 0);
    let len = rows * cols;
    if let Some(values) = X::as_f32_slice(data) {
        if start + len <= values.len() {
            let block = &values[start..start + len];
            if layout.is_row_major(cols) {
                return MatRef::from_row_major_slice(block, rows, cols);
            }
            if layout.is_col_major(rows) {
                return MatRef::from_column_major_slice(block, rows, cols);
            }
        }
    }

    scratch.clear();
    scratch.reserve(len);
    for r in 0..rows {
        for c in 0..cols {
            scratch.push(data[layout.index(batch, r, c)].to_f32());
        }
    }
    MatRef::from_row_major_slice(scratch.as_slice(), rows, cols)
}

/// faer-backed primitive; accepts any batch size in a single call.
#[derive(Debug, Default, Clone, Copy)]
pub struct FaerPrimitive;

impl FaerPrimitive {
    pub fn new() -> Self {
        Self
    }
}

impl GemmPrimitive for FaerPrimitive {
    fn name(&self) -> &str {
        "faer"
    }

    fn gemm<X: Element, O: Element>(&self, call: GemmCall<'_, X, O>) -> PrimitiveResult<()> {
        call.validate()?;
        let GemmCall {
            batch,
            m,
            n,
            k,
            alpha,
            lhs,
            rhs,
            residual,
            out,
            out_layout,
        } = call;
        if batch == 0 || m == 0 || n == 0 {
            return Ok(());
        }
        trace!(batch, m, n, k, "faer gemm");

        let par = faer_parallelism();
        let mut lhs_scratch = Vec::new();
        let mut rhs_scratch = Vec::new();
        let mut product = vec![0.0f32; m * n];

        for b in 0..batch {
            let accum = match &residual {
                Some(residual) => {
                    for i in 0..m {
                        for j in 0..n {
                            product[i * n + j] =
                                residual.data[residual.layout.index(b, i, j)].to_f32();
                        }
                    }
                    Accum::Add
                }
                None => {
                    product.fill(0.0);
                    Accum::Replace
                }
            };

            if k > 0 {
                let lhs_view = operand_view(lhs.data, &lhs.layout, b, m, k, &mut lhs_scratch);
                let rhs_view = operand_view(rhs.data, &rhs.layout, b, k, n, &mut rhs_scratch);
                // C^T = B^T * A^T into a column-major (n x m) buffer, i.e. row-major C.
                let mut out_view = MatMut::from_column_major_slice_mut(product.as_mut_slice(), n, m);
                matmul(
                    &mut out_view,
                    accum,
                    rhs_view.transpose(),
                    lhs_view.transpose(),
                    alpha,
                    par,
                );
            }

            for i in 0..m {
                for j in 0..n {
                    out[out_layout.index(b, i, j)] = O::from_f32(product[i * n + j]);
                }
            }
        }
        Ok(())
    }
}
