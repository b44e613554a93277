//! Naive strided GEMM used as the semantic reference for every other primitive.

use bmm_rs::primitive::{GemmCall, GemmPrimitive};
use bmm_rs::{Element, PrimitiveResult};
use tracing::trace;

/// Triple-loop primitive reading every operand through its strides.
///
/// Accumulates each dot product in `f32` in increasing `k` order, then applies `alpha`,
/// adds the residual and narrows to the output type.
#[derive(Debug, Clone, Copy)]
pub struct ReferencePrimitive {
    max_native_batch: usize,
}

impl Default for ReferencePrimitive {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferencePrimitive {
    pub fn new() -> Self {
        ReferencePrimitive {
            max_native_batch: usize::MAX,
        }
    }

    /// Limits how many matrices a single call may carry.
    pub fn with_max_native_batch(mut self, max_native_batch: usize) -> Self {
        self.max_native_batch = max_native_batch.max(1);
        self
    }
}

impl GemmPrimitive for ReferencePrimitive {
    fn name(&self) -> &str {
        "ref-cpu"
    }

    fn max_native_batch(&self) -> usize {
        self.max_native_batch
    }

    fn gemm<X: Element, O: Element>(&self, call: GemmCall<'_, X, O>) -> PrimitiveResult<()> {
        call.validate()?;
        trace!(
            batch = call.batch,
            m = call.m,
            n = call.n,
            k = call.k,
            "ref-cpu gemm"
        );

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

        for b in 0..batch {
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0.0f32;
                    for l in 0..k {
                        let a = lhs.data[lhs.layout.index(b, i, l)].to_f32();
                        let w = rhs.data[rhs.layout.index(b, l, j)].to_f32();
                        acc += a * w;
                    }
                    let mut value = alpha * acc;
                    if let Some(residual) = &residual {
                        value += residual.data[residual.layout.index(b, i, j)].to_f32();
                    }
                    out[out_layout.index(b, i, j)] = O::from_f32(value);
                }
            }
        }
        Ok(())
    }
}
