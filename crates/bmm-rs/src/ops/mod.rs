//! Operators built on top of the host tensor and GEMM primitive abstractions.
//!
//! Every operator plans its work from shapes and attributes first, then drives an
//! [`ExecutionContext`](crate::context::ExecutionContext) to issue primitive calls.
pub mod matmul;
