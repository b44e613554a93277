//! Batched matrix multiplication with broadcasting, operand transposition and fused
//! reshape/transpose metadata, executed through a pluggable GEMM primitive.

pub mod context;
pub mod env;
pub mod error;
pub mod ops;
pub mod primitive;
pub mod shape_helpers;
pub mod tensor;

pub use context::{ExecutionContext, Stream};
pub use error::{ErrorKind, KernelError, KernelResult, PrimitiveError, PrimitiveResult};
pub use ops::matmul::{matmul, matmul_grad, matmul_into, AttrValue, AttributeMap, MatMulConfig};
pub use primitive::{GemmCall, GemmOperand, GemmPrimitive, StridedMatrix};
pub use tensor::{DType, Element, Shape, Tensor};
