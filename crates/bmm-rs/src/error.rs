//! Error types surfaced by the matmul kernel and its GEMM primitives.

use thiserror::Error;

/// Coarse classification of kernel failures, used by callers that only need to branch on
/// the category (e.g. to map onto a host framework's status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidShape,
    InvalidArgument,
    Unimplemented,
    PrimitiveFailure,
}

/// Failure reported by a [`GemmPrimitive`](crate::primitive::GemmPrimitive) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PrimitiveError {
    message: String,
}

impl PrimitiveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Convenience alias for primitive routines.
pub type PrimitiveResult<T> = Result<T, PrimitiveError>;

/// Errors raised while planning or executing a matmul invocation.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(
        "tensor dimensions are incorrect for broadcasting: dimensions in X and Y must be same \
         or equal to 1, but received x_dims[{axis}]={x_extent} and y_dims[{axis}]={y_extent}"
    )]
    BroadcastMismatch {
        axis: usize,
        x_extent: i64,
        y_extent: i64,
    },

    #[error("matmul contraction mismatch: x provides K={x_k} but y expects K={y_k}")]
    ContractionMismatch { x_k: i64, y_k: i64 },

    #[error("cannot reshape {from:?} ({elements} elements) into {target:?}")]
    ReshapeMismatch {
        from: Vec<i64>,
        target: Vec<i64>,
        elements: i64,
    },

    #[error("in an axis array, elements must be unique: {axis:?}")]
    DuplicateAxis { axis: Vec<i64> },

    #[error("axis values must be ranging from 0 to (dims - 1): got {value} for rank {rank}")]
    AxisOutOfRange { value: i64, rank: usize },

    #[error(
        "the input dimension's size should be equal to the axis's size, but received dimension \
         is {rank} and axis's size is {axis_len}"
    )]
    PermutationRank { rank: usize, axis_len: usize },

    #[error("rank {rank} exceeds the supported maximum of {max}")]
    RankOverflow { rank: usize, max: usize },

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{feature} is not implemented: {reason}")]
    Unimplemented {
        feature: &'static str,
        reason: String,
    },

    #[error("primitive `{primitive}` failed at batch {batch_index}: {source}")]
    PrimitiveFailure {
        primitive: String,
        batch_index: usize,
        #[source]
        source: PrimitiveError,
    },
}

impl KernelError {
    pub fn shape(message: impl Into<String>) -> Self {
        KernelError::InvalidShape(message.into())
    }

    pub fn argument(message: impl Into<String>) -> Self {
        KernelError::InvalidArgument(message.into())
    }

    pub fn unimplemented(feature: &'static str, reason: impl Into<String>) -> Self {
        KernelError::Unimplemented {
            feature,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::BroadcastMismatch { .. }
            | KernelError::ContractionMismatch { .. }
            | KernelError::ReshapeMismatch { .. }
            | KernelError::DuplicateAxis { .. }
            | KernelError::AxisOutOfRange { .. }
            | KernelError::PermutationRank { .. }
            | KernelError::RankOverflow { .. }
            | KernelError::InvalidShape(_) => ErrorKind::InvalidShape,
            KernelError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            KernelError::Unimplemented { .. } => ErrorKind::Unimplemented,
            KernelError::PrimitiveFailure { .. } => ErrorKind::PrimitiveFailure,
        }
    }
}

/// Convenience alias for results returned by kernel routines.
pub type KernelResult<T> = Result<T, KernelError>;
