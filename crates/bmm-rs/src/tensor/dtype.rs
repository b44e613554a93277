//! Enumerates the scalar element types accepted by the matmul kernel.

/// Logical dtype identifier carried by every [`Tensor`](super::Tensor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 16-bit bfloat16 precision.
    BF16,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::BF16 => 2,
            DType::I8 | DType::U8 => 1,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::I8 | DType::U8)
    }

    /// Output element type produced for inputs of this dtype.
    ///
    /// Integer inputs produce signed `I8` outputs; `force_fp32_output` widens every input
    /// type to `F32`.
    pub fn matmul_output(self, force_fp32_output: bool) -> DType {
        match self {
            _ if force_fp32_output => DType::F32,
            DType::U8 => DType::I8,
            other => other,
        }
    }
}
