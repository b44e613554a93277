//! Normalized operator attributes for the matmul kernels.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{KernelError, KernelResult};

/// Untyped attribute value as delivered by a host framework (or parsed from JSON).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
}

/// Operator attributes keyed by their framework names.
pub type AttributeMap = BTreeMap<String, AttrValue>;

/// Reshape-then-transpose metadata attached to an operand or to the output.
///
/// Fusion is only in effect when both lists are non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusedAttributes {
    pub reshape: Vec<i64>,
    pub transpose: Vec<i64>,
}

impl FusedAttributes {
    pub fn new(reshape: impl Into<Vec<i64>>, transpose: impl Into<Vec<i64>>) -> Self {
        FusedAttributes {
            reshape: reshape.into(),
            transpose: transpose.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.reshape.is_empty() && !self.transpose.is_empty()
    }
}

/// Configuration shared by the forward and gradient kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct MatMulConfig {
    pub trans_x: bool,
    pub trans_y: bool,
    pub fused_x: FusedAttributes,
    pub fused_y: FusedAttributes,
    pub fused_out: FusedAttributes,
    /// Scale applied to the product before the residual is added.
    pub alpha: f32,
    pub force_fp32_output: bool,
    pub head_number: Option<i64>,
}

impl Default for MatMulConfig {
    fn default() -> Self {
        MatMulConfig {
            trans_x: false,
            trans_y: false,
            fused_x: FusedAttributes::default(),
            fused_y: FusedAttributes::default(),
            fused_out: FusedAttributes::default(),
            alpha: 1.0,
            force_fp32_output: false,
            head_number: None,
        }
    }
}

impl MatMulConfig {
    /// Normalizes a framework attribute map.
    ///
    /// `trans_x`/`trans_y` win over the legacy `transpose_X`/`transpose_Y` spellings when
    /// both are present. Unknown keys are ignored.
    pub fn from_attributes(attrs: &AttributeMap) -> KernelResult<Self> {
        let trans_x = match bool_attr(attrs, "trans_x")? {
            Some(value) => value,
            None => bool_attr(attrs, "transpose_X")?.unwrap_or(false),
        };
        let trans_y = match bool_attr(attrs, "trans_y")? {
            Some(value) => value,
            None => bool_attr(attrs, "transpose_Y")?.unwrap_or(false),
        };

        Ok(MatMulConfig {
            trans_x,
            trans_y,
            fused_x: fused_attr(attrs, "X")?,
            fused_y: fused_attr(attrs, "Y")?,
            fused_out: fused_attr(attrs, "Out")?,
            alpha: float_attr(attrs, "alpha")?.unwrap_or(1.0),
            force_fp32_output: bool_attr(attrs, "force_fp32_output")?.unwrap_or(false),
            head_number: int_attr(attrs, "head_number")?,
        })
    }

    pub fn with_transpose(mut self, trans_x: bool, trans_y: bool) -> Self {
        self.trans_x = trans_x;
        self.trans_y = trans_y;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_force_fp32_output(mut self, force: bool) -> Self {
        self.force_fp32_output = force;
        self
    }

    pub fn with_fused_x(mut self, fused: FusedAttributes) -> Self {
        self.fused_x = fused;
        self
    }

    pub fn with_fused_y(mut self, fused: FusedAttributes) -> Self {
        self.fused_y = fused;
        self
    }

    pub fn with_fused_out(mut self, fused: FusedAttributes) -> Self {
        self.fused_out = fused;
        self
    }

    pub fn with_head_number(mut self, head_number: i64) -> Self {
        self.head_number = Some(head_number);
        self
    }

    pub fn is_output_fused(&self) -> bool {
        self.fused_out.is_enabled()
    }

    pub fn is_input_fused(&self) -> bool {
        self.fused_x.is_enabled() || self.fused_y.is_enabled()
    }

    /// Rejects multi-head configurations.
    pub fn ensure_single_head(&self) -> KernelResult<()> {
        match self.head_number {
            Some(heads) if heads != 1 => Err(KernelError::unimplemented(
                "multi-head matmul",
                format!("expected head_number=1, but received head_number={heads}"),
            )),
            _ => Ok(()),
        }
    }
}

fn type_error(name: &str, expected: &str, value: &AttrValue) -> KernelError {
    KernelError::argument(format!(
        "attribute `{name}` must be {expected}, got {value:?}"
    ))
}

fn bool_attr(attrs: &AttributeMap, name: &str) -> KernelResult<Option<bool>> {
    match attrs.get(name) {
        None => Ok(None),
        Some(AttrValue::Bool(value)) => Ok(Some(*value)),
        Some(other) => Err(type_error(name, "a bool", other)),
    }
}

fn int_attr(attrs: &AttributeMap, name: &str) -> KernelResult<Option<i64>> {
    match attrs.get(name) {
        None => Ok(None),
        Some(AttrValue::Int(value)) => Ok(Some(*value)),
        Some(other) => Err(type_error(name, "an int", other)),
    }
}

fn float_attr(attrs: &AttributeMap, name: &str) -> KernelResult<Option<f32>> {
    match attrs.get(name) {
        None => Ok(None),
        Some(AttrValue::Float(value)) => Ok(Some(*value as f32)),
        Some(AttrValue::Int(value)) => Ok(Some(*value as f32)),
        Some(other) => Err(type_error(name, "a float", other)),
    }
}

fn ints_attr(attrs: &AttributeMap, name: &str) -> KernelResult<Vec<i64>> {
    match attrs.get(name) {
        None => Ok(Vec::new()),
        Some(AttrValue::Ints(values)) => Ok(values.clone()),
        Some(other) => Err(type_error(name, "an int list", other)),
    }
}

fn fused_attr(attrs: &AttributeMap, operand: &str) -> KernelResult<FusedAttributes> {
    Ok(FusedAttributes {
        reshape: ints_attr(attrs, &format!("fused_reshape_{operand}"))?,
        transpose: ints_attr(attrs, &format!("fused_transpose_{operand}"))?,
    })
}
