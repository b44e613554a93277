use bmm_rs::error::KernelError;
use bmm_rs::ops::matmul::resolve::{effective_dims, input_strides};
use bmm_rs::ops::matmul::{resolve_operand, FusedAttributes, OperandRole};

#[test]
fn rank_two_reshape_gains_a_batch_stride() {
    let fused = FusedAttributes::new([2, 6], [1, 0]);
    let resolved = resolve_operand(&[12], &fused, OperandRole::X, false).expect("resolve");

    assert_eq!(resolved.dims.as_slice(), &[6, 2]);
    assert_eq!(
        resolved.strides_override.as_deref(),
        Some(&[12i64, 1, 6][..])
    );
}

#[test]
fn transposed_operand_swaps_trailing_strides() {
    let fused = FusedAttributes::new([2, 6], [1, 0]);
    let strides = input_strides(&[12], &fused, OperandRole::Y, true)
        .expect("strides")
        .expect("fusion enabled");
    assert_eq!(strides.as_slice(), &[12, 6, 1]);
}

#[test]
fn higher_rank_reshape_keeps_permuted_strides() {
    let fused = FusedAttributes::new([2, 3, 4], [0, 2, 1]);
    let resolved = resolve_operand(&[2, 12], &fused, OperandRole::X, false).expect("resolve");

    assert_eq!(resolved.dims.as_slice(), &[2, 4, 3]);
    assert_eq!(
        resolved.strides_override.as_deref(),
        Some(&[12i64, 1, 4][..])
    );
}

#[test]
fn resolution_is_idempotent() {
    let fused = FusedAttributes::new([0, 3, -1], [1, 0, 2]);
    let first = resolve_operand(&[2, 12], &fused, OperandRole::Y, false).expect("resolve");
    let second = resolve_operand(&[2, 12], &fused, OperandRole::Y, false).expect("resolve");
    assert_eq!(first, second);
    assert_eq!(first.dims.as_slice(), &[3, 2, 4]);
}

#[test]
fn fusion_needs_both_lists() {
    for fused in [
        FusedAttributes::default(),
        FusedAttributes::new([2, 6], Vec::<i64>::new()),
        FusedAttributes::new(Vec::<i64>::new(), [1, 0]),
    ] {
        assert!(!fused.is_enabled());
        let resolved = resolve_operand(&[3, 4], &fused, OperandRole::X, true).expect("resolve");
        assert_eq!(resolved.dims.as_slice(), &[3, 4]);
        assert!(resolved.strides_override.is_none());
    }
}

#[test]
fn invalid_fused_transposes_are_rejected() {
    let err = effective_dims(&[12], &FusedAttributes::new([2, 6], [0, 0])).expect_err("dup");
    assert!(matches!(err, KernelError::DuplicateAxis { .. }), "{err}");

    let err = effective_dims(&[12], &FusedAttributes::new([2, 6], [0])).expect_err("short");
    assert!(
        matches!(err, KernelError::PermutationRank { rank: 2, axis_len: 1 }),
        "{err}"
    );

    let err = effective_dims(&[12], &FusedAttributes::new([2, 6], [0, 2])).expect_err("range");
    assert!(matches!(err, KernelError::AxisOutOfRange { value: 2, .. }), "{err}");
}

#[test]
fn invalid_fused_reshape_is_rejected() {
    let err = effective_dims(&[12], &FusedAttributes::new([5, -1], [1, 0])).expect_err("reshape");
    assert!(matches!(err, KernelError::ReshapeMismatch { .. }), "{err}");
}
