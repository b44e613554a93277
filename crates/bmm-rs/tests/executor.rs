use anyhow::Result;
use bmm_rs::error::KernelError;
use bmm_rs::ops::matmul::{BatchedMultiply, MatrixDescriptor, OperandPlan};
use bmm_rs::ExecutionContext;
use bmm_rs_backend_ref_cpu::ReferencePrimitive;

#[test]
fn logical_strides_are_stored_unswapped() -> Result<()> {
    let plan = OperandPlan::new(&[1, 6, 2], true).with_logical_strides(&[12, 1, 6])?;
    assert_eq!(plan.dims(), &[1, 6, 2]);
    assert_eq!(plan.strides(), &[12, 6, 1]);
    assert!(plan.transposed());

    let padded = OperandPlan::new(&[1, 6, 2], false).with_logical_strides(&[1, 6])?;
    assert_eq!(padded.strides(), &[0, 1, 6]);

    let err = OperandPlan::new(&[6, 2], false)
        .with_logical_strides(&[12, 1, 6])
        .expect_err("override longer than rank");
    assert!(matches!(err, KernelError::InvalidShape(_)), "{err}");
    Ok(())
}

#[test]
fn descriptor_plans_use_matrix_sequences() -> Result<()> {
    let desc = MatrixDescriptor::new(&[2, 3, 4, 5], true)?;
    let plan = OperandPlan::from_descriptor(&desc);
    assert_eq!(plan.dims(), &[6, 4, 5]);
    assert_eq!(plan.strides(), &[20, 5, 1]);
    assert!(plan.transposed());
    Ok(())
}

#[test]
fn broadcast_batch_shapes_the_output() -> Result<()> {
    let exec = BatchedMultiply::new(
        OperandPlan::new(&[2, 1, 3, 4], false),
        OperandPlan::new(&[3, 5, 4], true),
    )?;
    assert_eq!(exec.out_dims(), &[2, 3, 3, 5]);
    assert_eq!(exec.out_strides(), &[45, 15, 5, 1]);
    assert_eq!(exec.batch_count(), 6);
    assert_eq!(exec.out_len(), 90);

    let permuted = exec.with_output_permutation(&[0, 2, 1, 3])?;
    assert_eq!(permuted.out_strides(), &[45, 5, 15, 1]);
    Ok(())
}

#[test]
fn empty_batch_wins_over_unit_batch() -> Result<()> {
    let exec = BatchedMultiply::new(
        OperandPlan::new(&[1, 3, 4], false),
        OperandPlan::new(&[0, 4, 5], false),
    )?;
    assert_eq!(exec.out_dims(), &[0, 3, 5]);
    assert_eq!(exec.batch_count(), 0);
    assert_eq!(exec.out_len(), 0);

    let primitive = ReferencePrimitive::new();
    let mut ctx = ExecutionContext::new(&primitive);
    let x = vec![1.0f32; 12];
    let y: Vec<f32> = Vec::new();
    let mut out: Vec<f32> = Vec::new();
    exec.run(&mut ctx, &x, &y, None, &mut out)?;
    assert_eq!(ctx.stream().submitted(), 0);
    Ok(())
}

#[test]
fn mismatched_plans_are_rejected() {
    let err = BatchedMultiply::new(
        OperandPlan::new(&[2, 3, 4], false),
        OperandPlan::new(&[3, 4, 5], false),
    )
    .expect_err("batch mismatch");
    assert!(matches!(err, KernelError::BroadcastMismatch { .. }), "{err}");

    let err = BatchedMultiply::new(OperandPlan::new(&[3, 4], true), OperandPlan::new(&[4, 5], false))
        .expect_err("contraction mismatch");
    assert!(matches!(err, KernelError::ContractionMismatch { x_k: 3, y_k: 4 }), "{err}");

    assert!(BatchedMultiply::new(OperandPlan::new(&[4], false), OperandPlan::new(&[4, 5], false))
        .is_err());
}

#[test]
fn short_buffers_are_rejected_before_any_call() -> Result<()> {
    let exec = BatchedMultiply::new(
        OperandPlan::new(&[2, 2, 3], false),
        OperandPlan::new(&[3, 2], false),
    )?;
    let primitive = ReferencePrimitive::new();
    let mut ctx = ExecutionContext::new(&primitive);
    let x = vec![1.0f32; 11];
    let y = vec![1.0f32; 6];
    let mut out = vec![0.0f32; 8];

    let err = exec
        .run(&mut ctx, &x, &y, None, &mut out)
        .expect_err("x is one element short");
    assert!(matches!(err, KernelError::InvalidShape(_)), "{err}");
    assert_eq!(ctx.stream().submitted(), 0);

    let x = vec![1.0f32; 12];
    exec.run(&mut ctx, &x, &y, None, &mut out)?;
    assert_eq!(out, vec![3.0f32; 8]);
    Ok(())
}
