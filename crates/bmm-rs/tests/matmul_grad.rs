use anyhow::Result;
use bmm_rs::ops::matmul::FusedAttributes;
use bmm_rs::{matmul_grad, DType, ErrorKind, ExecutionContext, MatMulConfig, Shape, Tensor};
use bmm_rs_backend_ref_cpu::ReferencePrimitive;
use bmm_rs_backend_tests::oracle::{self, Dense};
use bmm_rs_backend_tests::recording_primitive::RecordingPrimitive;
use half::bf16;
use rand::rngs::StdRng;
use rand::SeedableRng;

const EPS: f32 = 0.25;
const TOL: f32 = 2e-3;

fn random(dims: &[i64], rng: &mut StdRng) -> Tensor {
    Tensor::randn(Shape::new(dims), 1.0, rng)
}

/// `sum(dout * (x · y))`, whose gradients are exactly what the kernel computes.
fn loss(x: &Dense, y: &Dense, dout: &Dense, trans_x: bool, trans_y: bool) -> f32 {
    oracle::matmul(x, y, trans_x, trans_y)
        .values
        .iter()
        .zip(&dout.values)
        .map(|(o, d)| o * d)
        .sum()
}

fn finite_difference(
    wrt: &Dense,
    eval: impl Fn(&Dense) -> f32,
) -> Vec<f32> {
    (0..wrt.values.len())
        .map(|i| {
            let mut plus = wrt.clone();
            plus.values[i] += EPS;
            let mut minus = wrt.clone();
            minus.values[i] -= EPS;
            (eval(&plus) - eval(&minus)) / (2.0 * EPS)
        })
        .collect()
}

fn check_gradients(x_dims: &[i64], y_dims: &[i64], trans_x: bool, trans_y: bool, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = random(x_dims, &mut rng);
    let y = random(y_dims, &mut rng);
    let (xd, yd) = (Dense::from_tensor(&x), Dense::from_tensor(&y));
    let out_dims = oracle::matmul(&xd, &yd, trans_x, trans_y).dims;
    let dout = random(&out_dims, &mut rng);
    let dd = Dense::from_tensor(&dout);

    let primitive = ReferencePrimitive::new();
    let mut ctx = ExecutionContext::new(&primitive);
    let mut dx = Tensor::zeros(DType::F32, Shape::scalar());
    let mut dy = Tensor::zeros(DType::F32, Shape::scalar());
    matmul_grad(
        &mut ctx,
        &x,
        &y,
        &dout,
        &MatMulConfig::default().with_transpose(trans_x, trans_y),
        Some(&mut dx),
        Some(&mut dy),
    )
    .unwrap_or_else(|err| {
        panic!("matmul_grad x {x_dims:?} y {y_dims:?} tx={trans_x} ty={trans_y}: {err}")
    });

    assert_eq!(dx.dims(), x_dims);
    assert_eq!(dy.dims(), y_dims);
    let expected_dx = finite_difference(&xd, |x| loss(x, &yd, &dd, trans_x, trans_y));
    let expected_dy = finite_difference(&yd, |y| loss(&xd, y, &dd, trans_x, trans_y));
    oracle::assert_close(dx.data(), &expected_dx, TOL);
    oracle::assert_close(dy.data(), &expected_dy, TOL);
}

#[test]
fn batched_gradients_for_every_transpose_combination() {
    check_gradients(&[2, 3, 4], &[2, 4, 5], false, false, 31);
    check_gradients(&[2, 3, 4], &[2, 5, 4], false, true, 32);
    check_gradients(&[2, 4, 3], &[2, 4, 5], true, false, 33);
    check_gradients(&[2, 4, 3], &[2, 5, 4], true, true, 34);
}

#[test]
fn plain_matrix_gradients() {
    check_gradients(&[3, 4], &[4, 5], false, false, 35);
    check_gradients(&[4, 3], &[5, 4], true, true, 36);
}

#[test]
fn broadcast_rhs_gradient_sums_over_batch() {
    check_gradients(&[2, 3, 4], &[4, 5], false, false, 37);
    check_gradients(&[2, 3, 4], &[5, 4], false, true, 38);
    check_gradients(&[2, 4, 3], &[4, 5], true, false, 39);
    check_gradients(&[2, 4, 3], &[5, 4], true, true, 40);
}

#[test]
fn broadcast_lhs_gradient_sums_over_batch() {
    check_gradients(&[3, 4], &[2, 4, 5], false, false, 41);
    check_gradients(&[3, 4], &[2, 5, 4], false, true, 42);
    check_gradients(&[4, 3], &[2, 4, 5], true, false, 43);
    check_gradients(&[4, 3], &[2, 5, 4], true, true, 44);
}

#[test]
fn unit_batches_fold_like_plain_matrices() {
    check_gradients(&[3, 2, 4], &[1, 4, 5], false, false, 48);
    check_gradients(&[3, 4, 2], &[1, 5, 4], true, true, 49);
    check_gradients(&[1, 2, 4], &[3, 5, 4], false, true, 50);
    check_gradients(&[1, 4, 2], &[3, 4, 5], true, false, 51);
    check_gradients(&[2, 3, 2, 4], &[1, 1, 4, 5], false, false, 52);
}

#[test]
fn vector_operand_gradients() {
    check_gradients(&[4], &[2, 4, 5], false, false, 45);
    check_gradients(&[3, 4], &[4], false, false, 46);
}

#[test]
fn skipped_targets_issue_no_products() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(47);
    let x = random(&[2, 3, 4], &mut rng);
    let y = random(&[2, 4, 5], &mut rng);
    let dout = random(&[2, 3, 5], &mut rng);
    let primitive = RecordingPrimitive::new(ReferencePrimitive::new());
    let mut ctx = ExecutionContext::new(&primitive).with_native_batch_limit(usize::MAX);
    let mut dx = Tensor::zeros(DType::F32, Shape::scalar());

    matmul_grad(
        &mut ctx,
        &x,
        &y,
        &dout,
        &MatMulConfig::default(),
        Some(&mut dx),
        None,
    )?;

    assert_eq!(dx.dims(), &[2, 3, 4]);
    assert_eq!(primitive.calls().len(), 1);
    assert_eq!(primitive.synchronize_count(), 1);
    Ok(())
}

#[test]
fn alpha_scales_gradients() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(48);
    let x = random(&[3, 4], &mut rng);
    let y = random(&[4, 2], &mut rng);
    let dout = random(&[3, 2], &mut rng);
    let primitive = ReferencePrimitive::new();
    let mut ctx = ExecutionContext::new(&primitive);
    let mut dx = Tensor::zeros(DType::F32, Shape::scalar());

    matmul_grad(
        &mut ctx,
        &x,
        &y,
        &dout,
        &MatMulConfig::default().with_alpha(0.5),
        Some(&mut dx),
        None,
    )?;

    let expected = oracle::matmul(&Dense::from_tensor(&dout), &Dense::from_tensor(&y), false, true)
        .scale_add(0.5, None);
    oracle::assert_close(dx.data(), &expected.values, 1e-5);
    Ok(())
}

#[test]
fn gradients_take_the_input_layout() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(49);
    let x = random(&[3, 4], &mut rng);
    let strided_x = x.with_layout(&[1, 3])?;
    let y = random(&[4, 2], &mut rng);
    let dout = random(&[3, 2], &mut rng);
    let primitive = ReferencePrimitive::new();
    let config = MatMulConfig::default();

    let mut packed = Tensor::zeros(DType::F32, Shape::scalar());
    let mut ctx = ExecutionContext::new(&primitive);
    matmul_grad(&mut ctx, &x, &y, &dout, &config, Some(&mut packed), None)?;

    let mut strided = Tensor::zeros(DType::F32, Shape::scalar());
    let mut ctx = ExecutionContext::new(&primitive);
    matmul_grad(&mut ctx, &strided_x, &y, &dout, &config, Some(&mut strided), None)?;

    assert_eq!(strided.strides(), &[1, 3]);
    assert_eq!(strided.to_f32_vec(), packed.to_f32_vec());
    Ok(())
}

#[test]
fn bf16_gradients_keep_their_dtype() -> Result<()> {
    let to_bf16 = |values: &[f32]| values.iter().map(|&v| bf16::from_f32(v)).collect::<Vec<_>>();
    let x = Tensor::from_elements(Shape::new([1, 2]), to_bf16(&[1.0, 2.0]))?;
    let y = Tensor::from_elements(Shape::new([2, 1]), to_bf16(&[3.0, 4.0]))?;
    let dout = Tensor::from_elements(Shape::new([1, 1]), to_bf16(&[2.0]))?;
    let primitive = ReferencePrimitive::new();
    let mut ctx = ExecutionContext::new(&primitive);
    let mut dx = Tensor::zeros(DType::F32, Shape::scalar());
    let mut dy = Tensor::zeros(DType::F32, Shape::scalar());

    matmul_grad(
        &mut ctx,
        &x,
        &y,
        &dout,
        &MatMulConfig::default(),
        Some(&mut dx),
        Some(&mut dy),
    )?;

    assert_eq!(dx.dtype(), DType::BF16);
    assert_eq!(dx.to_f32_vec(), vec![6.0, 8.0]);
    assert_eq!(dy.to_f32_vec(), vec![2.0, 4.0]);
    Ok(())
}

#[test]
fn fused_attributes_are_rejected() {
    let x = Tensor::zeros(DType::F32, Shape::new([12]));
    let y = Tensor::zeros(DType::F32, Shape::new([2, 3]));
    let dout = Tensor::zeros(DType::F32, Shape::new([6, 3]));
    let primitive = ReferencePrimitive::new();
    let mut ctx = ExecutionContext::new(&primitive);
    let mut dx = Tensor::zeros(DType::F32, Shape::scalar());
    let config = MatMulConfig::default().with_fused_x(FusedAttributes::new([2, 6], [1, 0]));

    let err = matmul_grad(&mut ctx, &x, &y, &dout, &config, Some(&mut dx), None)
        .expect_err("fused gradient");
    assert_eq!(err.kind(), ErrorKind::Unimplemented);
}

#[test]
fn mutually_broadcast_batches_are_rejected() {
    let x = Tensor::zeros(DType::F32, Shape::new([2, 3, 4]));
    let y = Tensor::zeros(DType::F32, Shape::new([3, 4, 5]));
    let dout = Tensor::zeros(DType::F32, Shape::new([3, 3, 5]));
    let primitive = ReferencePrimitive::new();
    let mut ctx = ExecutionContext::new(&primitive);
    let mut dx = Tensor::zeros(DType::F32, Shape::scalar());

    let err = matmul_grad(
        &mut ctx,
        &x,
        &y,
        &dout,
        &MatMulConfig::default(),
        Some(&mut dx),
        None,
    )
    .expect_err("batch 2 vs 3");
    assert_eq!(err.kind(), ErrorKind::Unimplemented);

    let x = Tensor::zeros(DType::F32, Shape::new([1, 3, 2, 4]));
    let y = Tensor::zeros(DType::F32, Shape::new([3, 1, 4, 5]));
    let dout = Tensor::zeros(DType::F32, Shape::new([3, 3, 2, 5]));
    let err = matmul_grad(
        &mut ctx,
        &x,
        &y,
        &dout,
        &MatMulConfig::default(),
        Some(&mut dx),
        None,
    )
    .expect_err("batch [1, 3] vs [3, 1]");
    assert_eq!(err.kind(), ErrorKind::Unimplemented);
}
