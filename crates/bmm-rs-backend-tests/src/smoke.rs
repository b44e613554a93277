//! Conformance checks every GEMM primitive must pass, driven through the public kernels.

use bmm_rs::ops::matmul::FusedAttributes;
use bmm_rs::primitive::{GemmCall, GemmOperand, GemmPrimitive, StridedMatrix};
use bmm_rs::{matmul, matmul_grad, DType, ExecutionContext, MatMulConfig, Shape, Tensor};
use half::bf16;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::oracle::{self, Dense};

const TOL: f32 = 1e-4;

fn random(dims: &[i64], rng: &mut StdRng) -> Tensor {
    Tensor::randn(Shape::new(dims), 1.0, rng)
}

fn run<P: GemmPrimitive>(
    primitive: &P,
    x: &Tensor,
    y: &Tensor,
    residual: Option<&Tensor>,
    config: &MatMulConfig,
) -> Tensor {
    let mut ctx = ExecutionContext::new(primitive);
    matmul(&mut ctx, x, y, residual, config)
        .unwrap_or_else(|err| panic!("matmul failed on {}: {err}", primitive.name()))
}

pub fn matmul_matches_expected<P: GemmPrimitive>(primitive: &P) {
    let a = Tensor::from_vec(Shape::new([2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = Tensor::from_vec(Shape::new([2, 2]), vec![5.0, 6.0, 7.0, 8.0]).unwrap();

    let out = run(primitive, &a, &b, None, &MatMulConfig::default());

    assert_eq!(out.dims(), &[2, 2]);
    assert_eq!(out.data(), &[19.0, 22.0, 43.0, 50.0]);
}

pub fn broadcast_batches_match_oracle<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(11);
    let x = random(&[2, 1, 4, 5], &mut rng);
    let y = random(&[1, 3, 5, 6], &mut rng);

    let out = run(primitive, &x, &y, None, &MatMulConfig::default());
    let expected = oracle::matmul(&Dense::from_tensor(&x), &Dense::from_tensor(&y), false, false);

    assert_eq!(out.dims(), &[2, 3, 4, 6]);
    oracle::assert_close(out.data(), &expected.values, TOL);
}

pub fn transposed_operands_match_oracle<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(12);
    for (trans_x, trans_y) in [(false, false), (false, true), (true, false), (true, true)] {
        let x_dims: &[i64] = if trans_x { &[2, 5, 3] } else { &[2, 3, 5] };
        let y_dims: &[i64] = if trans_y { &[4, 5] } else { &[5, 4] };
        let x = random(x_dims, &mut rng);
        let y = random(y_dims, &mut rng);
        let config = MatMulConfig::default().with_transpose(trans_x, trans_y);

        let out = run(primitive, &x, &y, None, &config);
        let expected = oracle::matmul(
            &Dense::from_tensor(&x),
            &Dense::from_tensor(&y),
            trans_x,
            trans_y,
        );

        assert_eq!(out.dims(), &[2, 3, 4], "trans_x={trans_x} trans_y={trans_y}");
        oracle::assert_close(out.data(), &expected.values, TOL);
    }
}

pub fn vector_operands_follow_numpy_rules<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(13);
    let cases: [(&[i64], &[i64], &[i64]); 4] = [
        (&[4], &[4], &[1]),
        (&[3, 4], &[4], &[3]),
        (&[4], &[2, 4, 5], &[2, 5]),
        (&[2, 3, 4], &[4], &[2, 3]),
    ];
    for (x_dims, y_dims, out_dims) in cases {
        let x = random(x_dims, &mut rng);
        let y = random(y_dims, &mut rng);

        let out = run(primitive, &x, &y, None, &MatMulConfig::default());
        let expected =
            oracle::matmul(&Dense::from_tensor(&x), &Dense::from_tensor(&y), false, false);

        assert_eq!(out.dims(), out_dims, "x {x_dims:?} y {y_dims:?}");
        oracle::assert_close(out.data(), &expected.values, TOL);
    }
}

pub fn alpha_and_residual_are_applied<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(14);
    let x = random(&[2, 3, 4], &mut rng);
    let y = random(&[4, 5], &mut rng);
    let residual = random(&[2, 3, 5], &mut rng);
    let config = MatMulConfig::default().with_alpha(0.5);

    let out = run(primitive, &x, &y, Some(&residual), &config);
    let expected = oracle::matmul(&Dense::from_tensor(&x), &Dense::from_tensor(&y), false, false)
        .scale_add(0.5, Some(residual.data()));

    assert_eq!(out.dims(), &[2, 3, 5]);
    oracle::assert_close(out.data(), &expected.values, TOL);
}

pub fn single_matrix_calls_match_native_batch<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(15);
    let x = random(&[2, 3, 2, 4], &mut rng);
    let y = random(&[3, 4, 2], &mut rng);
    let config = MatMulConfig::default();

    let batched = run(primitive, &x, &y, None, &config);
    let mut ctx = ExecutionContext::new(primitive).with_native_batch_limit(1);
    let single = matmul(&mut ctx, &x, &y, None, &config).expect("single-matrix matmul");

    assert_eq!(ctx.stream().submitted(), 6);
    assert_eq!(ctx.stream().pending(), 0);
    assert_eq!(single.dims(), batched.dims());
    oracle::assert_close(single.data(), batched.data(), TOL);
}

pub fn reduced_precision_outputs<P: GemmPrimitive>(primitive: &P) {
    let to_bf16 = |values: &[f32]| values.iter().map(|&v| bf16::from_f32(v)).collect::<Vec<_>>();
    let a = Tensor::from_elements(Shape::new([2, 2]), to_bf16(&[1.0, 2.0, 3.0, 4.0])).unwrap();
    let b = Tensor::from_elements(Shape::new([2, 2]), to_bf16(&[5.0, 6.0, 7.0, 8.0])).unwrap();

    let out = run(primitive, &a, &b, None, &MatMulConfig::default());
    assert_eq!(out.dtype(), DType::BF16);
    assert_eq!(out.to_f32_vec(), vec![19.0, 22.0, 43.0, 50.0]);

    let widened = run(
        primitive,
        &a,
        &b,
        None,
        &MatMulConfig::default().with_force_fp32_output(true),
    );
    assert_eq!(widened.dtype(), DType::F32);
    assert_eq!(widened.data(), &[19.0, 22.0, 43.0, 50.0]);

    let a = Tensor::from_elements(Shape::new([2, 2]), vec![1i8, 2, 3, 4]).unwrap();
    let b = Tensor::from_elements(Shape::new([2, 2]), vec![5i8, 6, 7, 8]).unwrap();
    let out = run(primitive, &a, &b, None, &MatMulConfig::default());
    assert_eq!(out.dtype(), DType::I8);
    assert_eq!(out.as_slice::<i8>().unwrap(), &[19, 22, 43, 50]);

    let a = Tensor::from_elements(Shape::new([1, 2]), vec![100i8, 100]).unwrap();
    let b = Tensor::from_elements(Shape::new([2, 1]), vec![100i8, 100]).unwrap();
    let out = run(primitive, &a, &b, None, &MatMulConfig::default());
    assert_eq!(out.as_slice::<i8>().unwrap(), &[127]);

    // Unsigned inputs produce signed outputs.
    let a = Tensor::from_elements(Shape::new([1, 2]), vec![2u8, 3]).unwrap();
    let b = Tensor::from_elements(Shape::new([2, 2]), vec![10u8, 20, 4, 3]).unwrap();
    let out = run(primitive, &a, &b, None, &MatMulConfig::default());
    assert_eq!(out.dtype(), DType::I8);
    assert_eq!(out.as_slice::<i8>().unwrap(), &[32, 49]);

    let a = Tensor::from_elements(Shape::new([1, 2]), vec![200u8, 200]).unwrap();
    let b = Tensor::from_elements(Shape::new([2, 1]), vec![1u8, 1]).unwrap();
    let out = run(primitive, &a, &b, None, &MatMulConfig::default());
    assert_eq!(out.as_slice::<i8>().unwrap(), &[127]);
}

pub fn fused_input_matches_materialized<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(16);
    // [batch, seq, heads * dim] viewed as [batch, heads, seq, dim].
    let x = random(&[2, 3, 8], &mut rng);
    let fused = FusedAttributes::new([2, 3, 2, 4], [0, 2, 1, 3]);
    let materialized = Dense::from_tensor(&x)
        .reshape(&[2, 3, 2, 4])
        .permute(&[0, 2, 1, 3]);

    for trans_x in [false, true] {
        let y_dims: &[i64] = if trans_x { &[2, 2, 3, 5] } else { &[2, 2, 4, 5] };
        let y = random(y_dims, &mut rng);
        let config = MatMulConfig::default()
            .with_transpose(trans_x, false)
            .with_fused_x(fused.clone());

        let out = run(primitive, &x, &y, None, &config);
        let expected = oracle::matmul(&materialized, &Dense::from_tensor(&y), trans_x, false);

        assert_eq!(out.dims(), expected.dims.as_slice(), "trans_x={trans_x}");
        oracle::assert_close(out.data(), &expected.values, TOL);
    }

    // A rank-2 reshape picks up an implicit batch stride.
    let x = random(&[12], &mut rng);
    let y = random(&[2, 3], &mut rng);
    let config = MatMulConfig::default().with_fused_x(FusedAttributes::new([2, 6], [1, 0]));
    let out = run(primitive, &x, &y, None, &config);
    let materialized = Dense::from_tensor(&x).reshape(&[2, 6]).permute(&[1, 0]);
    let expected = oracle::matmul(&materialized, &Dense::from_tensor(&y), false, false);
    assert_eq!(out.dims(), &[6, 3]);
    oracle::assert_close(out.data(), &expected.values, TOL);
}

pub fn fused_output_is_permuted<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(17);
    let x = random(&[2, 2, 3, 4], &mut rng);
    let y = random(&[2, 2, 4, 5], &mut rng);
    let config = MatMulConfig::default().with_fused_out(FusedAttributes::new([2, 3, 10], [0, 2, 1, 3]));

    let out = run(primitive, &x, &y, None, &config);
    let expected = oracle::matmul(&Dense::from_tensor(&x), &Dense::from_tensor(&y), false, false)
        .permute(&[0, 2, 1, 3])
        .reshape(&[2, 3, 10]);

    assert_eq!(out.dims(), &[2, 3, 10]);
    assert!(out.is_contiguous());
    oracle::assert_close(out.data(), &expected.values, TOL);
}

pub fn gradients_match_oracle<P: GemmPrimitive>(primitive: &P) {
    let mut rng = StdRng::seed_from_u64(18);
    let x = random(&[2, 3, 4], &mut rng);
    let y = random(&[2, 4, 5], &mut rng);
    let dout = random(&[2, 3, 5], &mut rng);
    let mut dx = Tensor::zeros(DType::F32, Shape::new([2, 3, 4]));
    let mut dy = Tensor::zeros(DType::F32, Shape::new([2, 4, 5]));

    let mut ctx = ExecutionContext::new(primitive);
    matmul_grad(
        &mut ctx,
        &x,
        &y,
        &dout,
        &MatMulConfig::default(),
        Some(&mut dx),
        Some(&mut dy),
    )
    .unwrap_or_else(|err| panic!("matmul_grad failed on {}: {err}", primitive.name()));

    let (xd, yd, dd) = (
        Dense::from_tensor(&x),
        Dense::from_tensor(&y),
        Dense::from_tensor(&dout),
    );
    assert_eq!(dx.dims(), &[2, 3, 4]);
    assert_eq!(dy.dims(), &[2, 4, 5]);
    oracle::assert_close(dx.data(), &oracle::matmul(&dd, &yd, false, true).values, TOL);
    oracle::assert_close(dy.data(), &oracle::matmul(&xd, &dd, true, false).values, TOL);
}

/// Calls the primitive directly with column-major, broadcast and padded layouts.
pub fn strided_call_layouts<P: GemmPrimitive>(primitive: &P) {
    let (batch, m, n, k) = (2usize, 2usize, 3usize, 3usize);
    // lhs: two column-major 2x3 matrices.
    let lhs: Vec<f32> = (0..batch * m * k).map(|v| v as f32 * 0.5 - 1.0).collect();
    let lhs_layout = StridedMatrix {
        offset: 0,
        batch_stride: m * k,
        row_stride: 1,
        col_stride: m,
    };
    // rhs: one 3x3 matrix with a padded row pitch, shared by both batch entries.
    let rhs: Vec<f32> = (0..k * (n + 1)).map(|v| 1.0 - v as f32 * 0.25).collect();
    let rhs_layout = StridedMatrix {
        offset: 0,
        batch_stride: 0,
        row_stride: n + 1,
        col_stride: 1,
    };
    let residual: Vec<f32> = (0..batch * m * n).map(|v| v as f32).collect();
    let out_layout = StridedMatrix::row_major(m, n);
    let mut out = vec![0.0f32; batch * m * n];

    primitive
        .gemm(GemmCall {
            batch,
            m,
            n,
            k,
            alpha: 2.0,
            lhs: GemmOperand::new(&lhs, lhs_layout),
            rhs: GemmOperand::new(&rhs, rhs_layout),
            residual: Some(GemmOperand::new(&residual, out_layout)),
            out: &mut out,
            out_layout,
        })
        .unwrap_or_else(|err| panic!("gemm failed on {}: {err}", primitive.name()));

    let mut expected = vec![0.0f32; batch * m * n];
    for b in 0..batch {
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for l in 0..k {
                    acc += lhs[lhs_layout.index(b, i, l)] * rhs[rhs_layout.index(b, l, j)];
                }
                let at = out_layout.index(b, i, j);
                expected[at] = 2.0 * acc + residual[at];
            }
        }
    }
    oracle::assert_close(&out, &expected, TOL);
}

pub fn out_of_bounds_call_is_rejected<P: GemmPrimitive>(primitive: &P) {
    let lhs = vec![1.0f32; 4];
    let rhs = vec![1.0f32; 3];
    let mut out = vec![0.0f32; 4];
    let result = primitive.gemm(GemmCall {
        batch: 1,
        m: 2,
        n: 2,
        k: 2,
        alpha: 1.0,
        lhs: GemmOperand::new(&lhs, StridedMatrix::row_major(2, 2)),
        rhs: GemmOperand::new(&rhs, StridedMatrix::row_major(2, 2)),
        residual: None,
        out: &mut out,
        out_layout: StridedMatrix::row_major(2, 2),
    });
    assert!(result.is_err(), "{} accepted a short rhs buffer", primitive.name());
}
