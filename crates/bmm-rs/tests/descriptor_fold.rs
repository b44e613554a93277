use bmm_rs::ops::matmul::descriptor::{column_matrix_dims, row_matrix_dims};
use bmm_rs::ops::matmul::fold::{fold_first_and_last_dims, fold_outer_dims};
use bmm_rs::ops::matmul::MatrixDescriptor;
use bmm_rs::{Shape, Tensor};

fn iota(dims: &[i64]) -> Tensor {
    let len = dims.iter().product::<i64>() as usize;
    Tensor::from_vec(Shape::new(dims), (0..len).map(|v| v as f32).collect())
        .unwrap_or_else(|err| panic!("iota {dims:?}: {err}"))
}

#[test]
fn descriptor_folds_leading_axes_into_batch() {
    let desc = MatrixDescriptor::new(&[2, 3, 4, 5], false).expect("descriptor");
    assert_eq!(desc.batch_size(), 6);
    assert_eq!((desc.height(), desc.width()), (4, 5));
    assert_eq!((desc.rows(), desc.cols()), (4, 5));
    assert_eq!(desc.matrix_sequence_dims().as_slice(), &[6, 4, 5]);
}

#[test]
fn descriptor_without_batch_has_zero_batch_size() {
    let desc = MatrixDescriptor::new(&[4, 5], true).expect("descriptor");
    assert_eq!(desc.batch_size(), 0);
    assert!(desc.transposed());
    assert_eq!((desc.rows(), desc.cols()), (5, 4));
    assert_eq!(desc.matrix_sequence_dims().as_slice(), &[4, 5]);

    assert!(MatrixDescriptor::new(&[4], false).is_err());
}

#[test]
fn unit_batch_descriptor_drops_to_a_plain_matrix() {
    let desc = MatrixDescriptor::new(&[1, 1, 4, 5], true).expect("descriptor");
    assert_eq!(desc.batch_size(), 1);
    let plain = desc.without_unit_batch();
    assert_eq!(plain.batch_size(), 0);
    assert!(plain.transposed());
    assert_eq!(plain.matrix_sequence_dims().as_slice(), &[4, 5]);

    let batched = MatrixDescriptor::new(&[3, 4, 5], false).expect("descriptor");
    assert_eq!(batched.without_unit_batch(), batched);
}

#[test]
fn vectors_lift_to_row_or_column() {
    assert_eq!(row_matrix_dims(&[4]).as_slice(), &[1, 4]);
    assert_eq!(column_matrix_dims(&[4]).as_slice(), &[4, 1]);
    assert_eq!(row_matrix_dims(&[2, 4]).as_slice(), &[2, 4]);
}

#[test]
fn fold_outer_dims_keeps_values_in_place() {
    let input = iota(&[2, 3, 4]);
    let folded = fold_outer_dims(&input).expect("fold");
    assert_eq!(folded.dims(), &[6, 4]);
    assert_eq!(folded.data(), input.data());
}

#[test]
fn fold_first_and_last_dims_interleaves_batches() {
    let input = iota(&[2, 3, 4]);
    let folded = fold_first_and_last_dims(&input).expect("fold");
    assert_eq!(folded.dims(), &[3, 8]);

    let values = folded.data();
    for p in 0..2usize {
        for m in 0..3usize {
            for n in 0..4usize {
                let expected = (p * 12 + m * 4 + n) as f32;
                assert_eq!(values[m * 8 + p * 4 + n], expected, "p={p} m={m} n={n}");
            }
        }
    }
}

#[test]
fn folds_pass_rank_two_through() {
    let input = iota(&[3, 4]);
    assert_eq!(fold_outer_dims(&input).expect("fold"), input);
    assert_eq!(fold_first_and_last_dims(&input).expect("fold"), input);
}
