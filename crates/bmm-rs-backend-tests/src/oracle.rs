//! Straightforward numpy-semantics matmul used as the expected value in conformance tests.

use bmm_rs::{Shape, Tensor};

/// Row-major values with their dims.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub dims: Vec<i64>,
    pub values: Vec<f32>,
}

impl Dense {
    pub fn from_tensor(tensor: &Tensor) -> Self {
        Dense {
            dims: tensor.dims().to_vec(),
            values: tensor.to_f32_vec(),
        }
    }

    pub fn into_tensor(self) -> Tensor {
        Tensor::from_vec(Shape::new(&self.dims), self.values)
            .unwrap_or_else(|err| panic!("oracle produced an inconsistent tensor: {err}"))
    }

    /// Output axis `i` is input axis `axis[i]`.
    pub fn permute(&self, axis: &[usize]) -> Dense {
        let rank = self.dims.len();
        assert_eq!(axis.len(), rank, "permutation rank");
        let mut in_strides = vec![1i64; rank];
        for d in (0..rank.saturating_sub(1)).rev() {
            in_strides[d] = in_strides[d + 1] * self.dims[d + 1];
        }
        let dims: Vec<i64> = axis.iter().map(|&a| self.dims[a]).collect();
        let mut values = Vec::with_capacity(self.values.len());
        let mut coord = vec![0i64; rank];
        for _ in 0..self.values.len() {
            let offset: i64 = coord
                .iter()
                .enumerate()
                .map(|(i, c)| c * in_strides[axis[i]])
                .sum();
            values.push(self.values[offset as usize]);
            for d in (0..rank).rev() {
                coord[d] += 1;
                if coord[d] < dims[d] {
                    break;
                }
                coord[d] = 0;
            }
        }
        Dense { dims, values }
    }

    pub fn transpose_last_two(&self) -> Dense {
        let rank = self.dims.len();
        let mut axis: Vec<usize> = (0..rank).collect();
        axis.swap(rank - 1, rank - 2);
        self.permute(&axis)
    }

    pub fn reshape(&self, dims: &[i64]) -> Dense {
        assert_eq!(
            dims.iter().product::<i64>() as usize,
            self.values.len(),
            "reshape element count"
        );
        Dense {
            dims: dims.to_vec(),
            values: self.values.clone(),
        }
    }

    pub fn scale_add(&self, alpha: f32, residual: Option<&[f32]>) -> Dense {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| alpha * v + residual.map_or(0.0, |r| r[i]))
            .collect();
        Dense {
            dims: self.dims.clone(),
            values,
        }
    }
}

/// `op(x) · op(y)` with numpy broadcasting; rank-1 operands ignore their transpose flag and
/// drop their lifted axis from the result (`[1]` for vector · vector).
pub fn matmul(x: &Dense, y: &Dense, trans_x: bool, trans_y: bool) -> Dense {
    let x_vec = x.dims.len() == 1;
    let y_vec = y.dims.len() == 1;
    let x = if x_vec {
        x.reshape(&[1, x.dims[0]])
    } else if trans_x {
        x.transpose_last_two()
    } else {
        x.clone()
    };
    let y = if y_vec {
        y.reshape(&[y.dims[0], 1])
    } else if trans_y {
        y.transpose_last_two()
    } else {
        y.clone()
    };

    let (xr, yr) = (x.dims.len(), y.dims.len());
    let (m, k) = (x.dims[xr - 2], x.dims[xr - 1]);
    let (k2, n) = (y.dims[yr - 2], y.dims[yr - 1]);
    assert_eq!(k, k2, "oracle contraction mismatch");

    let batch_rank = (xr - 2).max(yr - 2);
    let pad = |dims: &[i64]| -> Vec<i64> {
        let own = &dims[..dims.len() - 2];
        let mut padded = vec![1i64; batch_rank - own.len()];
        padded.extend_from_slice(own);
        padded
    };
    let xb = pad(&x.dims);
    let yb = pad(&y.dims);
    let ob: Vec<i64> = xb
        .iter()
        .zip(&yb)
        .map(|(&a, &b)| {
            assert!(a == b || a == 1 || b == 1, "oracle broadcast mismatch");
            if a == 1 {
                b
            } else {
                a
            }
        })
        .collect();
    let batch: usize = ob.iter().product::<i64>() as usize;
    let (m, n, k) = (m as usize, n as usize, k as usize);

    let mut values = vec![0.0f32; batch * m * n];
    let mut coord = vec![0i64; batch_rank];
    for b in 0..batch {
        let mut xi = 0i64;
        let mut yi = 0i64;
        for d in 0..batch_rank {
            xi = xi * xb[d] + if xb[d] == 1 { 0 } else { coord[d] };
            yi = yi * yb[d] + if yb[d] == 1 { 0 } else { coord[d] };
        }
        let xo = xi as usize * m * k;
        let yo = yi as usize * k * n;
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for l in 0..k {
                    acc += x.values[xo + i * k + l] * y.values[yo + l * n + j];
                }
                values[b * m * n + i * n + j] = acc;
            }
        }
        for d in (0..batch_rank).rev() {
            coord[d] += 1;
            if coord[d] < ob[d] {
                break;
            }
            coord[d] = 0;
        }
    }

    let mut dims = if xr > 2 || yr > 2 { ob } else { Vec::new() };
    if !x_vec {
        dims.push(m as i64);
    }
    if !y_vec {
        dims.push(n as i64);
    }
    if dims.is_empty() {
        dims.push(1);
    }
    Dense { dims, values }
}

/// Panics with the first offending index when `actual` and `expected` differ by more than
/// `tol` (absolute, scaled by the magnitude of the expected value).
pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let bound = tol * e.abs().max(1.0);
        assert!(
            (a - e).abs() <= bound,
            "value mismatch at {i}: actual {a}, expected {e} (tol {bound})"
        );
    }
}
