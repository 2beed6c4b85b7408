//! Small dense linear algebra for the weighted normal equations
//!
//! Matrices are square, row-major, stored flat as `&[f64]` of length `n * n`.
//! The systems solved here have one row per design column, so `n` is the
//! number of groups and stays small.

use ndarray::Array2;

/// Pivots below this magnitude are treated as singular
const PIVOT_EPS: f64 = 1e-15;

/// X'WX for design `x` (samples x coefficients) and per-sample weights.
pub fn xtwx(x: &Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let n_coefs = x.ncols();
    let mut out = vec![0.0; n_coefs * n_coefs];
    for i in 0..x.nrows() {
        let w = weights[i];
        for j in 0..n_coefs {
            let xij = x[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..n_coefs {
                out[j * n_coefs + k] += w * xij * x[[i, k]];
            }
        }
    }
    out
}

/// X'Wz for design `x`, weights and working response `z`.
pub fn xtwz(x: &Array2<f64>, weights: &[f64], z: &[f64]) -> Vec<f64> {
    let n_coefs = x.ncols();
    let mut out = vec![0.0; n_coefs];
    for i in 0..x.nrows() {
        let wz = weights[i] * z[i];
        for j in 0..n_coefs {
            out[j] += x[[i, j]] * wz;
        }
    }
    out
}

/// Solve `a * x = b`. Closed form for 2x2, Gauss-Jordan with partial pivoting otherwise.
///
/// Returns `None` for a singular system or non-finite solution.
pub fn solve(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);

    let x = match n {
        0 => return None,
        1 => {
            if a[0].abs() < PIVOT_EPS {
                return None;
            }
            vec![b[0] / a[0]]
        }
        2 => {
            let det = a[0] * a[3] - a[1] * a[2];
            if det.abs() < PIVOT_EPS {
                return None;
            }
            vec![(a[3] * b[0] - a[1] * b[1]) / det, (a[0] * b[1] - a[2] * b[0]) / det]
        }
        _ => gauss_jordan(a, b, n, 1)?,
    };

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Inverse of `a`, or `None` if singular.
pub fn invert(a: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);

    if n == 2 {
        let det = a[0] * a[3] - a[1] * a[2];
        if det.abs() < PIVOT_EPS {
            return None;
        }
        return Some(vec![a[3] / det, -a[1] / det, -a[2] / det, a[0] / det]);
    }

    let mut identity = vec![0.0; n * n];
    for i in 0..n {
        identity[i * n + i] = 1.0;
    }
    gauss_jordan(a, &identity, n, n)
}

/// Gauss-Jordan elimination on `[a | rhs]`, where `rhs` has `m` columns (row-major).
fn gauss_jordan(a: &[f64], rhs: &[f64], n: usize, m: usize) -> Option<Vec<f64>> {
    let width = n + m;
    let mut aug: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let mut row = a[i * n..(i + 1) * n].to_vec();
            row.extend_from_slice(&rhs[i * m..(i + 1) * m]);
            row
        })
        .collect();

    for k in 0..n {
        let mut max_val = aug[k][k].abs();
        let mut max_row = k;
        for (i, row) in aug.iter().enumerate().skip(k + 1) {
            if row[k].abs() > max_val {
                max_val = row[k].abs();
                max_row = i;
            }
        }

        if max_val < PIVOT_EPS {
            return None;
        }

        if max_row != k {
            aug.swap(k, max_row);
        }

        let pivot = aug[k][k];
        for v in aug[k].iter_mut() {
            *v /= pivot;
        }

        let pivot_row = aug[k].clone();
        for (i, row) in aug.iter_mut().enumerate() {
            if i != k {
                let factor = row[k];
                if factor != 0.0 {
                    for j in 0..width {
                        row[j] -= factor * pivot_row[j];
                    }
                }
            }
        }
    }

    Some(aug.into_iter().flat_map(|row| row[n..].to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve_2x2_closed_form() {
        let a = [2.0, 1.0, 1.0, 3.0];
        let x = solve(&a, &[3.0, 5.0], 2).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_solve_3x3_gauss_jordan() {
        // x = [1, 2, 3]
        let a = [4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0];
        let b = [6.0, 10.0, 8.0];
        let x = solve(&a, &b, 3).unwrap();
        for (got, want) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-10);
        }
    }

    #[test]
    fn test_singular_is_none() {
        assert!(solve(&[1.0, 2.0, 2.0, 4.0], &[1.0, 1.0], 2).is_none());
        let a = [1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0];
        assert!(invert(&a, 3).is_none());
    }

    #[test]
    fn test_invert_roundtrip() {
        let a = [4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0];
        let inv = invert(&a, 3).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|k| a[i * 3 + k] * inv[k * 3 + j]).sum();
                let want = if i == j { 1.0 } else { 0.0 };
                assert!((v - want).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_xtwx_indicator_design() {
        let x = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        let w = [1.0, 2.0, 3.0];
        assert_eq!(xtwx(&x, &w), vec![6.0, 3.0, 3.0, 3.0]);
        assert_eq!(xtwz(&x, &w, &[1.0, 1.0, 2.0]), vec![9.0, 6.0]);
    }
}
