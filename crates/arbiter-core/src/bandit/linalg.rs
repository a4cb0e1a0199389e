//! Small dense linear algebra over row-major `Vec<f64>` matrices
//!
//! Dimensions here are the context dimension (tens at most), so plain loops
//! are fast enough and keep the numeric behaviour easy to audit.

/// Dot product over the shorter of the two slices
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Row-major `dim x dim` identity matrix
pub fn identity(dim: usize) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = 1.0;
    }
    m
}

/// `A x` for a row-major `dim x dim` matrix
pub fn mat_vec(a: &[f64], dim: usize, x: &[f64]) -> Vec<f64> {
    (0..dim)
        .map(|i| dot(&a[i * dim..(i + 1) * dim], x))
        .collect()
}

/// `x^T A x`
pub fn quadratic_form(a: &[f64], dim: usize, x: &[f64]) -> f64 {
    dot(x, &mat_vec(a, dim, x))
}

/// `A += x x^T`
pub fn add_outer_product(a: &mut [f64], dim: usize, x: &[f64]) {
    for i in 0..dim {
        for j in 0..dim {
            a[i * dim + j] += x[i] * x[j];
        }
    }
}

/// Sherman-Morrison: given `A^{-1}`, produce `(A + x x^T)^{-1}` in place.
///
/// The denominator `1 + x^T A^{-1} x` is at least 1 for positive-definite `A`.
pub fn sherman_morrison_update(a_inv: &mut [f64], dim: usize, x: &[f64]) {
    let a_inv_x = mat_vec(a_inv, dim, x);
    let denom = 1.0 + dot(x, &a_inv_x);
    if !denom.is_finite() || denom <= 0.0 {
        return;
    }
    for i in 0..dim {
        for j in 0..dim {
            a_inv[i * dim + j] -= a_inv_x[i] * a_inv_x[j] / denom;
        }
    }
}

/// Invert a row-major matrix with Gauss-Jordan elimination and partial pivoting.
///
/// Returns `None` if the matrix is singular (or numerically close to it).
pub fn invert(a: &[f64], dim: usize) -> Option<Vec<f64>> {
    if a.len() != dim * dim {
        return None;
    }

    let mut work = a.to_vec();
    let mut inv = identity(dim);

    for col in 0..dim {
        let pivot_row = (col..dim).max_by(|&r1, &r2| {
            work[r1 * dim + col]
                .abs()
                .total_cmp(&work[r2 * dim + col].abs())
        })?;

        let pivot = work[pivot_row * dim + col];
        if !pivot.is_finite() || pivot.abs() < 1e-12 {
            return None;
        }

        if pivot_row != col {
            for j in 0..dim {
                work.swap(pivot_row * dim + j, col * dim + j);
                inv.swap(pivot_row * dim + j, col * dim + j);
            }
        }

        for j in 0..dim {
            work[col * dim + j] /= pivot;
            inv[col * dim + j] /= pivot;
        }

        for row in 0..dim {
            if row == col {
                continue;
            }
            let factor = work[row * dim + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..dim {
                work[row * dim + j] -= factor * work[col * dim + j];
                inv[row * dim + j] -= factor * inv[col * dim + j];
            }
        }
    }

    Some(inv)
}

/// Split a row-major matrix into rows (snapshot layout)
pub fn to_rows(a: &[f64], dim: usize) -> Vec<Vec<f64>> {
    a.chunks(dim.max(1)).map(<[f64]>::to_vec).collect()
}

/// Flatten rows back into a row-major matrix; `None` unless the shape is `dim x dim`
pub fn from_rows(rows: &[Vec<f64>], dim: usize) -> Option<Vec<f64>> {
    if rows.len() != dim || rows.iter().any(|row| row.len() != dim) {
        return None;
    }
    Some(rows.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{x} != {y}");
        }
    }

    #[test]
    fn test_invert_identity() {
        assert_close(&invert(&identity(3), 3).unwrap(), &identity(3));
    }

    #[test]
    fn test_invert_known_matrix() {
        let a = vec![4.0, 7.0, 2.0, 6.0];
        let inv = invert(&a, 2).unwrap();
        assert_close(&inv, &[0.6, -0.7, -0.2, 0.4]);
    }

    #[test]
    fn test_invert_requires_pivoting() {
        let a = vec![0.0, 1.0, 1.0, 0.0];
        assert_close(&invert(&a, 2).unwrap(), &[0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_invert_singular() {
        assert!(invert(&[1.0, 2.0, 2.0, 4.0], 2).is_none());
        assert!(invert(&[1.0, 2.0, 3.0], 2).is_none());
    }

    #[test]
    fn test_sherman_morrison_matches_full_inverse() {
        let dim = 3;
        let x = [0.2, 0.5, 0.9];
        let y = [1.0, 0.0, 0.3];

        let mut a = identity(dim);
        let mut a_inv = identity(dim);
        for v in [&x, &y, &x] {
            add_outer_product(&mut a, dim, v);
            sherman_morrison_update(&mut a_inv, dim, v);
        }

        assert_close(&a_inv, &invert(&a, dim).unwrap());
    }

    #[test]
    fn test_rows_round_trip() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let rows = to_rows(&a, 2);
        assert_eq!(rows, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(from_rows(&rows, 2), Some(a));
        assert_eq!(from_rows(&rows, 3), None);
    }
}
