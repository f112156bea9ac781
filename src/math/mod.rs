// This file is part of an open-source Rust port of the on-line object detection
// pipeline developed for the iCub humanoid robot, implementing the incremental
// learning method described in the following paper:
//
//      Speeding-up object detection training for robotics with FALKON,
//      Elisa Maiettini, Giulia Pasquale, Lorenzo Rosasco, Lorenzo Natale.
//      In IROS 2018.
//
// You can redistribute these sources and/or modify them under the terms of the
// BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use nalgebra::{DMatrix, DVector, RowDVector};

/// Stack two row-major feature matrices vertically. Either side may have zero
/// rows; column counts must agree when both are non-empty.
pub fn vstack(top: &DMatrix<f32>, bottom: &DMatrix<f32>) -> DMatrix<f32> {
    if top.nrows() == 0 {
        return bottom.clone();
    }
    if bottom.nrows() == 0 {
        return top.clone();
    }
    assert_eq!(
        top.ncols(),
        bottom.ncols(),
        "cannot stack matrices with {} and {} columns",
        top.ncols(),
        bottom.ncols()
    );

    let mut out = DMatrix::zeros(top.nrows() + bottom.nrows(), top.ncols());
    out.rows_mut(0, top.nrows()).copy_from(top);
    out.rows_mut(top.nrows(), bottom.nrows()).copy_from(bottom);
    out
}

/// Gather the given rows of `m` into a new matrix, preserving order.
pub fn select_rows(m: &DMatrix<f32>, indices: &[usize]) -> DMatrix<f32> {
    DMatrix::from_fn(indices.len(), m.ncols(), |r, c| m[(indices[r], c)])
}

/// Per-column means of a non-empty matrix.
pub fn col_means(m: &DMatrix<f32>) -> RowDVector<f32> {
    let n = m.nrows() as f32;
    let mut means = RowDVector::zeros(m.ncols());
    for row in m.row_iter() {
        means += row;
    }
    means / n
}

/// Per-column sample standard deviations. Falls back to 0 for a single row.
pub fn col_stds(m: &DMatrix<f32>, means: &RowDVector<f32>) -> RowDVector<f32> {
    if m.nrows() < 2 {
        return RowDVector::zeros(m.ncols());
    }
    let mut acc = RowDVector::zeros(m.ncols());
    for row in m.row_iter() {
        let centered = row - means;
        acc += centered.component_mul(&centered);
    }
    (acc / (m.nrows() as f32 - 1.0)).map(f32::sqrt)
}

/// Squared Euclidean distances between every row of `a` and every row of `b`,
/// as an `a.nrows() x b.nrows()` matrix.
pub fn pairwise_sq_dists(a: &DMatrix<f32>, b: &DMatrix<f32>) -> DMatrix<f32> {
    let a_sq: DVector<f32> = DVector::from_fn(a.nrows(), |i, _| a.row(i).norm_squared());
    let b_sq: DVector<f32> = DVector::from_fn(b.nrows(), |i, _| b.row(i).norm_squared());
    let cross = a * b.transpose();

    DMatrix::from_fn(a.nrows(), b.nrows(), |i, j| {
        // ||x - y||^2 = ||x||^2 + ||y||^2 - 2 x.y, clamped against rounding
        (a_sq[i] + b_sq[j] - 2.0 * cross[(i, j)]).max(0.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vstack() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = DMatrix::from_row_slice(1, 2, &[5.0, 6.0]);
        let out = vstack(&a, &b);
        assert_eq!(3, out.nrows());
        assert_eq!(5.0, out[(2, 0)]);
        assert_eq!(4.0, out[(1, 1)]);
    }

    #[test]
    fn test_vstack_empty() {
        let a = DMatrix::zeros(0, 2);
        let b = DMatrix::from_row_slice(1, 2, &[5.0, 6.0]);
        assert_eq!(1, vstack(&a, &b).nrows());
        assert_eq!(1, vstack(&b, &a).nrows());
    }

    #[test]
    fn test_select_rows() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = select_rows(&m, &[2, 0]);
        assert_eq!(2, out.nrows());
        assert_eq!(5.0, out[(0, 0)]);
        assert_eq!(2.0, out[(1, 1)]);
    }

    #[test]
    fn test_col_means_and_stds() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        let means = col_means(&m);
        assert!((means[0] - 2.0).abs() < 1e-6);
        assert!((means[1] - 20.0).abs() < 1e-6);

        let stds = col_stds(&m, &means);
        assert!((stds[0] - 1.0).abs() < 1e-6);
        assert!((stds[1] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_pairwise_sq_dists() {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        let b = DMatrix::from_row_slice(1, 2, &[3.0, 4.0]);
        let d = pairwise_sq_dists(&a, &b);
        assert!((d[(0, 0)] - 25.0).abs() < 1e-4);
        assert!((d[(1, 0)] - 13.0).abs() < 1e-4);
    }
}
