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

use nalgebra::{DMatrix, DVector};

use super::{KernelClassifier, Model};
use crate::error::Error;
use crate::math::col_means;

/// Ridge regression on the raw features, with a bias handled by centering:
/// `(Xc^T Xc + lam * I) w = Xc^T yc`. Cheaper than the kernel backend and
/// independent of the training-set size at prediction time.
pub struct LinearRls {
    lam: f32,
}

impl LinearRls {
    /// # Panics
    ///
    /// Panics if `lam` is negative.
    pub fn new(lam: f32) -> Self {
        if lam < 0.0 {
            panic!("Illegal lambda: {}", lam);
        }
        LinearRls { lam }
    }

    pub fn lam(&self) -> f32 {
        self.lam
    }
}

impl KernelClassifier for LinearRls {
    fn train(&self, x: &DMatrix<f32>, y: &DVector<f32>) -> Result<Model, Error> {
        let n = x.nrows();
        if n == 0 {
            return Err(Error::Solver("empty training set".to_string()));
        }
        if y.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: y.len(),
            });
        }

        let d = x.ncols();
        let x_mean = col_means(x);
        let y_mean = y.mean();

        let mut centered = x.clone();
        for mut row in centered.row_iter_mut() {
            row -= &x_mean;
        }
        let yc = y.add_scalar(-y_mean);

        let mut gram = centered.transpose() * &centered;
        for i in 0..d {
            gram[(i, i)] += self.lam;
        }
        let rhs = centered.transpose() * yc;

        let chol = gram.cholesky().ok_or_else(|| {
            Error::Solver(format!(
                "ill-conditioned normal equations ({} features, lambda {})",
                d, self.lam
            ))
        })?;
        let weights = chol.solve(&rhs);
        let bias = y_mean - (x_mean * &weights)[0];

        Ok(Model::Linear { weights, bias })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separates_line() {
        // Labels follow the sign of the first feature.
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 3.0, 2.0, 3.0, -1.0, 3.0, -2.0, 3.0]);
        let y = DVector::from_vec(vec![1.0, 1.0, -1.0, -1.0]);
        let clf = LinearRls::new(1e-4);

        let model = clf.train(&x, &y).unwrap();
        let scores = clf.predict(&model, &x);
        assert!(scores[0] > 0.0);
        assert!(scores[1] > 0.0);
        assert!(scores[2] < 0.0);
        assert!(scores[3] < 0.0);
    }

    #[test]
    fn test_constant_feature_is_absorbed_by_bias() {
        let x = DMatrix::from_row_slice(3, 1, &[2.0, 2.0, 2.0]);
        let y = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let clf = LinearRls::new(1e-2);

        let model = clf.train(&x, &y).unwrap();
        let scores = clf.predict(&model, &x);
        for i in 0..3 {
            assert!((scores[i] - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_deterministic() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.5, 2.0, 1.5, -1.0, 0.2, -2.0, 0.9]);
        let y = DVector::from_vec(vec![1.0, 1.0, -1.0, -1.0]);
        let clf = LinearRls::new(0.1);

        let a = clf.train(&x, &y).unwrap();
        let b = clf.train(&x, &y).unwrap();
        match (a, b) {
            (
                Model::Linear {
                    weights: wa,
                    bias: ba,
                },
                Model::Linear {
                    weights: wb,
                    bias: bb,
                },
            ) => {
                assert_eq!(wa, wb);
                assert_eq!(ba, bb);
            }
            _ => panic!("unexpected model kind"),
        }
    }
}
