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
use crate::math::pairwise_sq_dists;

/// Gaussian-kernel regularized least squares. Training solves
/// `(K + lam * n * I) alpha = y` on the full argument set; the model keeps the
/// training rows as kernel centers.
pub struct GaussianRls {
    sigma: f32,
    lam: f32,
}

impl GaussianRls {
    /// # Panics
    ///
    /// Panics if `sigma` is not strictly positive or `lam` is negative.
    pub fn new(sigma: f32, lam: f32) -> Self {
        if sigma <= 0.0 {
            panic!("Illegal sigma: {}", sigma);
        }
        if lam < 0.0 {
            panic!("Illegal lambda: {}", lam);
        }
        GaussianRls { sigma, lam }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    pub fn lam(&self) -> f32 {
        self.lam
    }
}

impl KernelClassifier for GaussianRls {
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

        let mut k = kernel_matrix(x, x, self.sigma);
        let ridge = self.lam * n as f32;
        for i in 0..n {
            k[(i, i)] += ridge;
        }

        let chol = k.cholesky().ok_or_else(|| {
            Error::Solver(format!(
                "ill-conditioned kernel system ({} centers, sigma {}, lambda {})",
                n, self.sigma, self.lam
            ))
        })?;
        let alpha = chol.solve(y);

        Ok(Model::Gaussian {
            centers: x.clone(),
            alpha,
            sigma: self.sigma,
        })
    }
}

pub(super) fn predict(
    centers: &DMatrix<f32>,
    alpha: &DVector<f32>,
    sigma: f32,
    x: &DMatrix<f32>,
) -> DVector<f32> {
    kernel_matrix(x, centers, sigma) * alpha
}

fn kernel_matrix(a: &DMatrix<f32>, b: &DMatrix<f32>, sigma: f32) -> DMatrix<f32> {
    let gamma = 1.0 / (2.0 * sigma * sigma);
    pairwise_sq_dists(a, b).map(|d| (-d * gamma).exp())
}
