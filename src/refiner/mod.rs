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

use nalgebra::{DMatrix, RowDVector, SymmetricEigen};
use tracing::{debug, info, warn};

use crate::common::Coxy;
use crate::error::Error;
use crate::math::{col_means, select_rows};
use crate::Options;

const NUM_COORDS: usize = 4;
const COV_EPS: f32 = 1e-6;

/// Per-class box-delta regressor. `beta` is the `(d + 1) x 4` ridge solution
/// on bias-augmented features, fit against whitened targets; `t_inv` and `mu`
/// reverse the whitening at prediction time. `beta = None` makes the regressor
/// a no-op.
#[derive(Clone, Debug)]
pub struct Regressor {
    beta: Option<DMatrix<f32>>,
    t_inv: DMatrix<f32>,
    mu: RowDVector<f32>,
}

impl Regressor {
    pub fn new(beta: Option<DMatrix<f32>>, t_inv: DMatrix<f32>, mu: RowDVector<f32>) -> Self {
        Regressor { beta, t_inv, mu }
    }

    pub fn no_op() -> Self {
        Regressor {
            beta: None,
            t_inv: DMatrix::identity(NUM_COORDS, NUM_COORDS),
            mu: RowDVector::zeros(NUM_COORDS),
        }
    }

    pub fn beta(&self) -> Option<&DMatrix<f32>> {
        self.beta.as_ref()
    }

    pub fn t_inv(&self) -> &DMatrix<f32> {
        &self.t_inv
    }

    pub fn mu(&self) -> &RowDVector<f32> {
        &self.mu
    }

    /// Predict `n x 4` box deltas for the given feature rows. Always returns
    /// 4 coordinates per row; a no-op regressor returns zero deltas, so
    /// downstream consumers never branch on missing regressors.
    pub fn predict(&self, features: &DMatrix<f32>) -> DMatrix<f32> {
        let beta = match &self.beta {
            Some(beta) => beta,
            None => return DMatrix::zeros(features.nrows(), NUM_COORDS),
        };

        let d = beta.nrows() - 1;
        let weights = beta.rows(0, d);
        let bias = beta.row(d);

        let mut white = features * weights;
        for mut row in white.row_iter_mut() {
            row += bias;
        }

        let mut raw = white * &self.t_inv;
        for mut row in raw.row_iter_mut() {
            row += &self.mu;
        }
        raw
    }
}

pub type RegressorBank = Vec<Regressor>;

/// Fits the per-class closed-form regularized least-squares box regressors.
pub struct RegionRefiner {
    num_classes: usize,
    lam: f32,
    min_samples: usize,
}

impl RegionRefiner {
    pub fn new(opts: &Options) -> Result<Self, Error> {
        opts.validate()?;
        Ok(RegionRefiner {
            num_classes: opts.num_classes,
            lam: opts.refiner_lam,
            min_samples: opts.refiner_min_samples,
        })
    }

    /// Train one regressor per foreground class, consuming the regression set.
    /// Classes with fewer than `min_samples` rows, and classes whose normal
    /// equations cannot be solved, degrade to a no-op regressor.
    pub fn train_region_refiner(&self, coxy: Coxy) -> Result<RegressorBank, Error> {
        if coxy.x.nrows() != coxy.len()
            || coxy.y.nrows() != coxy.len()
            || coxy.o.nrows() != coxy.len()
        {
            return Err(Error::Config(format!(
                "misaligned COXY: {} classes, {} features, {} targets, {} boxes",
                coxy.len(),
                coxy.x.nrows(),
                coxy.y.nrows(),
                coxy.o.nrows()
            )));
        }

        info!(
            "training region refiner on {} samples, {} classes",
            coxy.len(),
            self.num_classes - 1
        );

        let bank = (0..self.num_classes - 1)
            .map(|class| {
                let idx: Vec<usize> = coxy
                    .c
                    .iter()
                    .enumerate()
                    .filter(|(_, &c)| c == class)
                    .map(|(i, _)| i)
                    .collect();
                if idx.len() < self.min_samples {
                    debug!(
                        "class {}: {} regression samples, below the minimum of {}",
                        class,
                        idx.len(),
                        self.min_samples
                    );
                    return Regressor::no_op();
                }

                let x = select_rows(&coxy.x, &idx);
                let y = select_rows(&coxy.y, &idx);
                match self.fit_class(&x, &y) {
                    Ok(regressor) => regressor,
                    Err(err) => {
                        warn!("class {}: refiner degraded to no-op: {}", class, err);
                        Regressor::no_op()
                    }
                }
            })
            .collect();

        Ok(bank)
    }

    fn fit_class(&self, x: &DMatrix<f32>, y: &DMatrix<f32>) -> Result<Regressor, Error> {
        let n = x.nrows();
        let d = x.ncols();

        // Whiten the targets; prediction reverses this transform.
        let mu = col_means(y);
        let mut centered = y.clone();
        for mut row in centered.row_iter_mut() {
            row -= &mu;
        }
        let mut cov = centered.transpose() * &centered / (n as f32 - 1.0);
        for i in 0..NUM_COORDS {
            cov[(i, i)] += COV_EPS;
        }
        let eig = SymmetricEigen::new(cov);
        let sqrt_vals = eig.eigenvalues.map(|v| v.max(COV_EPS).sqrt());
        let t = &eig.eigenvectors
            * DMatrix::from_diagonal(&sqrt_vals.map(|v| 1.0 / v))
            * eig.eigenvectors.transpose();
        let t_inv = &eig.eigenvectors
            * DMatrix::from_diagonal(&sqrt_vals)
            * eig.eigenvectors.transpose();
        let y_white = centered * t;

        // Ridge normal equations on bias-augmented features, one shared
        // factorization for the 4 coordinates.
        let mut aug = DMatrix::from_element(n, d + 1, 1.0);
        aug.columns_mut(0, d).copy_from(x);
        let mut gram = aug.transpose() * &aug;
        for i in 0..d + 1 {
            gram[(i, i)] += self.lam;
        }
        let rhs = aug.transpose() * y_white;
        let chol = gram.cholesky().ok_or_else(|| {
            Error::Solver(format!(
                "ill-conditioned refiner system ({} samples, {} features)",
                n, d
            ))
        })?;
        let beta = chol.solve(&rhs);

        Ok(Regressor::new(Some(beta), t_inv, mu))
    }
}

/// Decode predicted deltas `(dx, dy, dw, dh)` against their proposal boxes:
/// center offsets are scaled by the box size, sizes by the exponentiated
/// log-space deltas.
pub fn refine_boxes(boxes: &DMatrix<f32>, deltas: &DMatrix<f32>) -> DMatrix<f32> {
    assert_eq!(boxes.nrows(), deltas.nrows());

    let mut refined = DMatrix::zeros(boxes.nrows(), NUM_COORDS);
    for i in 0..boxes.nrows() {
        let (x1, y1, x2, y2) = (boxes[(i, 0)], boxes[(i, 1)], boxes[(i, 2)], boxes[(i, 3)]);
        let w = x2 - x1;
        let h = y2 - y1;
        let ctr_x = x1 + 0.5 * w;
        let ctr_y = y1 + 0.5 * h;

        let pred_ctr_x = deltas[(i, 0)] * w + ctr_x;
        let pred_ctr_y = deltas[(i, 1)] * h + ctr_y;
        let pred_w = deltas[(i, 2)].exp() * w;
        let pred_h = deltas[(i, 3)].exp() * h;

        refined[(i, 0)] = pred_ctr_x - 0.5 * pred_w;
        refined[(i, 1)] = pred_ctr_y - 0.5 * pred_h;
        refined[(i, 2)] = pred_ctr_x + 0.5 * pred_w;
        refined[(i, 3)] = pred_ctr_y + 0.5 * pred_h;
    }
    refined
}
