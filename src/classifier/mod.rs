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

mod gaussian_rls;
mod linear_rls;

pub use self::gaussian_rls::GaussianRls;
pub use self::linear_rls::LinearRls;

use nalgebra::{DMatrix, DVector};

use crate::error::Error;

/// Available classifier backends, selected by configuration.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ClassifierKind {
    GaussianRls,
    LinearRls,
}

impl ClassifierKind {
    #[inline]
    pub fn from(id: i32) -> Option<Self> {
        match id {
            1 => Some(ClassifierKind::GaussianRls),
            2 => Some(ClassifierKind::LinearRls),
            _ => None,
        }
    }

    #[inline]
    pub fn id(&self) -> i32 {
        match self {
            ClassifierKind::GaussianRls => 1,
            ClassifierKind::LinearRls => 2,
        }
    }
}

/// A trained per-class scoring model. Entries of a [`ModelBank`] are `None`
/// for classes that could not be trained ("always background").
#[derive(Clone, Debug)]
pub enum Model {
    /// Gaussian-kernel RLS: keeps the training rows as kernel centers.
    Gaussian {
        centers: DMatrix<f32>,
        alpha: DVector<f32>,
        sigma: f32,
    },
    /// Linear ridge model in feature space.
    Linear { weights: DVector<f32>, bias: f32 },
}

impl Model {
    /// One score per row of `x`; higher means more foreground-confident.
    pub fn predict(&self, x: &DMatrix<f32>) -> DVector<f32> {
        match self {
            Model::Gaussian {
                centers,
                alpha,
                sigma,
            } => gaussian_rls::predict(centers, alpha, *sigma, x),
            Model::Linear { weights, bias } => {
                let mut scores = x * weights;
                scores.add_scalar_mut(*bias);
                scores
            }
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Model::Gaussian { .. } => ClassifierKind::GaussianRls,
            Model::Linear { .. } => ClassifierKind::LinearRls,
        }
    }
}

/// Per-class collection of trained models, indexed by foreground class.
pub type ModelBank = Vec<Option<Model>>;

/// The kernel classifier contract: a full retrain from the entire argument
/// set, and batch prediction. `y` holds `+1`/`-1` labels parallel to the rows
/// of `x`. Implementations must never be handed a `None` bank entry; callers
/// substitute the background sentinel score instead.
pub trait KernelClassifier: Send + Sync {
    fn train(&self, x: &DMatrix<f32>, y: &DVector<f32>) -> Result<Model, Error>;

    fn predict(&self, model: &Model, x: &DMatrix<f32>) -> DVector<f32> {
        model.predict(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [ClassifierKind::GaussianRls, ClassifierKind::LinearRls] {
            assert_eq!(Some(kind), ClassifierKind::from(kind.id()));
        }
        assert_eq!(None, ClassifierKind::from(0));
        assert_eq!(None, ClassifierKind::from(42));
    }

    #[test]
    fn test_linear_model_predict() {
        let model = Model::Linear {
            weights: DVector::from_vec(vec![2.0, 0.0]),
            bias: -1.0,
        };
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 5.0, 0.0, 5.0]);
        let scores = model.predict(&x);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!((scores[1] + 1.0).abs() < 1e-6);
    }
}
