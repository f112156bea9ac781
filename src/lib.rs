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

//! Incremental per-class object detectors and per-pixel segmenters, trained
//! from precomputed region/pixel feature embeddings without any network
//! backpropagation.
//!
//! The crate revolves around the minibootstrap loop: hard negatives are mined
//! batch by batch from a background pool too large to hold in memory, the
//! per-class kernel classifier is fully retrained on the accumulated cache,
//! and confidently-easy negatives are evicted to bound memory. A closed-form
//! ridge regressor refines boxes, and the evaluator applies the trained banks
//! to test proposals.
//!
//! # Examples
//!
//! ```
//! use nalgebra::DMatrix;
//! use onlinedet::{
//!     compute_feat_statistics, create_classifier, MinibootstrapSelector,
//!     OnlineRegionClassifier, Options, PositiveSelector,
//! };
//!
//! let opts = Options {
//!     num_classes: 2,
//!     iterations: 2,
//!     batch_size: 4,
//!     ..Options::default()
//! };
//!
//! // Feature pools come from the external feature extractor.
//! let positives = PositiveSelector::from_ground_truth(vec![DMatrix::from_row_slice(
//!     3,
//!     2,
//!     &[1.0, 1.0, 1.2, 0.9, 0.8, 1.1],
//! )])
//! .select_positives();
//! let pool = DMatrix::from_row_slice(
//!     6,
//!     2,
//!     &[-1.0, -1.0, -0.8, -1.2, -1.1, -0.9, -0.7, -1.0, -0.9, -1.3, -1.2, -0.8],
//! );
//! let negatives =
//!     MinibootstrapSelector::new(opts.iterations, opts.batch_size).select_negatives(&[pool]);
//!
//! let stats =
//!     compute_feat_statistics(&positives, &negatives, 2, opts.pos_fraction, opts.stats_seed)
//!         .unwrap();
//! let classifier = create_classifier(&opts);
//! let orc =
//!     OnlineRegionClassifier::new(classifier, positives, negatives, stats, &opts).unwrap();
//! let bank = orc.train_region_classifier().unwrap();
//! assert!(bank[0].is_some());
//! ```

mod classifier;
mod common;
mod error;
mod eval;
mod math;
mod online;
mod refiner;
mod selector;
mod stats;
pub mod model;

pub use classifier::{
    ClassifierKind, GaussianRls, KernelClassifier, LinearRls, Model, ModelBank,
};
pub use common::{BoundingBox, Coxy, Detection};
pub use error::Error;
pub use eval::{AccuracyEvaluator, SegmentationPredictions};
pub use online::{ImagePredictions, OnlineRegionClassifier, TestImage};
pub use refiner::{refine_boxes, RegionRefiner, Regressor, RegressorBank};
pub use selector::{MinibootstrapSelector, PositiveSelector};
pub use stats::{compute_feat_statistics, zscores, Stats};

/// Create the classifier backend selected by the configuration.
pub fn create_classifier(opts: &Options) -> Box<dyn KernelClassifier> {
    match opts.kind {
        ClassifierKind::GaussianRls => Box::new(GaussianRls::new(opts.sigma, opts.lam)),
        ClassifierKind::LinearRls => Box::new(LinearRls::new(opts.lam)),
    }
}

/// Pipeline configuration. Every consumer validates the options it is handed
/// at construction; invalid combinations are rejected with [`Error::Config`]
/// before any training starts.
#[derive(Clone, Debug)]
pub struct Options {
    /// Total number of classes including the implicit background class 0.
    pub num_classes: usize,
    /// Classifier backend.
    pub kind: ClassifierKind,
    /// Gaussian kernel width.
    pub sigma: f32,
    /// Classifier regularization.
    pub lam: f32,
    /// Number of minibootstrap iterations (negative batches per class).
    pub iterations: usize,
    /// Rows per negative batch.
    pub batch_size: usize,
    /// Mining threshold: negatives scoring above it are hard.
    pub neg_hard_thresh: f32,
    /// Eviction threshold: cached negatives scoring below it are easy.
    pub neg_easy_thresh: f32,
    /// Share of positives sampled per class for the feature statistics.
    pub pos_fraction: f32,
    /// Seed for the statistics sampling.
    pub stats_seed: u64,
    /// Detection score threshold, applied per class at evaluation.
    pub score_thresh: f32,
    /// IoU threshold of the per-class greedy NMS.
    pub nms_iou: f32,
    /// Global per-image detection cap; 0 disables it.
    pub detections_per_img: usize,
    /// Ridge regularization of the box regressors.
    pub refiner_lam: f32,
    /// Minimum regression samples per class; below it the class regressor is
    /// a no-op.
    pub refiner_min_samples: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            num_classes: 2,
            kind: ClassifierKind::GaussianRls,
            sigma: 5.0,
            lam: 1e-3,
            iterations: 10,
            batch_size: 2000,
            neg_hard_thresh: 0.0,
            neg_easy_thresh: -1.0,
            pos_fraction: 0.8,
            stats_seed: 1,
            score_thresh: 0.05,
            nms_iou: 0.3,
            detections_per_img: 100,
            refiner_lam: 1000.0,
            refiner_min_samples: 4,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_classes < 2 {
            return Err(Error::Config(format!(
                "num_classes must be at least 2 (background plus one class), got {}",
                self.num_classes
            )));
        }
        if !(self.sigma > 0.0) {
            return Err(Error::Config(format!("sigma must be positive, got {}", self.sigma)));
        }
        if self.lam < 0.0 {
            return Err(Error::Config(format!(
                "lam must be non-negative, got {}",
                self.lam
            )));
        }
        if self.iterations == 0 {
            return Err(Error::Config("iterations must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.neg_hard_thresh < self.neg_easy_thresh {
            // A hard threshold below the easy one would re-admit just-pruned
            // negatives on every iteration and thrash the cache.
            return Err(Error::Config(format!(
                "neg_hard_thresh ({}) must not be below neg_easy_thresh ({})",
                self.neg_hard_thresh, self.neg_easy_thresh
            )));
        }
        if !(0.0..=1.0).contains(&self.pos_fraction) {
            return Err(Error::Config(format!(
                "pos_fraction must lie in [0, 1], got {}",
                self.pos_fraction
            )));
        }
        if !(self.nms_iou > 0.0 && self.nms_iou < 1.0) {
            return Err(Error::Config(format!(
                "nms_iou must lie in (0, 1), got {}",
                self.nms_iou
            )));
        }
        if self.refiner_lam < 0.0 {
            return Err(Error::Config(format!(
                "refiner_lam must be non-negative, got {}",
                self.refiner_lam
            )));
        }
        if self.refiner_min_samples < 2 {
            return Err(Error::Config(
                "refiner_min_samples must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn test_thresh_ordering_is_enforced() {
        let opts = Options {
            neg_hard_thresh: -1.0,
            neg_easy_thresh: 0.0,
            ..Options::default()
        };
        assert!(matches!(opts.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        for opts in [
            Options {
                num_classes: 1,
                ..Options::default()
            },
            Options {
                sigma: 0.0,
                ..Options::default()
            },
            Options {
                pos_fraction: 1.5,
                ..Options::default()
            },
            Options {
                nms_iou: 1.0,
                ..Options::default()
            },
            Options {
                iterations: 0,
                ..Options::default()
            },
            Options {
                refiner_min_samples: 1,
                ..Options::default()
            },
        ] {
            assert!(opts.validate().is_err());
        }
    }
}
