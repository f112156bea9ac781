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

use std::cmp::Ordering::*;

use nalgebra::DMatrix;
use tracing::debug;

use crate::classifier::ModelBank;
use crate::common::{BoundingBox, Detection};
use crate::error::Error;
use crate::math::select_rows;
use crate::online::TestImage;
use crate::refiner::{refine_boxes, RegressorBank};
use crate::stats::{zscores, Stats};
use crate::Options;

/// Applies the trained classifier and regressor banks to test proposals:
/// normalize, score, refine, then per-class threshold, per-class NMS and a
/// global per-image detection cap.
pub struct AccuracyEvaluator {
    num_classes: usize,
    score_thresh: f32,
    nms_iou: f32,
    detections_per_img: usize,
}

impl AccuracyEvaluator {
    pub fn new(opts: &Options) -> Result<Self, Error> {
        opts.validate()?;
        Ok(AccuracyEvaluator {
            num_classes: opts.num_classes,
            score_thresh: opts.score_thresh,
            nms_iou: opts.nms_iou,
            detections_per_img: opts.detections_per_img,
        })
    }

    /// Evaluate detection on a stream of proposal sets. Per image, every
    /// class's surviving detections are gathered and, when their union exceeds
    /// `detections_per_img`, cut at the k-th-order-statistic score (ties may
    /// admit slightly more than the cap). Classes without a model contribute
    /// nothing. Detection labels are `1..num_classes - 1`; background is never
    /// emitted.
    pub fn evaluate_detection(
        &self,
        models: &ModelBank,
        regressors: &RegressorBank,
        stats: &Stats,
        images: &[TestImage],
    ) -> Result<Vec<Vec<Detection>>, Error> {
        let foreground = self.num_classes - 1;
        if models.len() != foreground || regressors.len() != foreground {
            return Err(Error::Config(format!(
                "expected {} per-class entries, got {} models and {} regressors",
                foreground,
                models.len(),
                regressors.len()
            )));
        }

        let mut results = Vec::with_capacity(images.len());
        for image in images {
            let normalized = zscores(&image.features, stats);
            let mut detections = Vec::new();

            // Class 0 is the background column and is never scored.
            for (c, model) in models.iter().enumerate() {
                let model = match model {
                    Some(model) => model,
                    None => continue,
                };
                let scores = model.predict(&normalized);
                let keep: Vec<usize> = (0..normalized.nrows())
                    .filter(|&i| scores[i] > self.score_thresh)
                    .collect();
                if keep.is_empty() {
                    continue;
                }

                // Refinement consumes the raw extractor features, matching
                // what the regressor was trained on.
                let deltas = regressors[c].predict(&select_rows(&image.features, &keep));
                let refined = refine_boxes(&select_rows(&image.boxes, &keep), &deltas);

                let class_dets: Vec<Detection> = keep
                    .iter()
                    .enumerate()
                    .map(|(row, &i)| {
                        Detection::new(
                            BoundingBox::new(
                                refined[(row, 0)],
                                refined[(row, 1)],
                                refined[(row, 2)],
                                refined[(row, 3)],
                            ),
                            scores[i],
                            c + 1,
                        )
                    })
                    .collect();
                detections.extend(non_maximum_suppression(class_dets, self.nms_iou));
            }

            let total = detections.len();
            let capped = cap_detections(detections, self.detections_per_img);
            if capped.len() < total {
                debug!(
                    "image {}: capped {} detections to {}",
                    image.name,
                    total,
                    capped.len()
                );
            }
            results.push(capped);
        }
        Ok(results)
    }

    /// Segmentation mode: normalize, score, per-class threshold. No NMS and
    /// no box refinement; refinement is a detection-only step.
    pub fn evaluate_segmentation(
        &self,
        models: &ModelBank,
        stats: &Stats,
        features: &DMatrix<f32>,
    ) -> Result<SegmentationPredictions, Error> {
        let foreground = self.num_classes - 1;
        if models.len() != foreground {
            return Err(Error::Config(format!(
                "expected {} per-class models, got {}",
                foreground,
                models.len()
            )));
        }

        let normalized = zscores(features, stats);
        let mut scores = DMatrix::from_element(normalized.nrows(), self.num_classes, -1.0);
        let mut positive = vec![Vec::new(); foreground];

        for (c, model) in models.iter().enumerate() {
            if let Some(model) = model {
                let class_scores = model.predict(&normalized);
                positive[c] = (0..class_scores.len())
                    .filter(|&i| class_scores[i] > self.score_thresh)
                    .collect();
                scores.set_column(c + 1, &class_scores);
            }
        }

        Ok(SegmentationPredictions { scores, positive })
    }
}

/// Per-pixel scoring output: a `[num_pixels, num_classes]` score matrix with
/// the background column at the `-1.0` sentinel, and the thresholded pixel
/// indices per foreground class.
pub struct SegmentationPredictions {
    scores: DMatrix<f32>,
    positive: Vec<Vec<usize>>,
}

impl SegmentationPredictions {
    pub fn scores(&self) -> &DMatrix<f32> {
        &self.scores
    }

    pub fn positive(&self, class: usize) -> &[usize] {
        &self.positive[class]
    }
}

/// Greedy per-class suppression by descending score at a fixed IoU threshold.
fn non_maximum_suppression(mut detections: Vec<Detection>, iou_thresh: f32) -> Vec<Detection> {
    detections.sort_by(|x, y| {
        let x_score = x.score();
        let y_score = y.score();
        if x_score > y_score {
            // x goes before y
            Less
        } else if x_score < y_score {
            Greater
        } else {
            Equal
        }
    });

    let mut merged = vec![false; detections.len()];
    let mut keep = Vec::new();
    for i in 0..detections.len() {
        if merged[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if !merged[j] && detections[i].bbox().iou(detections[j].bbox()) > iou_thresh {
                merged[j] = true;
            }
        }
        keep.push(detections[i].clone());
    }
    keep
}

/// Keep the `cap` best detections globally, via the score value at rank
/// `total - cap + 1`: every detection at or above that value survives, so ties
/// may admit slightly more than the cap. `cap == 0` disables the limit.
fn cap_detections(detections: Vec<Detection>, cap: usize) -> Vec<Detection> {
    if cap == 0 || detections.len() <= cap {
        return detections;
    }

    let mut scores: Vec<f32> = detections.iter().map(|d| d.score()).collect();
    scores.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Equal));
    let image_thresh = scores[detections.len() - cap];

    detections
        .into_iter()
        .filter(|d| d.score() >= image_thresh)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Model;
    use crate::refiner::Regressor;
    use nalgebra::{DVector, RowDVector};

    fn det(x: f32, score: f32, label: usize) -> Detection {
        Detection::new(BoundingBox::new(x, 0.0, x + 10.0, 10.0), score, label)
    }

    fn identity_stats(d: usize) -> Stats {
        Stats::new(RowDVector::zeros(d), RowDVector::zeros(d), 1.0)
    }

    /// Model scoring each row by its first feature component.
    fn first_component_model(d: usize) -> Model {
        let mut weights = DVector::zeros(d);
        weights[0] = 1.0;
        Model::Linear { weights, bias: 0.0 }
    }

    fn evaluator(num_classes: usize, cap: usize) -> AccuracyEvaluator {
        let opts = Options {
            num_classes,
            score_thresh: 0.1,
            nms_iou: 0.3,
            detections_per_img: cap,
            ..Options::default()
        };
        AccuracyEvaluator::new(&opts).unwrap()
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let dets = vec![det(0.0, 0.9, 1), det(1.0, 0.8, 1), det(50.0, 0.5, 1)];
        let keep = non_maximum_suppression(dets, 0.3);
        assert_eq!(2, keep.len());
        assert_eq!(0.9, keep[0].score());
        assert_eq!(0.5, keep[1].score());
    }

    #[test]
    fn test_nms_keeps_order_by_score() {
        let dets = vec![det(100.0, 0.2, 1), det(0.0, 0.7, 1)];
        let keep = non_maximum_suppression(dets, 0.3);
        assert_eq!(0.7, keep[0].score());
        assert_eq!(0.2, keep[1].score());
    }

    #[test]
    fn test_cap_keeps_top_scores_globally() {
        // 10 detections across 3 classes, cap 5: exactly the 5 best survive.
        let mut dets = Vec::new();
        for (i, score) in [0.9, 0.1, 0.8, 0.2, 0.7, 0.3, 0.6, 0.4, 0.55, 0.05]
            .iter()
            .enumerate()
        {
            dets.push(det(i as f32 * 100.0, *score, i % 3 + 1));
        }
        let capped = cap_detections(dets, 5);
        assert_eq!(5, capped.len());
        assert!(capped.iter().all(|d| d.score() >= 0.55));
    }

    #[test]
    fn test_cap_ties_may_exceed_cap() {
        let dets = vec![
            det(0.0, 0.5, 1),
            det(100.0, 0.5, 1),
            det(200.0, 0.5, 2),
            det(300.0, 0.9, 2),
        ];
        let capped = cap_detections(dets, 2);
        // The rank-3 value is 0.5; all three tied detections stay.
        assert_eq!(4, capped.len());
    }

    #[test]
    fn test_cap_disabled() {
        let dets: Vec<Detection> = (0..8).map(|i| det(i as f32 * 100.0, 0.5, 1)).collect();
        assert_eq!(8, cap_detections(dets, 0).len());
    }

    #[test]
    fn test_evaluate_detection_thresholds_and_labels() {
        let models = vec![Some(first_component_model(2)), None];
        let regressors = vec![Regressor::no_op(), Regressor::no_op()];
        let images = vec![TestImage::new(
            "img".to_string(),
            DMatrix::from_row_slice(3, 4, &[
                0.0, 0.0, 10.0, 10.0, //
                100.0, 0.0, 110.0, 10.0, //
                200.0, 0.0, 210.0, 10.0,
            ]),
            DMatrix::from_row_slice(3, 2, &[0.9, 0.0, 0.05, 0.0, 0.4, 0.0]),
        )];

        let results = evaluator(3, 0)
            .evaluate_detection(&models, &regressors, &identity_stats(2), &images)
            .unwrap();

        assert_eq!(1, results.len());
        let dets = &results[0];
        // Row 1 is below the 0.1 score threshold; the None class is silent.
        assert_eq!(2, dets.len());
        assert!(dets.iter().all(|d| d.label() == 1));
        // No-op regressor: boxes come through unrefined.
        assert_eq!(0.9, dets[0].score());
        assert_eq!(0.0, dets[0].bbox().x1());
        assert_eq!(200.0, dets[1].bbox().x1());
    }

    #[test]
    fn test_evaluate_detection_bank_size_mismatch() {
        let models = vec![Some(first_component_model(2))];
        let regressors = vec![Regressor::no_op(), Regressor::no_op()];
        let result = evaluator(3, 0).evaluate_detection(
            &models,
            &regressors,
            &identity_stats(2),
            &[],
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_evaluate_segmentation() {
        let models = vec![Some(first_component_model(2)), None];
        let features =
            DMatrix::from_row_slice(4, 2, &[0.9, 0.0, 0.05, 0.0, 0.4, 0.0, -0.2, 0.0]);

        let predictions = evaluator(3, 0)
            .evaluate_segmentation(&models, &identity_stats(2), &features)
            .unwrap();

        assert_eq!((4, 3), predictions.scores().shape());
        // Background column stays at the sentinel.
        assert!((0..4).all(|i| predictions.scores()[(i, 0)] == -1.0));
        // Pixels 0 and 2 clear the threshold for class 0.
        assert_eq!(&[0, 2], predictions.positive(0));
        assert!(predictions.positive(1).is_empty());
        // The modelless class keeps its sentinel column.
        assert!((0..4).all(|i| predictions.scores()[(i, 2)] == -1.0));
    }
}
