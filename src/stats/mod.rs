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

use nalgebra::{DMatrix, RowDVector};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use tracing::warn;

use crate::error::Error;
use crate::math::{col_means, col_stds, select_rows, vstack};

/// Feature normalization parameters, computed once per run from a sampled
/// subset of the training features and frozen afterwards. The same transform
/// is applied to every feature the pipeline normalizes, at training and at
/// test time.
#[derive(Clone, Debug)]
pub struct Stats {
    mean: RowDVector<f32>,
    std: RowDVector<f32>,
    mean_norm: f32,
}

impl Stats {
    pub fn new(mean: RowDVector<f32>, std: RowDVector<f32>, mean_norm: f32) -> Self {
        Stats {
            mean,
            std,
            mean_norm,
        }
    }

    pub fn mean(&self) -> &RowDVector<f32> {
        &self.mean
    }

    pub fn std(&self) -> &RowDVector<f32> {
        &self.std
    }

    pub fn mean_norm(&self) -> f32 {
        self.mean_norm
    }

    pub fn features_dim(&self) -> usize {
        self.mean.len()
    }
}

/// Compute normalization statistics from a sample of the positive and negative
/// feature pools.
///
/// Per class, a `pos_fraction` share of the positive rows is drawn (seeded, so
/// repeated runs are identical) together with an equally sized sample from the
/// class's negative shards. Classes with no positives or no negatives are
/// excluded from the sample without failing. The pooled sample yields the
/// per-dimension mean and standard deviation, and `mean_norm`, the average L2
/// norm of the mean-centered sample rows.
pub fn compute_feat_statistics(
    positives: &[DMatrix<f32>],
    negatives: &[Vec<DMatrix<f32>>],
    features_dim: usize,
    pos_fraction: f32,
    seed: u64,
) -> Result<Stats, Error> {
    if !(0.0..=1.0).contains(&pos_fraction) {
        return Err(Error::Config(format!(
            "pos_fraction must lie in [0, 1], got {}",
            pos_fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut sample = DMatrix::zeros(0, features_dim);

    for (class, pos) in positives.iter().enumerate() {
        let shards = match negatives.get(class) {
            Some(shards) => shards,
            None => continue,
        };
        let neg_rows: usize = shards.iter().map(|s| s.nrows()).sum();
        if pos.nrows() == 0 || neg_rows == 0 {
            continue;
        }
        check_dim(pos, features_dim)?;

        let take = ((pos_fraction * pos.nrows() as f32).ceil() as usize).max(1);
        let take = take.min(pos.nrows());

        let mut idx: Vec<usize> = index::sample(&mut rng, pos.nrows(), take).into_vec();
        idx.sort_unstable();
        sample = vstack(&sample, &select_rows(pos, &idx));

        // Matching amount of negatives, walking the shards in mining order.
        let mut quota = take;
        for shard in shards {
            if quota == 0 {
                break;
            }
            if shard.nrows() == 0 {
                continue;
            }
            check_dim(shard, features_dim)?;
            let from_shard = quota.min(shard.nrows());
            let mut idx: Vec<usize> =
                index::sample(&mut rng, shard.nrows(), from_shard).into_vec();
            idx.sort_unstable();
            sample = vstack(&sample, &select_rows(shard, &idx));
            quota -= from_shard;
        }
    }

    if sample.nrows() == 0 {
        return Err(Error::Statistics(
            "no class has both positive and negative features".to_string(),
        ));
    }

    let mean = col_means(&sample);
    let std = col_stds(&sample, &mean);

    let mut norm_acc = 0.0f32;
    for row in sample.row_iter() {
        norm_acc += (row - &mean).norm();
    }
    let mut mean_norm = norm_acc / sample.nrows() as f32;
    if mean_norm == 0.0 {
        warn!("degenerate feature sample: mean norm is zero, rescaling disabled");
        mean_norm = 1.0;
    }

    Ok(Stats::new(mean, std, mean_norm))
}

/// Apply z-score-style normalization: center by the sampled mean and rescale
/// by the sampled norm. Not a projection; applying it twice keeps shifting
/// values for any stats with a nonzero mean.
pub fn zscores(x: &DMatrix<f32>, stats: &Stats) -> DMatrix<f32> {
    let inv = 1.0 / stats.mean_norm();
    let mean = stats.mean();
    DMatrix::from_fn(x.nrows(), x.ncols(), |r, c| (x[(r, c)] - mean[c]) * inv)
}

fn check_dim(m: &DMatrix<f32>, features_dim: usize) -> Result<(), Error> {
    if m.ncols() != features_dim {
        return Err(Error::DimensionMismatch {
            expected: features_dim,
            actual: m.ncols(),
        });
    }
    Ok(())
}
