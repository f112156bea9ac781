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

use nalgebra::DMatrix;
use tracing::debug;

use crate::common::Coxy;
use crate::math::select_rows;

/// Partitions each class's negative pool into the ordered mining batches
/// consumed by the minibootstrap loop. Partitioning only; no scoring happens
/// here.
pub struct MinibootstrapSelector {
    iterations: usize,
    batch_size: usize,
}

impl MinibootstrapSelector {
    /// # Panics
    ///
    /// Panics if `iterations` or `batch_size` is zero.
    pub fn new(iterations: usize, batch_size: usize) -> Self {
        if iterations == 0 {
            panic!("Illegal number of iterations: {}", iterations);
        }
        if batch_size == 0 {
            panic!("Illegal batch size: {}", batch_size);
        }
        MinibootstrapSelector {
            iterations,
            batch_size,
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Split each class's pool into at most `iterations` batches of at most
    /// `batch_size` rows, preserving the pool's row order. Rows beyond the
    /// `iterations * batch_size` mining budget are left unmined. A class with
    /// an empty pool yields an empty batch sequence.
    pub fn select_negatives(&self, pools: &[DMatrix<f32>]) -> Vec<Vec<DMatrix<f32>>> {
        pools
            .iter()
            .enumerate()
            .map(|(class, pool)| {
                let batches = self.split_pool(pool);
                let used: usize = batches.iter().map(|b| b.nrows()).sum();
                if used < pool.nrows() {
                    debug!(
                        "class {}: {} of {} negatives beyond the mining budget",
                        class,
                        pool.nrows() - used,
                        pool.nrows()
                    );
                }
                batches
            })
            .collect()
    }

    fn split_pool(&self, pool: &DMatrix<f32>) -> Vec<DMatrix<f32>> {
        let mut batches = Vec::new();
        for i in 0..self.iterations {
            let start = i * self.batch_size;
            if start >= pool.nrows() {
                break;
            }
            let len = self.batch_size.min(pool.nrows() - start);
            batches.push(pool.rows(start, len).into_owned());
        }
        batches
    }
}

/// Supplies the fixed per-class positive feature sets: either ground-truth
/// features handed in directly, or positives recovered from the
/// box-regression training set.
pub struct PositiveSelector {
    sets: Vec<DMatrix<f32>>,
}

impl PositiveSelector {
    /// Ground-truth-only positives, one feature matrix per foreground class.
    pub fn from_ground_truth(sets: Vec<DMatrix<f32>>) -> Self {
        PositiveSelector { sets }
    }

    /// Recover proposal-derived positives from a COXY regression set by
    /// grouping its feature rows per class.
    pub fn from_coxy(coxy: &Coxy, num_classes: usize) -> Self {
        let sets = (0..num_classes.saturating_sub(1))
            .map(|class| {
                let idx: Vec<usize> = coxy
                    .c
                    .iter()
                    .enumerate()
                    .filter(|(_, &c)| c == class)
                    .map(|(i, _)| i)
                    .collect();
                select_rows(&coxy.x, &idx)
            })
            .collect();
        PositiveSelector { sets }
    }

    pub fn select_positives(self) -> Vec<DMatrix<f32>> {
        self.sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(rows: usize) -> DMatrix<f32> {
        DMatrix::from_fn(rows, 3, |r, c| (r * 3 + c) as f32)
    }

    #[test]
    fn test_split_even() {
        let selector = MinibootstrapSelector::new(3, 4);
        let batches = selector.select_negatives(&[pool(12)]);
        assert_eq!(1, batches.len());
        assert_eq!(vec![4, 4, 4], batches[0].iter().map(|b| b.nrows()).collect::<Vec<_>>());
        // Order is preserved: batch 1 starts at row 4.
        assert_eq!(12.0, batches[0][1][(0, 0)]);
    }

    #[test]
    fn test_split_remainder() {
        let selector = MinibootstrapSelector::new(4, 4);
        let batches = selector.select_negatives(&[pool(10)]);
        assert_eq!(vec![4, 4, 2], batches[0].iter().map(|b| b.nrows()).collect::<Vec<_>>());
    }

    #[test]
    fn test_budget_caps_batches() {
        let selector = MinibootstrapSelector::new(2, 4);
        let batches = selector.select_negatives(&[pool(100)]);
        assert_eq!(2, batches[0].len());
        assert!(batches[0].iter().all(|b| b.nrows() == 4));
    }

    #[test]
    fn test_empty_pool() {
        let selector = MinibootstrapSelector::new(3, 4);
        let batches = selector.select_negatives(&[DMatrix::zeros(0, 3)]);
        assert!(batches[0].is_empty());
    }

    #[test]
    #[should_panic(expected = "Illegal batch size")]
    fn test_zero_batch_size_panics() {
        MinibootstrapSelector::new(3, 0);
    }

    #[test]
    fn test_positives_from_coxy() {
        let coxy = Coxy {
            c: vec![0, 1, 0],
            o: DMatrix::zeros(3, 4),
            x: DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]),
            y: DMatrix::zeros(3, 4),
        };
        let sets = PositiveSelector::from_coxy(&coxy, 3).select_positives();
        assert_eq!(2, sets.len());
        assert_eq!(2, sets[0].nrows());
        assert_eq!(3.0, sets[0][(1, 0)]);
        assert_eq!(1, sets[1].nrows());
    }
}
