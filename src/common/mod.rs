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

/// Axis-aligned box in `(x1, y1, x2, y2)` corner coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BoundingBox { x1, y1, x2, y2 }
    }

    pub fn x1(&self) -> f32 {
        self.x1
    }

    pub fn y1(&self) -> f32 {
        self.y1
    }

    pub fn x2(&self) -> f32 {
        self.x2
    }

    pub fn y2(&self) -> f32 {
        self.y2
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box. Degenerate boxes yield 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersect = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if intersect == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - intersect;
        intersect / union
    }
}

/// One scored detection: a box, its confidence and its (non-background) class.
#[derive(Clone, Debug)]
pub struct Detection {
    bbox: BoundingBox,
    score: f32,
    label: usize,
}

impl Detection {
    pub fn new(bbox: BoundingBox, score: f32, label: usize) -> Self {
        Detection { bbox, score, label }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn label(&self) -> usize {
        self.label
    }
}

/// Box-regression training set: class ids, original boxes, features and
/// regression targets, row-aligned. Consumed once by the region refiner.
///
/// Class ids are zero-based foreground indices (`0..num_classes - 2`); the
/// background class never appears here.
pub struct Coxy {
    pub c: Vec<usize>,
    pub o: DMatrix<f32>,
    pub x: DMatrix<f32>,
    pub y: DMatrix<f32>,
}

impl Coxy {
    /// Number of row-aligned samples.
    pub fn len(&self) -> usize {
        self.c.len()
    }

    pub fn is_empty(&self) -> bool {
        self.c.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(0.0, a.iou(&b));
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_box() {
        let a = BoundingBox::new(10.0, 10.0, 10.0, 10.0);
        let b = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        assert_eq!(0.0, a.area());
        assert_eq!(0.0, a.iou(&b));
    }
}
