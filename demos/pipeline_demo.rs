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

//! Synthetic end-to-end walkthrough of the training and evaluation pipeline:
//! no feature extractor, just two Gaussian blobs per class standing in for
//! region embeddings.

use std::time::Instant;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use onlinedet::{
    compute_feat_statistics, create_classifier, AccuracyEvaluator, Coxy, MinibootstrapSelector,
    OnlineRegionClassifier, Options, PositiveSelector, RegionRefiner, TestImage,
};

const FEATURES_DIM: usize = 16;

fn main() {
    tracing_subscriber::fmt::init();

    let opts = Options {
        num_classes: 3,
        iterations: 4,
        batch_size: 50,
        score_thresh: 0.2,
        detections_per_img: 5,
        ..Options::default()
    };

    let mut rng = StdRng::seed_from_u64(42);

    // Per-class positive clusters and a shared background pool.
    let positives = PositiveSelector::from_ground_truth(vec![
        cluster(&mut rng, 40, 2.0),
        cluster(&mut rng, 40, -2.0),
    ])
    .select_positives();
    let pools = vec![cluster(&mut rng, 200, 0.0), cluster(&mut rng, 200, 0.0)];

    let selector = MinibootstrapSelector::new(opts.iterations, opts.batch_size);
    let negatives = selector.select_negatives(&pools);

    let stats = compute_feat_statistics(
        &positives,
        &negatives,
        FEATURES_DIM,
        opts.pos_fraction,
        opts.stats_seed,
    )
    .expect("statistics");

    // Box regression: identity targets around synthetic proposals.
    let coxy = synthetic_coxy(&mut rng, 60);
    let regressors = RegionRefiner::new(&opts)
        .expect("refiner options")
        .train_region_refiner(coxy)
        .expect("refiner training");

    let now = Instant::now();
    let classifier = create_classifier(&opts);
    let orc = OnlineRegionClassifier::new(classifier, positives, negatives, stats, &opts)
        .expect("classifier options");
    let bank = orc.train_region_classifier().expect("classifier training");
    println!(
        "Trained {} classes in {} ms",
        bank.iter().filter(|m| m.is_some()).count(),
        now.elapsed().as_millis()
    );

    // Score a synthetic image holding one proposal per cluster.
    let image = TestImage::new(
        "synthetic".to_string(),
        DMatrix::from_row_slice(
            3,
            4,
            &[
                0.0, 0.0, 10.0, 10.0, //
                20.0, 20.0, 30.0, 30.0, //
                40.0, 40.0, 50.0, 50.0,
            ],
        ),
        {
            let mut features = cluster(&mut rng, 3, 0.0);
            features.row_mut(0).add_scalar_mut(2.0);
            features.row_mut(1).add_scalar_mut(-2.0);
            features
        },
    );

    let evaluator = AccuracyEvaluator::new(&opts).expect("evaluator options");
    let detections = evaluator
        .evaluate_detection(&bank, &regressors, orc.stats(), &[image])
        .expect("evaluation");

    println!("Found {} detections", detections[0].len());
    for detection in &detections[0] {
        println!(
            "class {} score {:.3} box ({:.1}, {:.1}, {:.1}, {:.1})",
            detection.label(),
            detection.score(),
            detection.bbox().x1(),
            detection.bbox().y1(),
            detection.bbox().x2(),
            detection.bbox().y2()
        );
    }
}

fn cluster(rng: &mut StdRng, rows: usize, center: f32) -> DMatrix<f32> {
    DMatrix::from_fn(rows, FEATURES_DIM, |_, _| {
        center + rng.gen::<f32>() - 0.5
    })
}

fn synthetic_coxy(rng: &mut StdRng, rows: usize) -> Coxy {
    let c = (0..rows).map(|i| i % 2).collect();
    let x = cluster(rng, rows, 1.0);
    let o = DMatrix::from_fn(rows, 4, |r, k| {
        let base = (r * 7 % 29) as f32;
        base + if k < 2 { 0.0 } else { 10.0 }
    });
    let y = DMatrix::from_fn(rows, 4, |_, _| rng.gen::<f32>() * 0.1 - 0.05);
    Coxy { c, o, x, y }
}
