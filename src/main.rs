use std::env::Args as EnvArgs;
use std::fs;
use std::path::PathBuf;
use std::process;

use tracing::info;

use onlinedet::model;
use onlinedet::{
    compute_feat_statistics, create_classifier, ClassifierKind, Error, OnlineRegionClassifier,
    Options, RegionRefiner,
};

fn main() {
    tracing_subscriber::fmt::init();

    let args = match Args::parse(std::env::args()) {
        Ok(args) => args,
        Err(message) => {
            println!("Failed to parse program arguments: {}", message);
            process::exit(1);
        }
    };

    if let Err(error) = run(&args) {
        println!("Pipeline failed: {}", error);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let opts = Options {
        num_classes: args.num_classes,
        kind: if args.linear {
            ClassifierKind::LinearRls
        } else {
            ClassifierKind::GaussianRls
        },
        ..Options::default()
    };
    opts.validate()?;

    if args.load_models {
        // Explicit load request: a missing artifact is surfaced, never
        // silently retrained.
        let stats = model::load_stats(&args.output_dir.join("stats_detector"))?;
        let classifiers = model::load_model_bank(&args.output_dir.join("classifier_detector"))?;
        let regressors = model::load_regressor_bank(&args.output_dir.join("regressor_detector"))?;
        info!(
            "loaded {} classifier and {} regressor entries, feature dimension {}",
            classifiers.len(),
            regressors.len(),
            stats.features_dim()
        );
        return Ok(());
    }

    fs::create_dir_all(&args.output_dir)?;

    // Train the box regressors first; the regression set is consumed and
    // released before classifier training allocates its caches.
    let coxy = model::load_coxy(&args.features_dir.join("coxy"))?;
    let regressors = RegionRefiner::new(&opts)?.train_region_refiner(coxy)?;
    model::save_regressor_bank(&args.output_dir.join("regressor_detector"), &regressors)?;

    let positives = model::load_positives(&args.features_dir, opts.num_classes)?;
    let negatives = model::load_negatives(&args.features_dir, opts.num_classes)?;
    let features_dim = positives
        .iter()
        .chain(negatives.iter().flatten())
        .find(|m| m.nrows() > 0)
        .map(|m| m.ncols())
        .ok_or_else(|| Error::Statistics("the feature cache holds no features".to_string()))?;

    let stats = compute_feat_statistics(
        &positives,
        &negatives,
        features_dim,
        opts.pos_fraction,
        opts.stats_seed,
    )?;
    model::save_stats(&args.output_dir.join("stats_detector"), &stats)?;

    let classifier = create_classifier(&opts);
    let orc = OnlineRegionClassifier::new(classifier, positives, negatives, stats, &opts)?;
    let bank = orc.train_region_classifier()?;
    model::save_model_bank(&args.output_dir.join("classifier_detector"), &bank)?;

    info!("artifacts written to {}", args.output_dir.display());
    Ok(())
}

struct Args {
    features_dir: PathBuf,
    output_dir: PathBuf,
    num_classes: usize,
    load_models: bool,
    linear: bool,
}

impl Args {
    fn parse(args: EnvArgs) -> Result<Self, String> {
        let args: Vec<String> = args.collect();
        if args.len() < 4 {
            return Err(format!(
                "Usage: {} <features-dir> <output-dir> <num-classes> [--load-models] [--linear]",
                args[0]
            ));
        }

        let features_dir = PathBuf::from(&args[1]);
        let output_dir = PathBuf::from(&args[2]);
        let num_classes: usize = args[3]
            .parse()
            .map_err(|_| format!("not a class count: {}", args[3]))?;

        let mut load_models = false;
        let mut linear = false;
        for flag in &args[4..] {
            match flag.as_str() {
                "--load-models" => load_models = true,
                "--linear" => linear = true,
                other => return Err(format!("unknown flag: {}", other)),
            }
        }

        Ok(Args {
            features_dir,
            output_dir,
            num_classes,
            load_models,
            linear,
        })
    }
}
