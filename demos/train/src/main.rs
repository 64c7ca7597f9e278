use argh::FromArgs;
use facecalib::data::{ImageOrientation, SyntheticConfig, SyntheticLoader};
use facecalib::optim::{
    BatchShape, CheckpointStore, CheckpointToken, Device, LandmarkSource, LogSink,
    LossWeights, MetricsSink, Optimizer, OptimizerConfig, StepReport,
};
use serde::Serialize;
use std::path::PathBuf;

const FOCAL_WEIGHTS: [f64; 3] = [0.1, 1.0, 10.0];
const REPROJECTION_WEIGHTS: [f64; 3] = [0.1, 1.0, 10.0];
const CALIB_LRS: [f64; 3] = [1e-2, 1e-3, 1e-4];
const SFM_LRS: [f64; 3] = [1e-3, 1e-4, 1e-5];

#[derive(FromArgs)]
/// Train the intrinsic and shape estimators on synthetic head sweeps,
/// sweeping loss weights and learning rates
struct Args {
    /// device orientation: portrait or landscape
    #[argh(option, default = "ImageOrientation::Portrait")]
    orientation: ImageOrientation,

    /// number of epochs per run
    #[argh(option, default = "1")]
    epochs: usize,

    /// synthetic batches per epoch
    #[argh(option, default = "500")]
    batches_per_epoch: usize,

    /// directory the checkpoints are written to
    #[argh(option, default = "PathBuf::from(\"checkpoints\")")]
    checkpoint_dir: PathBuf,

    /// seed of the synthetic data and the network initialisation
    #[argh(option, default = "0")]
    seed: u64,

    /// compute device
    #[argh(option, default = "Device::Cpu")]
    device: Device,

    /// optional JSON file receiving one summary per run
    #[argh(option)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    run_id: usize,
    weights: LossWeights,
    calib_lr: f64,
    sfm_lr: f64,
    last_step: Option<StepReport>,
    error: Option<String>,
}

struct Run {
    id: usize,
    weights: LossWeights,
    calib_lr: f64,
    sfm_lr: f64,
}

fn train_run(
    run: &Run,
    args: &Args,
    loader: &mut SyntheticLoader,
    store: &CheckpointStore,
) -> Result<Option<StepReport>, Box<dyn std::error::Error>> {
    let config = OptimizerConfig::default()
        .with_input(BatchShape::default(), args.orientation.image_size())
        .with_learning_rates(run.calib_lr, run.sfm_lr)
        .with_weights(run.weights)
        .with_device(args.device);
    let mut optimizer = Optimizer::from_config(config, args.seed)?;

    let tag = format!(
        "id_{},orient={},f_w={:.2},s_w={:.2},calib_lr={:.6},sfm_lr={:.6}",
        run.id,
        args.orientation,
        run.weights.focal,
        run.weights.reprojection,
        run.calib_lr,
        run.sfm_lr
    );
    let mut sink = LogSink::new(tag);

    let mut last = None;
    for epoch in 0..args.epochs {
        for i in 0..args.batches_per_epoch {
            let sample = loader.sample(epoch * args.batches_per_epoch + i)?;
            let report = optimizer.train_step(&sample.landmarks, sample.focal_gt, &mut sink)?;
            log::debug!(
                "epoch {epoch} | iter {i} | f {:.2}/{:.2} | s_error {:.3}",
                report.mean_focal,
                sample.focal_gt.unwrap_or(f64::NAN),
                report.terms.s_error
            );
            last = Some(report);
        }

        let token = CheckpointToken::for_run(
            epoch,
            &args.orientation.to_string(),
            run.weights,
            run.calib_lr,
            run.sfm_lr,
        )?;
        optimizer.save(store, &token)?;
    }

    if let Some(report) = &last {
        let mut metrics = vec![("s_error", report.terms.s_error), ("loss", report.terms.loss)];
        if let Some(f_error) = report.terms.f_error {
            metrics.push(("f_error", f_error));
        }
        sink.record_summary(
            &[
                ("calib_lr", run.calib_lr),
                ("sfm_lr", run.sfm_lr),
                ("focal_weight", run.weights.focal),
                ("reprojection_weight", run.weights.reprojection),
            ],
            &metrics,
        );
    }
    Ok(last)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let data_config = SyntheticConfig::default().with_orientation(args.orientation);
    let mut loader = SyntheticLoader::new(data_config, args.seed)?;
    let store = CheckpointStore::new(&args.checkpoint_dir);

    let mut runs = Vec::new();
    for &focal in &FOCAL_WEIGHTS {
        for &reprojection in &REPROJECTION_WEIGHTS {
            for &calib_lr in &CALIB_LRS {
                for &sfm_lr in &SFM_LRS {
                    runs.push(Run {
                        id: runs.len(),
                        weights: LossWeights {
                            focal,
                            reprojection,
                        },
                        calib_lr,
                        sfm_lr,
                    });
                }
            }
        }
    }
    println!("Training {} runs ({})", runs.len(), args.orientation);

    let mut summaries = Vec::with_capacity(runs.len());
    for run in &runs {
        let outcome = train_run(run, &args, &mut loader, &store);
        if let Err(e) = &outcome {
            log::error!("run {} failed: {e}", run.id);
        }
        let (last_step, error) = match outcome {
            Ok(last) => (last, None),
            Err(e) => (None, Some(e.to_string())),
        };
        summaries.push(RunSummary {
            run_id: run.id,
            weights: run.weights,
            calib_lr: run.calib_lr,
            sfm_lr: run.sfm_lr,
            last_step,
            error,
        });
    }

    let failed = summaries.iter().filter(|s| s.error.is_some()).count();
    println!("Finished {} runs, {failed} failed", summaries.len());

    if let Some(path) = &args.summary {
        std::fs::write(path, serde_json::to_vec_pretty(&summaries)?)?;
        println!("Wrote run summaries to {}", path.display());
    }
    Ok(())
}
