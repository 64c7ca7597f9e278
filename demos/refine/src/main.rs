use argh::FromArgs;
use facecalib::data::{GroundTruthCamera, RecordedLandmarks};
use facecalib::optim::{
    BatchShape, CheckpointStore, CheckpointToken, Device, Optimizer, OptimizerConfig,
    NUM_LANDMARKS,
};
use std::path::PathBuf;

#[derive(FromArgs)]
/// Estimate the camera matrix of a recorded landmark track, refining a
/// trained checkpoint with alternating optimisation
struct Args {
    /// JSON recording of landmark frames
    #[argh(option)]
    recording: PathBuf,

    /// directory holding the checkpoints
    #[argh(option, default = "PathBuf::from(\"checkpoints\")")]
    checkpoint_dir: PathBuf,

    /// token of the checkpoint to start from
    #[argh(option)]
    token: String,

    /// frames of the recording to use, all frames when omitted
    #[argh(option)]
    frame: Vec<usize>,

    /// JSON camera matrix from a target-based calibration to compare against
    #[argh(option)]
    reference: Option<PathBuf>,

    /// learning rate of the shape estimator during refinement
    #[argh(option, default = "20.0")]
    sfm_lr: f64,

    /// alternating rounds
    #[argh(option, default = "10")]
    rounds: usize,

    /// intrinsic-only steps per round
    #[argh(option, default = "5")]
    calib_iter: usize,

    /// shape-only steps per round
    #[argh(option, default = "5")]
    sfm_iter: usize,

    /// only predict, without refinement
    #[argh(switch)]
    no_optimization: bool,

    /// compute device
    #[argh(option, default = "Device::Cpu")]
    device: Device,
}

fn print_matrix(name: &str, k: &[[f64; 3]; 3]) {
    println!("{name}:");
    for row in k {
        println!("  [{:10.3} {:10.3} {:10.3}]", row[0], row[1], row[2]);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let recording = RecordedLandmarks::from_path(&args.recording)?;
    let frames = (!args.frame.is_empty()).then_some(args.frame.as_slice());
    let sample = recording.to_sample(frames)?;
    let batch = &sample.landmarks;
    println!("Loaded {} frames ({})", batch.num_frames(), sample.image);

    let config = OptimizerConfig::default()
        .with_input(
            BatchShape {
                frames: batch.num_frames(),
                landmarks: NUM_LANDMARKS,
            },
            sample.image,
        )
        .with_device(args.device);
    let mut optimizer = Optimizer::from_config(config, 0)?;
    let store = CheckpointStore::new(&args.checkpoint_dir);
    let token = CheckpointToken::new(args.token.as_str())?;
    optimizer.load(&store, &token)?;

    let k_avg = if args.no_optimization {
        optimizer.predict_intrinsics(batch)?.averaged_camera_matrix()
    } else {
        optimizer.set_sfm_lr(args.sfm_lr)?;
        log::debug!(
            "refining from step {} with sfm lr {}",
            optimizer.steps_taken(),
            optimizer.sfm_lr()
        );
        let out = optimizer.dual_optimization(
            batch,
            None,
            args.rounds,
            args.calib_iter,
            args.sfm_iter,
        )?;
        println!(
            "Refined over {} steps, reprojection error {:.3}px ({} frames excluded)",
            out.history.len(),
            out.terms.s_error,
            out.terms.excluded_frames
        );
        out.camera_matrix
    };
    print_matrix("K_avg", &k_avg);

    if let Some(path) = &args.reference {
        let reference = GroundTruthCamera::from_path(path)?;
        print_matrix("K_ref", &reference.camera_matrix);
        let cmp = reference.compare(&k_avg);
        println!(
            "focal error {:.2}%, principal point offset {:.1}px",
            100.0 * cmp.focal_error,
            cmp.principal_point_error
        );
    }
    Ok(())
}
