mod common;

use common::{head_sweep, mean, CENTER, FOCAL_GT};
use facecalib_optim::{
    CalibError, IntrinsicEstimator, LandmarkBatch, LossWeights, MemorySink, Optimizer,
    OptimizerConfig, Phase, Schedule, ShapeEstimator, StepReport,
};

fn losses(history: &[StepReport], phase: Phase, round: std::ops::Range<usize>) -> Vec<f64> {
    history
        .iter()
        .filter(|r| r.phase == phase)
        .skip(round.start)
        .take(round.len())
        .map(|r| r.terms.loss)
        .collect()
}

fn assert_decreasing(losses: &[f64], what: &str) {
    let head = mean(&losses[..5]);
    let tail = mean(&losses[losses.len() - 5..]);
    assert!(
        tail < head,
        "{what}: loss went from {head:.6} to {tail:.6}"
    );
}

/// Joint optimisation recovers the focal length of a noiseless sweep.
#[test]
fn test_joint_recovers_focal_length() -> Result<(), CalibError> {
    let batch = head_sweep(100, [1.0, 1.0, 1.0])?;
    let config = OptimizerConfig::default()
        .with_learning_rates(5e-4, 1e-4)
        .with_weights(LossWeights {
            focal: 1.0,
            reprojection: 1e-4,
        });
    let mut optimizer = Optimizer::from_config(config, 7)?;

    let mut sink = MemorySink::default();
    let out = optimizer.run(&batch, Some(FOCAL_GT), Schedule::Joint { iterations: 300 }, &mut sink)?;

    let f_error = out.terms.f_error.unwrap_or(f64::INFINITY);
    assert!(f_error < 0.05, "final f_error {f_error}");
    assert!(out.history[0].terms.f_error.unwrap_or(0.0) > 0.1);
    assert_eq!(out.history.len(), 300);
    assert!(out.state.phase.is_finished());

    // averaged camera matrix keeps the principal point at the image centre
    let k = out.camera_matrix;
    assert_eq!([k[0][2], k[1][2]], CENTER);
    assert_eq!(k[0][0], k[1][1]);
    assert!((k[0][0] - FOCAL_GT).abs() / FOCAL_GT < 0.05);

    assert_eq!(out.poses.num_solved(), 100);
    assert_eq!(sink.series("error/f_error").len(), 300);
    assert_eq!(sink.series("loss/train").len(), 300);
    assert_eq!(sink.summaries.len(), 1);
    Ok(())
}

#[test]
fn test_sequential_phases_decrease_loss() -> Result<(), CalibError> {
    let batch = head_sweep(100, [1.05, 0.95, 1.0])?;
    let config = OptimizerConfig::default()
        .with_learning_rates(1e-3, 1e-3)
        .with_weights(LossWeights {
            focal: 1.0,
            reprojection: 1e-2,
        });
    let mut optimizer = Optimizer::from_config(config, 3)?;
    let out = optimizer.sequential_optimization(&batch, Some(FOCAL_GT), 40, 40)?;

    let calib = losses(&out.history, Phase::SequentialCalib, 0..40);
    let sfm = losses(&out.history, Phase::SequentialSfm, 0..40);
    assert_eq!((calib.len(), sfm.len()), (40, 40));
    assert_decreasing(&calib, "calib phase");
    assert_decreasing(&sfm, "sfm phase");

    // the intrinsic estimator is frozen while the shape is trained
    let focals: Vec<f64> = out
        .history
        .iter()
        .filter(|r| r.phase == Phase::SequentialSfm)
        .map(|r| r.mean_focal)
        .collect();
    assert!(focals.iter().all(|&f| f == focals[0]));
    Ok(())
}

#[test]
fn test_calib_phases_freeze_shape_estimator() -> Result<(), CalibError> {
    let batch = head_sweep(100, [1.05, 0.95, 1.0])?;
    let config = OptimizerConfig::default().with_learning_rates(1e-3, 1e-3);
    let mut optimizer = Optimizer::from_config(config, 7)?;

    for phase in [Phase::SequentialCalib, Phase::AlternatingCalib] {
        let shape_params = optimizer.shape_estimator().params().to_vec();
        let calib_params = optimizer.intrinsic_estimator().params().to_vec();
        for _ in 0..3 {
            optimizer.step(&batch, Some(FOCAL_GT), phase)?;
        }
        assert_eq!(optimizer.shape_estimator().params(), shape_params.as_slice());
        assert_ne!(optimizer.intrinsic_estimator().params(), calib_params.as_slice());
    }
    Ok(())
}

#[test]
fn test_alternating_phases_decrease_loss() -> Result<(), CalibError> {
    let batch = head_sweep(100, [1.05, 0.95, 1.0])?;
    let config = OptimizerConfig::default()
        .with_learning_rates(1e-3, 1e-3)
        .with_weights(LossWeights {
            focal: 1.0,
            reprojection: 1e-2,
        });
    let mut optimizer = Optimizer::from_config(config, 5)?;
    let out = optimizer.dual_optimization(&batch, Some(FOCAL_GT), 2, 20, 20)?;

    assert_eq!(out.history.len(), 80);
    assert_decreasing(
        &losses(&out.history, Phase::AlternatingCalib, 0..20),
        "first calib phase",
    );
    assert_decreasing(
        &losses(&out.history, Phase::AlternatingSfm, 0..20),
        "first sfm phase",
    );
    let first = out.history[0].terms.loss;
    assert!(out.terms.loss < first);

    let phases: Vec<Phase> = out.history.iter().map(|r| r.phase).collect();
    assert_eq!(phases[19], Phase::AlternatingCalib);
    assert_eq!(phases[20], Phase::AlternatingSfm);
    assert_eq!(phases[40], Phase::AlternatingCalib);
    Ok(())
}

#[test]
fn test_refinement_without_ground_truth() -> Result<(), CalibError> {
    let batch = head_sweep(100, [1.0, 1.0, 1.0])?;
    let mut optimizer = Optimizer::from_config(OptimizerConfig::default(), 11)?;
    let out = optimizer.dual_optimization(&batch, None, 1, 3, 3)?;
    assert!(out.history.iter().all(|r| r.terms.f_error.is_none()));
    assert!(out.intrinsics.is_valid());
    Ok(())
}

#[test]
fn test_wrong_batch_size_is_rejected() -> Result<(), CalibError> {
    let mut optimizer = Optimizer::from_config(OptimizerConfig::default(), 0)?;

    let too_few_frames = head_sweep(99, [1.0, 1.0, 1.0])?;
    assert!(matches!(
        optimizer.joint_optimization(&too_few_frames, Some(FOCAL_GT), 1),
        Err(CalibError::ShapeMismatch { frames: 99, .. })
    ));

    let full = head_sweep(100, [1.0, 1.0, 1.0])?;
    let points = full.frames().flat_map(|f| f[..67].iter().copied()).collect();
    let too_few_landmarks = LandmarkBatch::new(100, 67, points)?;
    assert!(matches!(
        optimizer.predict_shape(&too_few_landmarks),
        Err(CalibError::ShapeMismatch { landmarks: 67, .. })
    ));
    assert!(matches!(
        optimizer.predict_intrinsics(&too_few_landmarks),
        Err(CalibError::ShapeMismatch { landmarks: 67, .. })
    ));
    assert_eq!(optimizer.steps_taken(), 0);
    Ok(())
}

#[test]
fn test_divergence_aborts_run() -> Result<(), CalibError> {
    let batch = head_sweep(100, [1.0, 1.0, 1.0])?;
    let optimizer = Optimizer::from_config(OptimizerConfig::default(), 0)?;

    // a huge output bias overflows the focal length to infinity
    let mut params = optimizer.intrinsic_estimator().params().to_vec();
    if let Some(bias) = params.last_mut() {
        *bias = 1e3;
    }
    let mut estimator = optimizer.intrinsic_estimator().clone();
    estimator.load_params(&params)?;
    let shape = optimizer.shape_estimator().clone();
    let mut optimizer = Optimizer::new(optimizer.config().clone(), estimator, shape)?;

    let res = optimizer.joint_optimization(&batch, Some(FOCAL_GT), 10);
    assert!(matches!(
        res,
        Err(CalibError::NumericalDivergence {
            step: 0,
            what: "focal length",
            ..
        })
    ));
    assert_eq!(optimizer.steps_taken(), 0);
    assert_eq!(optimizer.intrinsic_estimator().params(), params.as_slice());
    Ok(())
}

#[test]
fn test_all_frames_degenerate_is_a_run_failure() -> Result<(), CalibError> {
    let batch = head_sweep(100, [1.0, 1.0, 1.0])?;
    let optimizer = Optimizer::from_config(OptimizerConfig::default(), 0)?;

    // a focal length that underflows to zero makes every pose degenerate
    let mut estimator = optimizer.intrinsic_estimator().clone();
    let mut params = estimator.params().to_vec();
    if let Some(bias) = params.last_mut() {
        *bias = -1e3;
    }
    estimator.load_params(&params)?;
    let shape = optimizer.shape_estimator().clone();
    let mut optimizer = Optimizer::new(optimizer.config().clone(), estimator, shape)?;

    let res = optimizer.sequential_optimization(&batch, Some(FOCAL_GT), 2, 2);
    assert!(matches!(
        res,
        Err(CalibError::PoseSolveFailure {
            failed: 100,
            total: 100,
            ..
        })
    ));
    Ok(())
}
