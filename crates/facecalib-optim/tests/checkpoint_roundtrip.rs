mod common;

use common::{head_sweep, FOCAL_GT};
use facecalib_optim::{
    CalibError, CheckpointStore, CheckpointToken, LossWeights, Optimizer, OptimizerConfig,
};

#[test]
fn test_save_then_load_reproduces_predictions() -> Result<(), Box<dyn std::error::Error>> {
    let batch = head_sweep(100, [1.02, 0.98, 1.0])?;
    let weights = LossWeights {
        focal: 1.0,
        reprojection: 0.1,
    };
    let config = OptimizerConfig::default().with_weights(weights);

    let mut trained = Optimizer::from_config(config.clone(), 1)?;
    trained.joint_optimization(&batch, Some(FOCAL_GT), 5)?;

    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path());
    let token = CheckpointToken::for_run(0, "portrait", weights, 1e-3, 1e-4)?;
    trained.save(&store, &token)?;

    // a differently seeded optimizer predicts something else until loaded
    let mut fresh = Optimizer::from_config(config, 2)?;
    assert_ne!(
        fresh.predict_intrinsics(&batch)?,
        trained.predict_intrinsics(&batch)?
    );
    fresh.load(&store, &token)?;

    assert_eq!(
        fresh.predict_intrinsics(&batch)?,
        trained.predict_intrinsics(&batch)?
    );
    assert_eq!(fresh.predict_shape(&batch)?, trained.predict_shape(&batch)?);
    assert_eq!(fresh.steps_taken(), 5);
    assert_eq!(fresh.calib_lr(), trained.calib_lr());

    // both continue identically from the restored updater state
    let a = trained.joint_optimization(&batch, Some(FOCAL_GT), 2)?;
    let b = fresh.joint_optimization(&batch, Some(FOCAL_GT), 2)?;
    assert_eq!(a.intrinsics, b.intrinsics);
    Ok(())
}

#[test]
fn test_unknown_token_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path());
    let mut optimizer = Optimizer::from_config(OptimizerConfig::default(), 0)?;
    let before = optimizer.checkpoint(&CheckpointToken::new("before")?);

    let token = CheckpointToken::new("03_orient=landscape_fw=10.00_sw=0.10_")?;
    assert!(matches!(
        optimizer.load(&store, &token),
        Err(CalibError::CheckpointNotFound { .. })
    ));
    assert_eq!(before.intrinsic_params, optimizer.checkpoint(&token).intrinsic_params);
    Ok(())
}

#[test]
fn test_checkpoint_from_other_architecture_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path());
    let token = CheckpointToken::new("small")?;

    let optimizer = Optimizer::from_config(OptimizerConfig::default(), 0)?;
    let mut checkpoint = optimizer.checkpoint(&token);
    checkpoint.intrinsic_params.pop();
    store.save(&token, &checkpoint)?;

    let mut other = Optimizer::from_config(OptimizerConfig::default(), 0)?;
    assert!(matches!(
        other.load(&store, &token),
        Err(CalibError::CheckpointCorrupted { .. })
    ));
    Ok(())
}
