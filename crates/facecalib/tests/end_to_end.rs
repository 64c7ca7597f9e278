use facecalib::data::{SyntheticConfig, SyntheticLoader};
use facecalib::optim::{
    CheckpointStore, CheckpointToken, LandmarkSource, LossWeights, MemorySink, Optimizer,
    OptimizerConfig, Schedule,
};

/// Zero-noise sweep at f = 450 seen by a portrait camera centred at (240, 320).
#[test]
fn test_synthetic_sweep_calibrates() -> Result<(), Box<dyn std::error::Error>> {
    let config = SyntheticConfig::default().with_focal(450.0).with_noise(0.0);
    let mut loader = SyntheticLoader::new(config, 2024)?;
    let sample = loader.sample(0)?;
    assert_eq!(sample.image.principal_point(), [240.0, 320.0]);

    let weights = LossWeights {
        focal: 1.0,
        reprojection: 1e-4,
    };
    let optim_config = OptimizerConfig::default()
        .with_learning_rates(5e-4, 1e-4)
        .with_weights(weights);
    let mut optimizer = Optimizer::from_config(optim_config.clone(), 0)?;

    let mut sink = MemorySink::default();
    let out = optimizer.run(
        &sample.landmarks,
        sample.focal_gt,
        Schedule::Joint { iterations: 300 },
        &mut sink,
    )?;
    let f_error = out.terms.f_error.unwrap_or(f64::INFINITY);
    assert!(f_error < 0.05, "final f_error {f_error}");

    // the trained estimators survive a checkpoint round trip
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path());
    let token = CheckpointToken::for_run(0, "portrait", weights, 5e-4, 1e-4)?;
    optimizer.save(&store, &token)?;

    let mut restored = Optimizer::from_config(optim_config, 99)?;
    restored.load(&store, &token)?;
    assert_eq!(
        restored.predict_intrinsics(&sample.landmarks)?,
        optimizer.predict_intrinsics(&sample.landmarks)?
    );
    Ok(())
}
