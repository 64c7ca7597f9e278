#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # facecalib optim
//!
//! Self-calibration core: an intrinsic estimator and a shape estimator are
//! trained from 2D landmarks alone. Every step solves the pose of each
//! frame with EPnP and scores the predictions by reprojection error,
//! optionally against a known focal length.
//!
//! ## Example: joint optimisation on a small batch
//!
//! ```rust
//! use facecalib_optim::{
//!     BatchShape, ImageSize, LandmarkBatch, LandmarkScheme, Optimizer, OptimizerConfig,
//! };
//! use facecalib_pnp::project_points;
//!
//! let face = LandmarkScheme::Dlib68.canonical_points();
//! let k = [[450.0, 0.0, 240.0], [0.0, 450.0, 320.0], [0.0, 0.0, 1.0]];
//! let r = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
//! let frames = (0..4)
//!     .map(|i| project_points(face, &r, &[0.0, 0.01 * i as f64, 0.4], &k))
//!     .collect();
//! let batch = LandmarkBatch::from_frames(frames)?;
//!
//! let shape = BatchShape { frames: 4, landmarks: 68 };
//! let config = OptimizerConfig::default().with_input(shape, ImageSize::default());
//! let mut optimizer = Optimizer::from_config(config, 0)?;
//! let out = optimizer.joint_optimization(&batch, Some(450.0), 5)?;
//! assert_eq!(out.history.len(), 5);
//! # Ok::<(), facecalib_optim::CalibError>(())
//! ```

mod batch;
pub use batch::{BatchShape, ImageSize, LandmarkBatch, FRAMES_PER_BATCH, NUM_LANDMARKS};

pub mod checkpoint;
pub use checkpoint::{Checkpoint, CheckpointStore, CheckpointToken};

mod device;
pub use device::Device;

mod error;
pub use error::CalibError;

/// Intrinsic and shape estimators.
pub mod estimator;
pub use estimator::{
    CalibNet, CalibNetConfig, IntrinsicEstimator, SfmNet, SfmNetConfig, ShapeEstimator,
};

pub mod landmarks;
pub use landmarks::LandmarkScheme;

/// Scalar metric sinks.
pub mod metrics;
pub use metrics::{LogSink, MemorySink, MetricsSink, NullSink};

/// Reprojection and focal-length objective.
pub mod objective;
pub use objective::{LossWeights, ObjectiveTerms, ReprojectionObjective};

mod optimizer;
pub use optimizer::{Optimizer, OptimizerConfig, RunOutput, StepReport};

/// Batched pose solving.
pub mod pose;
pub use pose::{solve_poses, Pose, PoseBatch};

mod prediction;
pub use prediction::{IntrinsicPrediction, ShapePrediction};

mod schedule;
pub use schedule::{OptimizationState, Phase, Schedule};

mod source;
pub use source::{LandmarkSample, LandmarkSource};
