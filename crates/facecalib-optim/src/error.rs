use crate::device::Device;
use std::path::PathBuf;

/// An error type for the calibration core.
#[derive(thiserror::Error, Debug)]
pub enum CalibError {
    /// The landmark batch does not have the configured number of frames or landmarks.
    #[error("Shape mismatch: expected {expected_frames} frames x {expected_landmarks} landmarks, got {frames} x {landmarks}")]
    ShapeMismatch {
        /// Expected number of frames.
        expected_frames: usize,
        /// Expected number of landmarks per frame.
        expected_landmarks: usize,
        /// Actual number of frames.
        frames: usize,
        /// Actual number of landmarks per frame.
        landmarks: usize,
    },

    /// A landmark coordinate is NaN or infinite.
    #[error("Landmark {landmark} of frame {frame} is not finite")]
    NonFiniteLandmark {
        /// Frame index.
        frame: usize,
        /// Landmark index within the frame.
        landmark: usize,
    },

    /// No frame of the batch produced a usable pose.
    #[error("Pose solving failed for {failed} of {total} frames: {reason}")]
    PoseSolveFailure {
        /// Number of frames that were excluded.
        failed: usize,
        /// Number of frames in the batch.
        total: usize,
        /// Description of the first failure.
        reason: String,
    },

    /// The requested checkpoint token has no artifact.
    #[error("No checkpoint for token '{token}' at {}", path.display())]
    CheckpointNotFound {
        /// Requested token.
        token: String,
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A checkpoint for this token was already written.
    #[error("Checkpoint for token '{token}' already exists at {}", path.display())]
    CheckpointExists {
        /// Requested token.
        token: String,
        /// Path of the existing artifact.
        path: PathBuf,
    },

    /// The checkpoint artifact could not be decoded or does not fit the estimators.
    #[error("Checkpoint at {} is corrupted: {reason}", path.display())]
    CheckpointCorrupted {
        /// Path of the artifact.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The loss or a gradient became NaN or infinite.
    #[error("Numerical divergence at step {step}: {what} = {value}")]
    NumericalDivergence {
        /// Global step at which the divergence was detected.
        step: usize,
        /// Name of the offending quantity.
        what: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A component lives on a different device than the optimizer.
    #[error("Device mismatch: {component} is on {actual}, expected {expected}")]
    DeviceMismatch {
        /// Name of the component.
        component: &'static str,
        /// Device of the optimizer.
        expected: Device,
        /// Device of the component.
        actual: Device,
    },

    /// The requested device is not available in this build.
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(Device),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from the network building blocks.
    #[error(transparent)]
    Nn(#[from] facecalib_nn::NnError),

    /// Error while accessing checkpoint storage.
    #[error("Failed to manipulate the file. {0}")]
    Io(#[from] std::io::Error),
}
