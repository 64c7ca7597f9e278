#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # facecalib data
//!
//! - [`SyntheticLoader`]: random head sweeps in front of a virtual camera
//!   with a known focal length.
//! - [`RecordedLandmarks`]: landmark tracks captured on a device, either
//!   already in the 68-point layout or as raw face-mesh output.
//! - [`GroundTruthCamera`]: a camera matrix from a conventional
//!   calibration, used to judge self-calibration results.

/// Face-mesh to 68-point landmark conversion.
pub mod mediapipe;

mod recorded;
pub use recorded::{CameraComparison, GroundTruthCamera, RecordedLandmarks};

/// Synthetic head-sweep generator.
pub mod synthetic;
pub use synthetic::{ImageOrientation, SyntheticConfig, SyntheticLoader, SyntheticScene};

use std::path::PathBuf;

/// An error type for the landmark sources.
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    /// No head pose pair kept the face inside the image within the retry budget.
    #[error("No valid start/end head pose found after {attempts} attempts")]
    NoValidPose {
        /// Number of pose pairs tried.
        attempts: usize,
    },

    /// A frame has a landmark count that cannot be mapped to the 68-point layout.
    #[error("Frame {frame} has {count} landmarks, expected 68, 468 or 478")]
    LandmarkCount {
        /// Frame index.
        frame: usize,
        /// Number of landmarks found.
        count: usize,
    },

    /// A generator setting is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The file could not be parsed.
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser error.
        source: serde_json::Error,
    },

    /// Error from the calibration core.
    #[error(transparent)]
    Calib(#[from] facecalib_optim::CalibError),

    /// Error to open the file.
    #[error("Failed to manipulate the file. {0}")]
    Io(#[from] std::io::Error),
}
