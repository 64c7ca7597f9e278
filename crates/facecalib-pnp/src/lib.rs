#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # facecalib PnP (Perspective-n-Point)
//!
//! Closed-form camera pose recovery from 2D-3D landmark correspondences.
//!
//! ## Example: EPnP on a single frame
//!
//! ```rust
//! use facecalib_pnp::{project_points, solve_epnp, EPnPParams};
//!
//! let world = [
//!     [0.0, 0.0, 0.0],
//!     [0.1, 0.0, 0.02],
//!     [0.0, 0.1, 0.01],
//!     [0.05, 0.05, 0.08],
//!     [-0.04, 0.03, 0.05],
//!     [0.02, -0.06, 0.03],
//! ];
//! let r = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
//! let t = [0.0, 0.0, 0.5];
//! let k = [[450.0, 0.0, 240.0], [0.0, 450.0, 320.0], [0.0, 0.0, 1.0]];
//! let image = project_points(&world, &r, &t, &k);
//!
//! let result = solve_epnp(&world, &image, &k, &EPnPParams::default())?;
//! assert!((result.translation[2] - 0.5).abs() < 1e-6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Efficient Perspective-n-Point (EPnP) solver implementation.
pub mod epnp;

/// Rigid alignment between two point sets.
pub mod rigid;

mod ops;

pub use epnp::{solve_epnp, EPnPParams};
pub use ops::{project_points, rotation_to_rvec};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a single-frame pose solve can fail.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PnPError {
    /// Fewer landmarks than the four control points need.
    #[error("EPnP needs at least {required} landmarks, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum landmark count.
        required: usize,
        /// Landmarks supplied.
        actual: usize,
    },

    /// The 3D and 2D landmark lists differ in length.
    #[error("{left_name} has {left_len} entries but {right_name} has {right_len}")]
    MismatchedArrayLengths {
        /// First list.
        left_name: &'static str,
        /// Its length.
        left_len: usize,
        /// Second list.
        right_name: &'static str,
        /// Its length.
        right_len: usize,
    },

    /// The focal length of the camera matrix is too close to zero.
    #[error("Degenerate intrinsics: focal length ({fx}, {fy}) below {min_focal}")]
    DegenerateIntrinsics {
        /// Focal length along x.
        fx: f64,
        /// Focal length along y.
        fy: f64,
        /// Minimum accepted focal length.
        min_focal: f64,
    },

    /// The world points are (nearly) coplanar or collinear.
    #[error("Degenerate point configuration: principal spread ratio {ratio:.3e} below {threshold:.3e}")]
    DegenerateConfiguration {
        /// Smallest over largest principal standard deviation.
        ratio: f64,
        /// Minimum accepted ratio.
        threshold: f64,
    },

    /// None of the candidate solutions placed the points in front of the camera.
    #[error("No candidate pose places the points in front of the camera")]
    NoValidCandidate,

    /// The recovered pose contains NaN or infinite values.
    #[error("Recovered pose is not finite")]
    NonFinite,

    /// A decomposition inside the solver did not converge.
    #[error("Decomposition failed: {0}")]
    SvdFailed(String),
}

/// Thresholds below which the solver reports a degenerate problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericTol {
    /// Singular values below this are treated as zero in least-squares solves.
    pub svd: f64,
    /// Minimum absolute focal length in pixels.
    pub min_focal: f64,
    /// Minimum ratio between the smallest and largest principal standard deviation of the world points.
    pub planarity: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            min_focal: 1e-3,
            planarity: 1e-3,
        }
    }
}

/// Head pose recovered for one frame.
///
/// `rotation` maps face coordinates into the camera frame, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPResult {
    /// Face-to-camera rotation.
    pub rotation: [[f64; 3]; 3],
    /// Face origin in camera coordinates.
    pub translation: [f64; 3],
    /// `rotation` as a Rodrigues vector.
    pub rvec: [f64; 3],
    /// RMS reprojection error of the chosen candidate, pixels.
    pub reproj_rmse: Option<f64>,
}
