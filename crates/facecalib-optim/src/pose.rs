use crate::batch::LandmarkBatch;
use crate::error::CalibError;
use crate::prediction::{IntrinsicPrediction, ShapePrediction};
use facecalib_pnp::{rotation_to_rvec, solve_epnp, EPnPParams, PnPError};
use rayon::prelude::*;

/// Rigid world-to-camera transform of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Row-major rotation, orthonormal with determinant `+1`.
    pub rotation: [[f64; 3]; 3],
    /// Translation in metres.
    pub translation: [f64; 3],
}

impl Pose {
    /// Map a face-frame point into camera coordinates.
    pub fn transform(&self, p: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Axis-angle representation of the rotation.
    pub fn rvec(&self) -> [f64; 3] {
        rotation_to_rvec(&self.rotation)
    }
}

/// A frame for which no pose could be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFailure {
    /// Frame index within the batch.
    pub frame: usize,
    /// Why the solver gave up.
    pub error: PnPError,
}

/// Poses solved for every frame of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseBatch {
    poses: Vec<Option<Pose>>,
    failures: Vec<FrameFailure>,
}

impl PoseBatch {
    /// Pose of every frame, `None` where solving failed.
    pub fn poses(&self) -> &[Option<Pose>] {
        &self.poses
    }

    /// Pose of frame `index`.
    pub fn pose(&self, index: usize) -> Option<&Pose> {
        self.poses.get(index).and_then(Option::as_ref)
    }

    /// Frames the solver rejected.
    pub fn failures(&self) -> &[FrameFailure] {
        &self.failures
    }

    /// Number of frames with a pose.
    pub fn num_solved(&self) -> usize {
        self.poses.len() - self.failures.len()
    }

    /// Number of frames in the batch.
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Whether the batch holds no frame.
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// Solve the pose of every frame with EPnP, one independent solve per frame.
///
/// Predictions are used by value only, so the resulting poses are constants
/// for the gradient step that follows. Degenerate frames are recorded in
/// [`PoseBatch::failures`] and left to the caller.
pub fn solve_poses(
    shape: &ShapePrediction,
    batch: &LandmarkBatch,
    intrinsics: &IntrinsicPrediction,
    params: &EPnPParams,
) -> Result<PoseBatch, CalibError> {
    let frames = batch.num_frames();
    if shape.num_frames() != frames
        || shape.num_landmarks() != batch.num_landmarks()
        || intrinsics.num_frames() != frames
    {
        return Err(CalibError::ShapeMismatch {
            expected_frames: frames,
            expected_landmarks: batch.num_landmarks(),
            frames: shape.num_frames(),
            landmarks: shape.num_landmarks(),
        });
    }

    let results: Vec<Result<Pose, PnPError>> = (0..frames)
        .into_par_iter()
        .map(|i| {
            let k = intrinsics.camera_matrix(i);
            solve_epnp(shape.frame(i), batch.frame(i), &k, params).map(|res| Pose {
                rotation: res.rotation,
                translation: res.translation,
            })
        })
        .collect();

    let mut poses = Vec::with_capacity(frames);
    let mut failures = Vec::new();
    for (frame, result) in results.into_iter().enumerate() {
        match result {
            Ok(pose) => poses.push(Some(pose)),
            Err(error) => {
                log::debug!("EPnP failed on frame {frame}: {error}");
                failures.push(FrameFailure { frame, error });
                poses.push(None);
            }
        }
    }

    Ok(PoseBatch { poses, failures })
}
