use crate::batch::LandmarkBatch;
use crate::error::CalibError;
use crate::pose::{Pose, PoseBatch};
use crate::prediction::{IntrinsicPrediction, ShapePrediction};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// landmarks closer to the camera plane than this make a frame unusable
const MIN_DEPTH: f64 = 1e-6;

/// Weights of the two loss terms, `loss = focal * f_error + reprojection * s_error`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    /// Weight of the relative focal-length error.
    pub focal: f64,
    /// Weight of the mean reprojection error in pixels.
    pub reprojection: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            focal: 1.0,
            reprojection: 1.0,
        }
    }
}

/// Scalar terms of one objective evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveTerms {
    /// Weighted loss.
    pub loss: f64,
    /// Relative focal error, absent without ground truth.
    pub f_error: Option<f64>,
    /// Mean per-frame reprojection error over the usable frames, pixels.
    pub s_error: f64,
    /// Frames that contributed to `s_error`.
    pub valid_frames: usize,
    /// Frames left out of `s_error`.
    pub excluded_frames: usize,
}

/// Objective value and its gradient w.r.t. the predictions.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Scalar terms.
    pub terms: ObjectiveTerms,
    /// `dloss / df_i` for every frame.
    pub grad_focal: Vec<f64>,
    /// `dloss / dS_ij` for every predicted point, frame after frame.
    pub grad_shape: Vec<[f64; 3]>,
}

/// Relative error `|mean(f) - f_gt| / f_gt` of the batch-mean focal length.
pub fn focal_error(intrinsics: &IntrinsicPrediction, focal_gt: f64) -> f64 {
    (intrinsics.mean_focal() - focal_gt).abs() / focal_gt
}

/// Mean Euclidean pixel error of every frame, `None` for frames without a
/// pose or with landmarks behind the camera.
pub fn reprojection_errors(
    shape: &ShapePrediction,
    poses: &PoseBatch,
    intrinsics: &IntrinsicPrediction,
    batch: &LandmarkBatch,
) -> Result<Vec<Option<f64>>, CalibError> {
    check_frames(shape, poses, intrinsics, batch)?;
    Ok((0..batch.num_frames())
        .into_par_iter()
        .map(|i| frame_residual(shape, poses, intrinsics, batch, i, false).map(|r| r.error))
        .collect())
}

fn check_frames(
    shape: &ShapePrediction,
    poses: &PoseBatch,
    intrinsics: &IntrinsicPrediction,
    batch: &LandmarkBatch,
) -> Result<(), CalibError> {
    let frames = batch.num_frames();
    if shape.num_frames() != frames
        || shape.num_landmarks() != batch.num_landmarks()
        || poses.len() != frames
        || intrinsics.num_frames() != frames
    {
        return Err(CalibError::ShapeMismatch {
            expected_frames: frames,
            expected_landmarks: batch.num_landmarks(),
            frames: shape.num_frames(),
            landmarks: shape.num_landmarks(),
        });
    }
    Ok(())
}

struct FrameResidual {
    error: f64,
    // derivatives of `error` w.r.t. the frame's focal length and points
    d_focal: f64,
    d_shape: Vec<[f64; 3]>,
}

fn frame_residual(
    shape: &ShapePrediction,
    poses: &PoseBatch,
    intrinsics: &IntrinsicPrediction,
    batch: &LandmarkBatch,
    index: usize,
    with_grad: bool,
) -> Option<FrameResidual> {
    let pose: &Pose = poses.pose(index)?;
    let f = intrinsics.focal(index);
    let [cx, cy] = intrinsics.principal_point();
    let points = shape.frame(index);
    let observed = batch.frame(index);
    let n = points.len() as f64;

    let camera: Vec<[f64; 3]> = points.iter().map(|s| pose.transform(s)).collect();
    if camera.iter().any(|p| !(p[2] > MIN_DEPTH)) {
        return None;
    }

    let r = &pose.rotation;
    let mut error = 0.0;
    let mut d_focal = 0.0;
    let mut d_shape = Vec::with_capacity(if with_grad { points.len() } else { 0 });
    for (p, o) in camera.iter().zip(observed) {
        let (x, y, z) = (p[0] / p[2], p[1] / p[2], p[2]);
        let rx = f * x + cx - o[0];
        let ry = f * y + cy - o[1];
        let d = rx.hypot(ry);
        error += d / n;
        if !with_grad {
            continue;
        }
        if d < f64::EPSILON {
            d_shape.push([0.0; 3]);
            continue;
        }
        let (gx, gy) = (rx / (d * n), ry / (d * n));
        d_focal += gx * x + gy * y;
        // gradient w.r.t. the camera-frame point, pulled back through R
        let gp = [f * gx / z, f * gy / z, -f * (gx * x + gy * y) / z];
        d_shape.push([
            r[0][0] * gp[0] + r[1][0] * gp[1] + r[2][0] * gp[2],
            r[0][1] * gp[0] + r[1][1] * gp[1] + r[2][1] * gp[2],
            r[0][2] * gp[0] + r[1][2] * gp[1] + r[2][2] * gp[2],
        ]);
    }

    error.is_finite().then_some(FrameResidual {
        error,
        d_focal,
        d_shape,
    })
}

/// Reprojection-consistency objective with an optional focal-length term.
///
/// Poses are taken as constants: gradients reach the intrinsics and the
/// shape only through the projection evaluated at the solved pose.
#[derive(Debug, Clone, Default)]
pub struct ReprojectionObjective {
    weights: LossWeights,
}

impl ReprojectionObjective {
    /// Create an objective with the given term weights.
    pub fn new(weights: LossWeights) -> Self {
        Self { weights }
    }

    /// Term weights.
    pub fn weights(&self) -> LossWeights {
        self.weights
    }

    /// Evaluate the loss and its gradients.
    ///
    /// Frames without a pose, or with a landmark behind the camera, are
    /// excluded from the reprojection term and counted in
    /// [`ObjectiveTerms::excluded_frames`]. If no frame is usable the
    /// evaluation fails with [`CalibError::PoseSolveFailure`]. Without
    /// `focal_gt` the focal term is dropped.
    pub fn evaluate(
        &self,
        shape: &ShapePrediction,
        poses: &PoseBatch,
        intrinsics: &IntrinsicPrediction,
        batch: &LandmarkBatch,
        focal_gt: Option<f64>,
    ) -> Result<Evaluation, CalibError> {
        check_frames(shape, poses, intrinsics, batch)?;
        if let Some(gt) = focal_gt {
            if !(gt.is_finite() && gt > 0.0) {
                return Err(CalibError::InvalidConfig(format!(
                    "ground-truth focal length must be positive, got {gt}"
                )));
            }
        }

        let frames = batch.num_frames();
        let landmarks = batch.num_landmarks();
        let residuals: Vec<Option<FrameResidual>> = (0..frames)
            .into_par_iter()
            .map(|i| frame_residual(shape, poses, intrinsics, batch, i, true))
            .collect();

        let valid = residuals.iter().filter(|r| r.is_some()).count();
        let excluded = frames - valid;
        if valid == 0 {
            let reason = poses
                .failures()
                .first()
                .map_or_else(|| "landmarks behind the camera".to_string(), |f| f.error.to_string());
            return Err(CalibError::PoseSolveFailure {
                failed: frames,
                total: frames,
                reason,
            });
        }
        if excluded > 0 {
            log::warn!("excluded {excluded} of {frames} frames from the reprojection error");
        }

        let w_s = self.weights.reprojection;
        let per_frame = w_s / valid as f64;
        let mut s_error = 0.0;
        let mut grad_focal = vec![0.0; frames];
        let mut grad_shape = vec![[0.0; 3]; frames * landmarks];
        for (i, residual) in residuals.iter().enumerate() {
            let Some(residual) = residual else {
                continue;
            };
            s_error += residual.error / valid as f64;
            grad_focal[i] = per_frame * residual.d_focal;
            let dst = &mut grad_shape[i * landmarks..(i + 1) * landmarks];
            for (g, d) in dst.iter_mut().zip(residual.d_shape.iter()) {
                *g = [per_frame * d[0], per_frame * d[1], per_frame * d[2]];
            }
        }

        let mut loss = w_s * s_error;
        let f_error = focal_gt.map(|gt| {
            let err = focal_error(intrinsics, gt);
            let diff = intrinsics.mean_focal() - gt;
            // zero subgradient of |diff| at the minimum
            let sign = if diff == 0.0 { 0.0 } else { diff.signum() };
            let d_focal = self.weights.focal * sign / (gt * frames as f64);
            grad_focal.iter_mut().for_each(|g| *g += d_focal);
            err
        });
        if let Some(err) = f_error {
            loss += self.weights.focal * err;
        }

        Ok(Evaluation {
            terms: ObjectiveTerms {
                loss,
                f_error,
                s_error,
                valid_frames: valid,
                excluded_frames: excluded,
            },
            grad_focal,
            grad_shape,
        })
    }
}
