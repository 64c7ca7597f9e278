use crate::error::CalibError;

/// Per-frame pinhole intrinsics `[[f, 0, cx], [0, f, cy], [0, 0, 1]]`.
///
/// Only the focal length varies per frame; the principal point is fixed
/// at the image centre.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicPrediction {
    focals: Vec<f64>,
    principal_point: [f64; 2],
}

impl IntrinsicPrediction {
    /// Create a prediction from per-frame focal lengths.
    pub fn new(focals: Vec<f64>, principal_point: [f64; 2]) -> Self {
        Self {
            focals,
            principal_point,
        }
    }

    /// Per-frame focal lengths in pixels.
    pub fn focals(&self) -> &[f64] {
        &self.focals
    }

    /// Focal length of frame `index`.
    pub fn focal(&self, index: usize) -> f64 {
        self.focals[index]
    }

    /// Principal point `(cx, cy)`.
    pub fn principal_point(&self) -> [f64; 2] {
        self.principal_point
    }

    /// Number of frames.
    pub fn num_frames(&self) -> usize {
        self.focals.len()
    }

    /// Batch mean of the focal length.
    pub fn mean_focal(&self) -> f64 {
        if self.focals.is_empty() {
            return f64::NAN;
        }
        self.focals.iter().sum::<f64>() / self.focals.len() as f64
    }

    /// Camera matrix of frame `index`.
    pub fn camera_matrix(&self, index: usize) -> [[f64; 3]; 3] {
        pinhole(self.focals[index], self.principal_point)
    }

    /// Camera matrix averaged over the batch.
    pub fn averaged_camera_matrix(&self) -> [[f64; 3]; 3] {
        pinhole(self.mean_focal(), self.principal_point)
    }

    /// Whether every focal length is finite and positive.
    pub fn is_valid(&self) -> bool {
        self.focals.iter().all(|f| f.is_finite() && *f > 0.0)
    }
}

fn pinhole(focal: f64, [cx, cy]: [f64; 2]) -> [[f64; 3]; 3] {
    [[focal, 0.0, cx], [0.0, focal, cy], [0.0, 0.0, 1.0]]
}

/// Per-frame 3D landmark configuration in the face frame, metres.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapePrediction {
    landmarks: usize,
    points: Vec<[f64; 3]>,
}

impl ShapePrediction {
    /// Create a prediction from `frames * landmarks` contiguous points.
    pub fn new(landmarks: usize, points: Vec<[f64; 3]>) -> Result<Self, CalibError> {
        if landmarks == 0 || points.len() % landmarks != 0 {
            return Err(CalibError::ShapeMismatch {
                expected_frames: points.len() / landmarks.max(1),
                expected_landmarks: landmarks,
                frames: points.len() / landmarks.max(1),
                landmarks: points.len() % landmarks.max(1),
            });
        }
        Ok(Self { landmarks, points })
    }

    /// Repeat one shape for every frame.
    pub fn broadcast(shape: &[[f64; 3]], frames: usize) -> Result<Self, CalibError> {
        Self::new(
            shape.len(),
            (0..frames).flat_map(|_| shape.iter().copied()).collect(),
        )
    }

    /// Number of frames.
    pub fn num_frames(&self) -> usize {
        self.points.len() / self.landmarks.max(1)
    }

    /// Number of landmarks per frame.
    pub fn num_landmarks(&self) -> usize {
        self.landmarks
    }

    /// Shape of frame `index`.
    pub fn frame(&self, index: usize) -> &[[f64; 3]] {
        &self.points[index * self.landmarks..(index + 1) * self.landmarks]
    }

    /// All points, frame after frame.
    pub fn as_slice(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Per-landmark mean over frames.
    pub fn mean_shape(&self) -> Vec<[f64; 3]> {
        let frames = self.num_frames().max(1) as f64;
        let mut mean = vec![[0.0; 3]; self.landmarks];
        for frame in self.points.chunks_exact(self.landmarks) {
            for (m, p) in mean.iter_mut().zip(frame) {
                for axis in 0..3 {
                    m[axis] += p[axis] / frames;
                }
            }
        }
        mean
    }
}
