use crate::error::CalibError;
use serde::{Deserialize, Serialize};

/// Number of landmarks per frame in the dlib 68-point scheme.
pub const NUM_LANDMARKS: usize = 68;

/// Number of frames per training batch.
pub const FRAMES_PER_BATCH: usize = 100;

/// Fixed `(frames, landmarks)` contract of a landmark batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShape {
    /// Number of frames `M`.
    pub frames: usize,
    /// Number of landmarks per frame `N`.
    pub landmarks: usize,
}

impl Default for BatchShape {
    fn default() -> Self {
        Self {
            frames: FRAMES_PER_BATCH,
            landmarks: NUM_LANDMARKS,
        }
    }
}

impl std::fmt::Display for BatchShape {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}x{}", self.frames, self.landmarks)
    }
}

/// Size of the image the landmarks were detected in.
///
/// # Example
///
/// ```
/// use facecalib_optim::ImageSize;
///
/// let size = ImageSize { width: 480, height: 640 };
/// assert_eq!(size.principal_point(), [240.0, 320.0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            width: 480,
            height: 640,
        }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl ImageSize {
    /// Principal point `(cx, cy)` at the image centre.
    pub fn principal_point(&self) -> [f64; 2] {
        [self.width as f64 / 2.0, self.height as f64 / 2.0]
    }

    /// Whether a pixel lies inside the image.
    pub fn contains(&self, point: &[f64; 2]) -> bool {
        point[0] >= 0.0
            && point[1] >= 0.0
            && point[0] < self.width as f64
            && point[1] < self.height as f64
    }
}

/// A temporal batch of 2D landmark observations in pixel units.
///
/// Frames are stored contiguously, `landmarks` points per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkBatch {
    shape: BatchShape,
    points: Vec<[f64; 2]>,
}

impl LandmarkBatch {
    /// Create a batch from `frames * landmarks` contiguous points.
    pub fn new(frames: usize, landmarks: usize, points: Vec<[f64; 2]>) -> Result<Self, CalibError> {
        if frames == 0 || landmarks == 0 || points.len() != frames * landmarks {
            return Err(CalibError::ShapeMismatch {
                expected_frames: frames,
                expected_landmarks: landmarks,
                frames: if landmarks == 0 { 0 } else { points.len() / landmarks },
                landmarks,
            });
        }
        if let Some(index) = points.iter().position(|p| !(p[0].is_finite() && p[1].is_finite())) {
            return Err(CalibError::NonFiniteLandmark {
                frame: index / landmarks,
                landmark: index % landmarks,
            });
        }
        Ok(Self {
            shape: BatchShape { frames, landmarks },
            points,
        })
    }

    /// Create a batch from per-frame landmark lists of equal length.
    pub fn from_frames(frames: Vec<Vec<[f64; 2]>>) -> Result<Self, CalibError> {
        let landmarks = frames.first().map_or(0, Vec::len);
        if let Some(bad) = frames.iter().find(|f| f.len() != landmarks) {
            return Err(CalibError::ShapeMismatch {
                expected_frames: frames.len(),
                expected_landmarks: landmarks,
                frames: frames.len(),
                landmarks: bad.len(),
            });
        }
        let num_frames = frames.len();
        Self::new(num_frames, landmarks, frames.into_iter().flatten().collect())
    }

    /// Batch dimensions.
    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    /// Number of frames `M`.
    pub fn num_frames(&self) -> usize {
        self.shape.frames
    }

    /// Number of landmarks per frame `N`.
    pub fn num_landmarks(&self) -> usize {
        self.shape.landmarks
    }

    /// Landmarks of frame `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn frame(&self, index: usize) -> &[[f64; 2]] {
        let n = self.shape.landmarks;
        &self.points[index * n..(index + 1) * n]
    }

    /// Iterator over frames.
    pub fn frames(&self) -> std::slice::ChunksExact<'_, [f64; 2]> {
        self.points.chunks_exact(self.shape.landmarks)
    }

    /// All points, frame after frame.
    pub fn as_slice(&self) -> &[[f64; 2]] {
        &self.points
    }

    /// Fail fast unless the batch has exactly the expected dimensions.
    pub fn ensure_shape(&self, expected: BatchShape) -> Result<(), CalibError> {
        if self.shape != expected {
            return Err(CalibError::ShapeMismatch {
                expected_frames: expected.frames,
                expected_landmarks: expected.landmarks,
                frames: self.shape.frames,
                landmarks: self.shape.landmarks,
            });
        }
        Ok(())
    }

    /// Keep only the frames at `indices`, in that order.
    pub fn select_frames(&self, indices: &[usize]) -> Result<Self, CalibError> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.shape.frames) {
            return Err(CalibError::InvalidConfig(format!(
                "frame index {bad} out of range for {} frames",
                self.shape.frames
            )));
        }
        let points = indices
            .iter()
            .flat_map(|&i| self.frame(i).iter().copied())
            .collect();
        Self::new(indices.len(), self.shape.landmarks, points)
    }

    /// Network input: one row of `2N` centred coordinates per frame, scaled
    /// so that the image half-extent maps to one.
    pub fn normalized_features(&self, image: ImageSize) -> Vec<f64> {
        let [cx, cy] = image.principal_point();
        let scale = cx.max(cy).max(1.0);
        self.points
            .iter()
            .flat_map(|p| [(p[0] - cx) / scale, (p[1] - cy) / scale])
            .collect()
    }
}
