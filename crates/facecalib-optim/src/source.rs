use crate::batch::{ImageSize, LandmarkBatch};

/// One landmark batch with what is known about the camera that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSample {
    /// Observed landmarks.
    pub landmarks: LandmarkBatch,
    /// Image the landmarks were detected in.
    pub image: ImageSize,
    /// Ground-truth focal length, known for synthetic data only.
    pub focal_gt: Option<f64>,
}

/// Producer of landmark batches by index.
pub trait LandmarkSource {
    /// Error raised while producing a sample.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Number of samples, `None` for unbounded sources.
    fn num_samples(&self) -> Option<usize>;

    /// Produce sample `index`.
    fn sample(&mut self, index: usize) -> Result<LandmarkSample, Self::Error>;
}
