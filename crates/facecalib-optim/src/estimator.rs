use crate::batch::{BatchShape, ImageSize, LandmarkBatch};
use crate::device::Device;
use crate::error::CalibError;
use crate::landmarks::LandmarkScheme;
use crate::prediction::{IntrinsicPrediction, ShapePrediction};
use facecalib_nn::{Mlp, MlpTrace};
use serde::{Deserialize, Serialize};

/// A differentiable map from a landmark batch to per-frame intrinsics.
pub trait IntrinsicEstimator {
    /// Activations kept from the forward pass for the backward pass.
    type Trace;

    /// Predict intrinsics and record what the backward pass needs.
    fn forward(&self, batch: &LandmarkBatch)
        -> Result<(IntrinsicPrediction, Self::Trace), CalibError>;

    /// Gradient w.r.t. the flat parameters given the gradient w.r.t. each frame's focal length.
    fn backward(&self, trace: &Self::Trace, grad_focal: &[f64]) -> Result<Vec<f64>, CalibError>;

    /// Flat learnable parameters.
    fn params(&self) -> &[f64];

    /// Mutable flat learnable parameters.
    fn params_mut(&mut self) -> &mut [f64];

    /// Device holding the parameters.
    fn device(&self) -> Device {
        Device::Cpu
    }

    /// Predict intrinsics without keeping a trace.
    fn predict(&self, batch: &LandmarkBatch) -> Result<IntrinsicPrediction, CalibError> {
        Ok(self.forward(batch)?.0)
    }

    /// Replace all parameters.
    fn load_params(&mut self, params: &[f64]) -> Result<(), CalibError> {
        copy_params("intrinsic estimator parameters", self.params_mut(), params)
    }
}

/// A differentiable map from a landmark batch to per-frame 3D landmarks.
pub trait ShapeEstimator {
    /// Activations kept from the forward pass for the backward pass.
    type Trace;

    /// Predict shapes and record what the backward pass needs.
    fn forward(&self, batch: &LandmarkBatch) -> Result<(ShapePrediction, Self::Trace), CalibError>;

    /// Gradient w.r.t. the flat parameters given the gradient w.r.t. every predicted point.
    fn backward(&self, trace: &Self::Trace, grad_shape: &[[f64; 3]])
        -> Result<Vec<f64>, CalibError>;

    /// Flat learnable parameters.
    fn params(&self) -> &[f64];

    /// Mutable flat learnable parameters.
    fn params_mut(&mut self) -> &mut [f64];

    /// Device holding the parameters.
    fn device(&self) -> Device {
        Device::Cpu
    }

    /// Predict shapes without keeping a trace.
    fn predict(&self, batch: &LandmarkBatch) -> Result<ShapePrediction, CalibError> {
        Ok(self.forward(batch)?.0)
    }

    /// Replace all parameters.
    fn load_params(&mut self, params: &[f64]) -> Result<(), CalibError> {
        copy_params("shape estimator parameters", self.params_mut(), params)
    }
}

fn copy_params(what: &'static str, dst: &mut [f64], src: &[f64]) -> Result<(), CalibError> {
    if dst.len() != src.len() {
        return Err(facecalib_nn::NnError::SizeMismatch {
            what,
            expected: dst.len(),
            actual: src.len(),
        }
        .into());
    }
    dst.copy_from_slice(src);
    Ok(())
}

/// Configuration of [`CalibNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibNetConfig {
    /// Batch contract.
    pub batch: BatchShape,
    /// Image the landmarks live in.
    pub image: ImageSize,
    /// Width of the hidden layer.
    pub hidden_dim: usize,
    /// Focal length predicted by a fresh network, in pixels.
    pub initial_focal: f64,
    /// Seed of the weight initialisation.
    pub seed: u64,
}

impl Default for CalibNetConfig {
    fn default() -> Self {
        Self {
            batch: BatchShape::default(),
            image: ImageSize::default(),
            hidden_dim: 32,
            initial_focal: 500.0,
            seed: 0,
        }
    }
}

impl CalibNetConfig {
    /// Set the batch contract and image size.
    pub fn with_input(mut self, batch: BatchShape, image: ImageSize) -> Self {
        self.batch = batch;
        self.image = image;
        self
    }

    /// Set the focal length a fresh network predicts.
    pub fn with_initial_focal(mut self, initial_focal: f64) -> Self {
        self.initial_focal = initial_focal;
        self
    }

    /// Set the initialisation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Focal-length regressor `f = f0 * exp(mlp(x))`.
///
/// The log parameterisation keeps every prediction strictly positive.
#[derive(Debug, Clone)]
pub struct CalibNet {
    config: CalibNetConfig,
    mlp: Mlp,
}

/// Forward activations of [`CalibNet`].
#[derive(Debug, Clone)]
pub struct CalibTrace {
    mlp: MlpTrace,
    focals: Vec<f64>,
}

impl CalibNet {
    /// Build a freshly initialised network.
    pub fn new(config: CalibNetConfig) -> Result<Self, CalibError> {
        if !(config.initial_focal.is_finite() && config.initial_focal > 0.0) {
            return Err(CalibError::InvalidConfig(format!(
                "initial focal length must be positive, got {}",
                config.initial_focal
            )));
        }
        if config.hidden_dim == 0 {
            return Err(CalibError::InvalidConfig("hidden_dim must be > 0".into()));
        }
        let mlp = Mlp::new(
            2 * config.batch.landmarks,
            config.hidden_dim,
            1,
            config.seed,
        );
        Ok(Self { config, mlp })
    }

    /// Network configuration.
    pub fn config(&self) -> &CalibNetConfig {
        &self.config
    }
}

impl IntrinsicEstimator for CalibNet {
    type Trace = CalibTrace;

    fn forward(
        &self,
        batch: &LandmarkBatch,
    ) -> Result<(IntrinsicPrediction, Self::Trace), CalibError> {
        batch.ensure_shape(self.config.batch)?;
        let features = batch.normalized_features(self.config.image);
        let mlp = self.mlp.forward(&features, batch.num_frames())?;
        let focals: Vec<f64> = mlp
            .output()
            .iter()
            .map(|z| self.config.initial_focal * z.exp())
            .collect();
        let prediction =
            IntrinsicPrediction::new(focals.clone(), self.config.image.principal_point());
        Ok((prediction, CalibTrace { mlp, focals }))
    }

    fn backward(&self, trace: &Self::Trace, grad_focal: &[f64]) -> Result<Vec<f64>, CalibError> {
        // df/dz = f
        let grad_z: Vec<f64> = grad_focal
            .iter()
            .zip(trace.focals.iter())
            .map(|(g, f)| g * f)
            .collect();
        Ok(self.mlp.backward(&trace.mlp, &grad_z)?)
    }

    fn params(&self) -> &[f64] {
        self.mlp.params()
    }

    fn params_mut(&mut self) -> &mut [f64] {
        self.mlp.params_mut()
    }
}

/// Configuration of [`SfmNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SfmNetConfig {
    /// Batch contract.
    pub batch: BatchShape,
    /// Image the landmarks live in.
    pub image: ImageSize,
    /// Canonical face the network deforms.
    pub scheme: LandmarkScheme,
    /// Width of the hidden layer.
    pub hidden_dim: usize,
    /// Metres per unit of network output.
    pub shape_scale: f64,
    /// Seed of the weight initialisation.
    pub seed: u64,
}

impl Default for SfmNetConfig {
    fn default() -> Self {
        Self {
            batch: BatchShape::default(),
            image: ImageSize::default(),
            scheme: LandmarkScheme::Dlib68,
            hidden_dim: 64,
            shape_scale: 0.01,
            seed: 1,
        }
    }
}

impl SfmNetConfig {
    /// Set the batch contract and image size.
    pub fn with_input(mut self, batch: BatchShape, image: ImageSize) -> Self {
        self.batch = batch;
        self.image = image;
        self
    }

    /// Set the initialisation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Shape regressor `S = S_mean + scale * mlp(x)` around the canonical face.
#[derive(Debug, Clone)]
pub struct SfmNet {
    config: SfmNetConfig,
    mlp: Mlp,
}

impl SfmNet {
    /// Build a freshly initialised network.
    pub fn new(config: SfmNetConfig) -> Result<Self, CalibError> {
        if config.scheme.len() != config.batch.landmarks {
            return Err(CalibError::InvalidConfig(format!(
                "{:?} has {} landmarks, batch expects {}",
                config.scheme,
                config.scheme.len(),
                config.batch.landmarks
            )));
        }
        if config.hidden_dim == 0 || !(config.shape_scale > 0.0) {
            return Err(CalibError::InvalidConfig(
                "hidden_dim and shape_scale must be positive".into(),
            ));
        }
        let n = config.batch.landmarks;
        let mlp = Mlp::new(2 * n, config.hidden_dim, 3 * n, config.seed);
        Ok(Self { config, mlp })
    }

    /// Network configuration.
    pub fn config(&self) -> &SfmNetConfig {
        &self.config
    }
}

impl ShapeEstimator for SfmNet {
    type Trace = MlpTrace;

    fn forward(&self, batch: &LandmarkBatch) -> Result<(ShapePrediction, Self::Trace), CalibError> {
        batch.ensure_shape(self.config.batch)?;
        let features = batch.normalized_features(self.config.image);
        let trace = self.mlp.forward(&features, batch.num_frames())?;

        let canonical = self.config.scheme.canonical_points();
        let scale = self.config.shape_scale;
        let points = trace
            .output()
            .chunks_exact(3 * canonical.len())
            .flat_map(|row| {
                canonical.iter().zip(row.chunks_exact(3)).map(|(c, d)| {
                    [
                        c[0] + scale * d[0],
                        c[1] + scale * d[1],
                        c[2] + scale * d[2],
                    ]
                })
            })
            .collect();
        Ok((ShapePrediction::new(canonical.len(), points)?, trace))
    }

    fn backward(
        &self,
        trace: &Self::Trace,
        grad_shape: &[[f64; 3]],
    ) -> Result<Vec<f64>, CalibError> {
        let scale = self.config.shape_scale;
        let grad_out: Vec<f64> = grad_shape.iter().flatten().map(|g| g * scale).collect();
        Ok(self.mlp.backward(trace, &grad_out)?)
    }

    fn params(&self) -> &[f64] {
        self.mlp.params()
    }

    fn params_mut(&mut self) -> &mut [f64] {
        self.mlp.params_mut()
    }
}
