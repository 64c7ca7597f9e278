use crate::DataError;
use facecalib_optim::{
    ImageSize, LandmarkBatch, LandmarkSample, LandmarkScheme, LandmarkSource, Pose,
    FRAMES_PER_BATCH,
};
use facecalib_pnp::project_points;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// How the device is held, which fixes the image size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrientation {
    /// 480x640 pixels.
    #[default]
    Portrait,
    /// 640x480 pixels.
    Landscape,
}

impl ImageOrientation {
    /// Image size for this orientation.
    pub fn image_size(self) -> ImageSize {
        match self {
            ImageOrientation::Portrait => ImageSize {
                width: 480,
                height: 640,
            },
            ImageOrientation::Landscape => ImageSize {
                width: 640,
                height: 480,
            },
        }
    }
}

impl std::fmt::Display for ImageOrientation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ImageOrientation::Portrait => write!(f, "portrait"),
            ImageOrientation::Landscape => write!(f, "landscape"),
        }
    }
}

impl std::str::FromStr for ImageOrientation {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portrait" => Ok(ImageOrientation::Portrait),
            "landscape" => Ok(ImageOrientation::Landscape),
            _ => Err(DataError::InvalidConfig(format!(
                "unsupported orientation '{s}', expected portrait or landscape"
            ))),
        }
    }
}

/// Sampling ranges of the synthetic head sweep generator.
///
/// Every range is inclusive-exclusive `[min, max)`; translations are in
/// metres, rotations in radians around the camera axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Frames per sweep.
    pub frames: usize,
    /// Device orientation.
    pub orientation: ImageOrientation,
    /// Focal length range in pixels.
    pub focal: (f64, f64),
    /// Per-axis face scale range.
    pub scale: (f64, f64),
    /// Horizontal translation range.
    pub translation_x: (f64, f64),
    /// Vertical translation range.
    pub translation_y: (f64, f64),
    /// Distance range.
    pub translation_z: (f64, f64),
    /// Per-axis rotation range.
    pub rotation: (f64, f64),
    /// Standard deviation of the pixel noise added to every landmark.
    pub noise_std: f64,
    /// Pose pairs tried before giving up.
    pub max_pose_attempts: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frames: FRAMES_PER_BATCH,
            orientation: ImageOrientation::Portrait,
            focal: (300.0, 600.0),
            scale: (0.9, 1.1),
            translation_x: (-0.1, 0.1),
            translation_y: (-0.3, 0.3),
            translation_z: (0.3, 0.5),
            rotation: (0.0, 0.5),
            noise_std: 1.0,
            max_pose_attempts: 1000,
        }
    }
}

impl SyntheticConfig {
    /// Set the device orientation.
    pub fn with_orientation(mut self, orientation: ImageOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Draw every sweep with the same focal length.
    pub fn with_focal(mut self, focal: f64) -> Self {
        self.focal = (focal, focal);
        self
    }

    /// Set the pixel noise standard deviation.
    pub fn with_noise(mut self, noise_std: f64) -> Self {
        self.noise_std = noise_std;
        self
    }

    /// Set the number of frames per sweep.
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    fn validate(&self) -> Result<(), DataError> {
        let ranges = [
            ("focal", self.focal),
            ("scale", self.scale),
            ("translation_x", self.translation_x),
            ("translation_y", self.translation_y),
            ("translation_z", self.translation_z),
            ("rotation", self.rotation),
        ];
        for (name, (lo, hi)) in ranges {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(DataError::InvalidConfig(format!(
                    "{name} range [{lo}, {hi}] is empty"
                )));
            }
        }
        if self.focal.0 <= 0.0 || self.scale.0 <= 0.0 || self.translation_z.0 <= 0.0 {
            return Err(DataError::InvalidConfig(
                "focal, scale and distance must be positive".into(),
            ));
        }
        if self.frames == 0 || self.max_pose_attempts == 0 {
            return Err(DataError::InvalidConfig(
                "frames and max_pose_attempts must be > 0".into(),
            ));
        }
        if !(self.noise_std >= 0.0 && self.noise_std.is_finite()) {
            return Err(DataError::InvalidConfig(format!(
                "noise_std must be >= 0, got {}",
                self.noise_std
            )));
        }
        Ok(())
    }
}

/// A generated sweep together with the geometry that produced it.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    /// Noisy landmarks and the true focal length.
    pub sample: LandmarkSample,
    /// Scaled face in the face frame.
    pub face: Vec<[f64; 3]>,
    /// Head pose of every frame.
    pub poses: Vec<Pose>,
    /// True camera matrix.
    pub camera_matrix: [[f64; 3]; 3],
}

#[derive(Debug, Clone, Copy)]
struct HeadPose {
    translation: [f64; 3],
    angles: [f64; 3],
}

impl HeadPose {
    fn lerp(&self, other: &HeadPose, s: f64) -> HeadPose {
        let mix = |a: [f64; 3], b: [f64; 3]| std::array::from_fn(|i| a[i] + s * (b[i] - a[i]));
        HeadPose {
            translation: mix(self.translation, other.translation),
            angles: mix(self.angles, other.angles),
        }
    }

    fn to_pose(self) -> Pose {
        Pose {
            rotation: rotation_xyz(self.angles),
            translation: self.translation,
        }
    }
}

/// `Rx * Ry * Rz` for the given angles.
fn rotation_xyz([rx, ry, rz]: [f64; 3]) -> [[f64; 3]; 3] {
    let (sx, cx) = rx.sin_cos();
    let (sy, cy) = ry.sin_cos();
    let (sz, cz) = rz.sin_cos();
    [
        [cy * cz, -cy * sz, sy],
        [cx * sz + sx * sy * cz, cx * cz - sx * sy * sz, -sx * cy],
        [sx * sz - cx * sy * cz, sx * cz + cx * sy * sz, cx * cy],
    ]
}

fn uniform(rng: &mut StdRng, (lo, hi): (f64, f64)) -> f64 {
    if lo == hi {
        lo
    } else {
        rng.random_range(lo..hi)
    }
}

/// Generator of smooth synthetic head sweeps with a known focal length.
///
/// Each sample draws a focal length, an anisotropic face scale and a pair
/// of start and end head poses that keep every landmark inside the image,
/// then interpolates the poses linearly across the frames.
///
/// # Example
///
/// ```
/// use facecalib_data::{SyntheticConfig, SyntheticLoader};
/// use facecalib_optim::LandmarkSource;
///
/// let mut loader = SyntheticLoader::new(SyntheticConfig::default().with_frames(10), 42)?;
/// let sample = loader.sample(0)?;
/// assert_eq!(sample.landmarks.num_frames(), 10);
/// assert!(sample.focal_gt.is_some());
/// # Ok::<(), facecalib_data::DataError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SyntheticLoader {
    config: SyntheticConfig,
    seed: u64,
    noise: Option<Normal<f64>>,
}

impl SyntheticLoader {
    /// Create a generator. Samples are reproducible for a given seed and index.
    pub fn new(config: SyntheticConfig, seed: u64) -> Result<Self, DataError> {
        config.validate()?;
        let noise = if config.noise_std > 0.0 {
            let normal = Normal::new(0.0, config.noise_std)
                .map_err(|e| DataError::InvalidConfig(e.to_string()))?;
            Some(normal)
        } else {
            None
        };
        Ok(Self {
            config,
            seed,
            noise,
        })
    }

    /// Generator settings.
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Generate sample `index` with its ground-truth geometry.
    pub fn scene(&self, index: usize) -> Result<SyntheticScene, DataError> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index as u64));
        let cfg = &self.config;
        let image = cfg.orientation.image_size();
        let [cx, cy] = image.principal_point();

        let focal = uniform(&mut rng, cfg.focal);
        let k = [[focal, 0.0, cx], [0.0, focal, cy], [0.0, 0.0, 1.0]];

        let scale: [f64; 3] = std::array::from_fn(|_| uniform(&mut rng, cfg.scale));
        let face: Vec<[f64; 3]> = LandmarkScheme::Dlib68
            .canonical_points()
            .iter()
            .map(|p| [p[0] * scale[0], p[1] * scale[1], p[2] * scale[2]])
            .collect();

        let (start, end) = self.pose_pair(&mut rng, &face, &k, image)?;

        let frames = cfg.frames;
        let mut poses = Vec::with_capacity(frames);
        let mut points = Vec::with_capacity(frames * face.len());
        for i in 0..frames {
            let s = if frames > 1 {
                i as f64 / (frames - 1) as f64
            } else {
                0.0
            };
            let pose = start.lerp(&end, s).to_pose();
            let projected = project_points(&face, &pose.rotation, &pose.translation, &k);
            points.extend(projected.into_iter().map(|[u, v]| match &self.noise {
                Some(noise) => [u + noise.sample(&mut rng), v + noise.sample(&mut rng)],
                None => [u, v],
            }));
            poses.push(pose);
        }

        let landmarks = LandmarkBatch::new(frames, face.len(), points)?;
        Ok(SyntheticScene {
            sample: LandmarkSample {
                landmarks,
                image,
                focal_gt: Some(focal),
            },
            face,
            poses,
            camera_matrix: k,
        })
    }

    fn draw_pose(&self, rng: &mut StdRng) -> HeadPose {
        let cfg = &self.config;
        HeadPose {
            translation: [
                uniform(rng, cfg.translation_x),
                uniform(rng, cfg.translation_y),
                uniform(rng, cfg.translation_z),
            ],
            angles: std::array::from_fn(|_| uniform(rng, cfg.rotation)),
        }
    }

    fn pose_pair(
        &self,
        rng: &mut StdRng,
        face: &[[f64; 3]],
        k: &[[f64; 3]; 3],
        image: ImageSize,
    ) -> Result<(HeadPose, HeadPose), DataError> {
        let visible = |pose: &HeadPose| {
            let pose = pose.to_pose();
            project_points(face, &pose.rotation, &pose.translation, k)
                .iter()
                .all(|p| p[0] > 0.0 && p[1] > 0.0 && image.contains(p))
        };

        for attempt in 0..self.config.max_pose_attempts {
            let start = self.draw_pose(rng);
            let end = self.draw_pose(rng);
            if visible(&start) && visible(&end) {
                log::debug!("found a visible head pose pair after {} attempts", attempt + 1);
                return Ok((start, end));
            }
        }
        Err(DataError::NoValidPose {
            attempts: self.config.max_pose_attempts,
        })
    }
}

impl LandmarkSource for SyntheticLoader {
    type Error = DataError;

    fn num_samples(&self) -> Option<usize> {
        None
    }

    fn sample(&mut self, index: usize) -> Result<LandmarkSample, DataError> {
        Ok(self.scene(index)?.sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use facecalib_optim::{
        objective::reprojection_errors, solve_poses, IntrinsicPrediction, ShapePrediction,
    };
    use facecalib_pnp::EPnPParams;

    #[test]
    fn test_scene_stays_inside_image() -> Result<(), DataError> {
        let loader = SyntheticLoader::new(SyntheticConfig::default().with_noise(0.0), 3)?;
        let scene = loader.scene(0)?;
        let sample = &scene.sample;
        assert_eq!(sample.landmarks.num_frames(), 100);
        assert_eq!(sample.landmarks.num_landmarks(), 68);
        assert!(sample
            .landmarks
            .as_slice()
            .iter()
            .all(|p| sample.image.contains(p)));
        let f = sample.focal_gt.unwrap_or(0.0);
        assert!((300.0..600.0).contains(&f));
        Ok(())
    }

    #[test]
    fn test_samples_are_reproducible() -> Result<(), DataError> {
        let mut a = SyntheticLoader::new(SyntheticConfig::default(), 9)?;
        let mut b = SyntheticLoader::new(SyntheticConfig::default(), 9)?;
        assert_eq!(a.sample(4)?, b.sample(4)?);
        assert_ne!(a.sample(4)?, a.sample(5)?);
        Ok(())
    }

    #[test]
    fn test_true_geometry_reprojects_exactly() -> Result<(), DataError> {
        let config = SyntheticConfig::default().with_focal(450.0).with_noise(0.0);
        let scene = SyntheticLoader::new(config, 21)?.scene(0)?;
        let batch = &scene.sample.landmarks;
        assert_eq!(scene.camera_matrix[0][2], 240.0);
        assert_eq!(scene.camera_matrix[1][2], 320.0);

        let shape = ShapePrediction::broadcast(&scene.face, batch.num_frames())?;
        let intrinsics = IntrinsicPrediction::new(vec![450.0; batch.num_frames()], [240.0, 320.0]);
        let poses = solve_poses(&shape, batch, &intrinsics, &EPnPParams::default())?;
        assert_eq!(poses.num_solved(), batch.num_frames());

        for (i, error) in reprojection_errors(&shape, &poses, &intrinsics, batch)?
            .into_iter()
            .enumerate()
        {
            let error = error.unwrap_or(f64::INFINITY);
            assert!(error < 1e-3, "frame {i}: {error}px");
        }
        let recovered = poses.pose(0).map(|p| p.translation).unwrap_or_default();
        for axis in 0..3 {
            assert_relative_eq!(recovered[axis], scene.poses[0].translation[axis], epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_impossible_ranges_give_up() -> Result<(), DataError> {
        let mut config = SyntheticConfig::default();
        // face pushed far outside the image
        config.translation_x = (5.0, 6.0);
        config.max_pose_attempts = 20;
        let loader = SyntheticLoader::new(config, 0)?;
        assert!(matches!(
            loader.scene(0),
            Err(DataError::NoValidPose { attempts: 20 })
        ));
        Ok(())
    }

    #[test]
    fn test_orientation() -> Result<(), DataError> {
        assert_eq!("landscape".parse::<ImageOrientation>()?.image_size().width, 640);
        assert!("diagonal".parse::<ImageOrientation>().is_err());
        assert_eq!(ImageOrientation::Portrait.to_string(), "portrait");
        Ok(())
    }
}
