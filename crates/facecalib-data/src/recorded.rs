use crate::mediapipe::{face_blaze_to_dlib, FACE_MESH_IRIS_LANDMARKS, FACE_MESH_LANDMARKS};
use crate::DataError;
use facecalib_optim::{ImageSize, LandmarkBatch, LandmarkSample, NUM_LANDMARKS};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, DataError> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|source| DataError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Landmark tracks captured on a device.
///
/// Frames hold either 68 landmarks already in the target layout or raw
/// face-mesh output, which is converted on the fly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedLandmarks {
    /// Size of the captured images.
    pub image: ImageSize,
    /// Landmarks of every captured frame, in pixels.
    pub frames: Vec<Vec<[f64; 2]>>,
}

impl RecordedLandmarks {
    /// Read a JSON recording.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let recording: Self = read_json(path.as_ref())?;
        log::info!(
            "loaded {} frames of {} from {}",
            recording.frames.len(),
            recording.image,
            path.as_ref().display()
        );
        Ok(recording)
    }

    /// Write the recording as JSON.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), DataError> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| DataError::Parse {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Convert the frames at `indices`, or every frame, into a 68-point batch.
    pub fn to_batch(&self, indices: Option<&[usize]>) -> Result<LandmarkBatch, DataError> {
        let all: Vec<usize>;
        let indices = match indices {
            Some(indices) => indices,
            None => {
                all = (0..self.frames.len()).collect();
                &all
            }
        };

        let mut frames = Vec::with_capacity(indices.len());
        for &index in indices {
            let frame = self.frames.get(index).ok_or_else(|| {
                DataError::InvalidConfig(format!(
                    "frame {index} out of range for {} frames",
                    self.frames.len()
                ))
            })?;
            let landmarks = match frame.len() {
                NUM_LANDMARKS => frame.clone(),
                FACE_MESH_LANDMARKS | FACE_MESH_IRIS_LANDMARKS => face_blaze_to_dlib(frame, self.image)?,
                count => return Err(DataError::LandmarkCount { frame: index, count }),
            };
            frames.push(landmarks);
        }
        Ok(LandmarkBatch::from_frames(frames)?)
    }

    /// The recording as a sample without ground truth.
    pub fn to_sample(&self, indices: Option<&[usize]>) -> Result<LandmarkSample, DataError> {
        Ok(LandmarkSample {
            landmarks: self.to_batch(indices)?,
            image: self.image,
            focal_gt: None,
        })
    }
}

/// Camera matrix from a conventional target-based calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthCamera {
    /// Row-major camera matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// Lens distortion coefficients, if measured.
    #[serde(default)]
    pub distortion: Vec<f64>,
    /// Resolution the calibration was done at.
    #[serde(default)]
    pub resolution: Option<ImageSize>,
    /// RMS reprojection error of the calibration, pixels.
    #[serde(default)]
    pub reprojection_error: Option<f64>,
}

/// Differences between an estimated and a reference camera matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraComparison {
    /// `|f_est - f_ref| / f_ref`, focal lengths averaged over both axes.
    pub focal_error: f64,
    /// Distance between principal points, pixels.
    pub principal_point_error: f64,
}

impl GroundTruthCamera {
    /// Read a JSON calibration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DataError> {
        read_json(path.as_ref())
    }

    /// Mean of the two focal lengths.
    pub fn focal(&self) -> f64 {
        0.5 * (self.camera_matrix[0][0] + self.camera_matrix[1][1])
    }

    /// Compare an estimated camera matrix against this one.
    pub fn compare(&self, estimate: &[[f64; 3]; 3]) -> CameraComparison {
        let focal = 0.5 * (estimate[0][0] + estimate[1][1]);
        let dx = estimate[0][2] - self.camera_matrix[0][2];
        let dy = estimate[1][2] - self.camera_matrix[1][2];
        CameraComparison {
            focal_error: (focal - self.focal()).abs() / self.focal(),
            principal_point_error: dx.hypot(dy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recording_round_trip_and_subset() -> Result<(), DataError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("recording.json");
        let image = ImageSize {
            width: 640,
            height: 480,
        };
        let recording = RecordedLandmarks {
            image,
            frames: vec![
                (0..68).map(|i| [i as f64, 1.0]).collect(),
                (0..478).map(|i| [i as f64, 2.0]).collect(),
                (0..68).map(|i| [i as f64, 3.0]).collect(),
            ],
        };
        recording.to_path(&path)?;
        let loaded = RecordedLandmarks::from_path(&path)?;
        assert_eq!(loaded, recording);

        let batch = loaded.to_batch(Some(&[2, 1]))?;
        assert_eq!(batch.num_frames(), 2);
        assert_eq!(batch.frame(0)[5], [5.0, 3.0]);
        // mesh frames are mirrored into the 68-point convention
        assert_eq!(batch.frame(1)[0], [640.0 - 127.0, 478.0]);

        assert_eq!(loaded.to_sample(None)?.landmarks.num_frames(), 3);
        assert!(loaded.to_batch(Some(&[3])).is_err());
        Ok(())
    }

    #[test]
    fn test_bad_landmark_count() {
        let recording = RecordedLandmarks {
            image: ImageSize::default(),
            frames: vec![vec![[0.0, 0.0]; 10]],
        };
        assert!(matches!(
            recording.to_batch(None),
            Err(DataError::LandmarkCount { frame: 0, count: 10 })
        ));
    }

    #[test]
    fn test_camera_comparison() -> Result<(), DataError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("camera.json");
        std::fs::write(
            &path,
            r#"{"camera_matrix": [[500.0, 0.0, 320.0], [0.0, 500.0, 240.0], [0.0, 0.0, 1.0]]}"#,
        )?;
        let reference = GroundTruthCamera::from_path(&path)?;
        assert!(reference.distortion.is_empty());

        let estimate = [[450.0, 0.0, 323.0], [0.0, 450.0, 244.0], [0.0, 0.0, 1.0]];
        let cmp = reference.compare(&estimate);
        assert_relative_eq!(cmp.focal_error, 0.1);
        assert_relative_eq!(cmp.principal_point_error, 5.0);

        std::fs::write(&path, "{ not json")?;
        assert!(matches!(
            GroundTruthCamera::from_path(&path),
            Err(DataError::Parse { .. })
        ));
        Ok(())
    }
}
