use crate::DataError;
use facecalib_optim::ImageSize;

/// Face-mesh index of every landmark of the 68-point layout, in layout order.
#[rustfmt::skip]
pub const DLIB_FROM_FACE_MESH: [usize; 68] = [
    // jaw line
    127, 234, 93, 132, 58, 172, 150, 176, 152, 400, 379, 397,
    288, 361, 323, 454, 356,
    // right eyebrow
    70, 63, 105, 66, 107,
    // left eyebrow
    336, 296, 334, 293, 300,
    // nose
    168, 197, 5, 1, 98, 97, 2, 326, 327,
    // right eye
    33, 160, 158, 133, 153, 144,
    // left eye
    362, 385, 387, 263, 373, 380,
    // outer lips
    61, 40, 37, 0, 267, 270, 291, 321, 314, 17, 84, 91,
    // inner lips
    78, 82, 13, 312, 308, 317, 14, 87,
];

/// Landmark count of the face mesh without iris points.
pub const FACE_MESH_LANDMARKS: usize = 468;

/// Landmark count of the face mesh with iris points.
pub const FACE_MESH_IRIS_LANDMARKS: usize = 478;

/// Pick the 68-point layout out of one frame of face-mesh landmarks.
///
/// Face-mesh pixel coordinates are mirrored along both axes relative to
/// the 68-point convention, so every point is mapped to `(w - x, h - y)`.
///
/// # Example
///
/// ```
/// use facecalib_data::mediapipe::face_blaze_to_dlib;
/// use facecalib_optim::ImageSize;
///
/// let mesh = vec![[100.0, 50.0]; 478];
/// let image = ImageSize { width: 640, height: 480 };
/// let dlib = face_blaze_to_dlib(&mesh, image)?;
/// assert_eq!(dlib.len(), 68);
/// assert_eq!(dlib[0], [540.0, 430.0]);
/// # Ok::<(), facecalib_data::DataError>(())
/// ```
pub fn face_blaze_to_dlib(mesh: &[[f64; 2]], image: ImageSize) -> Result<Vec<[f64; 2]>, DataError> {
    if mesh.len() != FACE_MESH_LANDMARKS && mesh.len() != FACE_MESH_IRIS_LANDMARKS {
        return Err(DataError::LandmarkCount {
            frame: 0,
            count: mesh.len(),
        });
    }
    let (w, h) = (image.width as f64, image.height as f64);
    Ok(DLIB_FROM_FACE_MESH
        .iter()
        .map(|&i| [w - mesh[i][0], h - mesh[i][1]])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_indices_are_unique_and_in_mesh() {
        let mut sorted = DLIB_FROM_FACE_MESH.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 68);
        assert!(sorted.iter().all(|&i| i < FACE_MESH_LANDMARKS));
    }

    #[test]
    fn test_face_blaze_to_dlib() -> Result<(), DataError> {
        let image = ImageSize {
            width: 640,
            height: 480,
        };
        let mesh: Vec<[f64; 2]> = (0..468).map(|i| [i as f64, 2.0 * i as f64]).collect();
        let dlib = face_blaze_to_dlib(&mesh, image)?;
        // chin is mesh point 152
        assert_eq!(dlib[8], [640.0 - 152.0, 480.0 - 304.0]);
        // nose tip is mesh point 1
        assert_eq!(dlib[30], [639.0, 478.0]);

        assert!(matches!(
            face_blaze_to_dlib(&mesh[..100], image),
            Err(DataError::LandmarkCount { count: 100, .. })
        ));
        Ok(())
    }
}
