use facecalib_optim::{CalibError, LandmarkBatch, LandmarkScheme};
use facecalib_pnp::project_points;

pub const FOCAL_GT: f64 = 450.0;
pub const CENTER: [f64; 2] = [240.0, 320.0];

fn euler(rx: f64, ry: f64, rz: f64) -> [[f64; 3]; 3] {
    let (sx, cx) = rx.sin_cos();
    let (sy, cy) = ry.sin_cos();
    let (sz, cz) = rz.sin_cos();
    // Rx * Ry * Rz
    [
        [cy * cz, -cy * sz, sy],
        [cx * sz + sx * sy * cz, cx * cz - sx * sy * sz, -sx * cy],
        [sx * sz - cx * sy * cz, sx * cz + cx * sy * sz, cx * cy],
    ]
}

/// Noiseless head sweep of `frames` frames seen by a camera with focal `FOCAL_GT`.
pub fn head_sweep(frames: usize, face_scale: [f64; 3]) -> Result<LandmarkBatch, CalibError> {
    let face: Vec<[f64; 3]> = LandmarkScheme::Dlib68
        .canonical_points()
        .iter()
        .map(|p| [p[0] * face_scale[0], p[1] * face_scale[1], p[2] * face_scale[2]])
        .collect();
    let k = [
        [FOCAL_GT, 0.0, CENTER[0]],
        [0.0, FOCAL_GT, CENTER[1]],
        [0.0, 0.0, 1.0],
    ];

    let observed = (0..frames)
        .map(|i| {
            let s = i as f64 / (frames.max(2) - 1) as f64;
            let lerp = |a: f64, b: f64| a + s * (b - a);
            let r = euler(lerp(0.1, 0.3), lerp(-0.2, 0.2), lerp(0.05, -0.1));
            let t = [lerp(-0.05, 0.05), lerp(-0.1, 0.1), lerp(0.35, 0.45)];
            project_points(&face, &r, &t, &k)
        })
        .collect();
    LandmarkBatch::from_frames(observed)
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
