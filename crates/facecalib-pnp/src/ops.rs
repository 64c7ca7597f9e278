use glam::{DMat3, DQuat, DVec3};
use nalgebra::{Matrix3, Matrix6x4, SymmetricEigen, Vector6};

const MAX_GN_ITERATIONS: usize = 5;

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[DVec3]) -> DVec3 {
    let n = pts.len() as f64;
    pts.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / n
}

/// Principal axes of a point set sorted by decreasing standard deviation.
///
/// Returns `(sigma, axis)` pairs where `sigma` is the standard deviation of the
/// points along the unit `axis`.
pub(crate) fn principal_axes(pts: &[DVec3], centroid: DVec3) -> [(f64, DVec3); 3] {
    let n = pts.len() as f64;
    let mut cov = Matrix3::<f64>::zeros();
    for p in pts {
        let d = *p - centroid;
        let d = nalgebra::Vector3::new(d.x, d.y, d.z);
        cov += d * d.transpose();
    }
    cov /= n;

    let eig = SymmetricEigen::new(cov);
    let mut axes: Vec<(f64, DVec3)> = (0..3)
        .map(|i| {
            let v = eig.eigenvectors.column(i);
            (
                eig.eigenvalues[i].max(0.0).sqrt(),
                DVec3::new(v[0], v[1], v[2]),
            )
        })
        .collect();
    axes.sort_by(|a, b| b.0.total_cmp(&a.0));

    [axes[0], axes[1], axes[2]]
}

/// Convert a row-major 3x3 array to a glam matrix.
pub(crate) fn mat3_from_rows(m: &[[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m[0][0], m[1][0], m[2][0]),
        DVec3::new(m[0][1], m[1][1], m[2][1]),
        DVec3::new(m[0][2], m[1][2], m[2][2]),
    )
}

/// Convert a glam matrix to a row-major 3x3 array.
pub(crate) fn mat3_to_rows(m: &DMat3) -> [[f64; 3]; 3] {
    [m.row(0).to_array(), m.row(1).to_array(), m.row(2).to_array()]
}

/// Rodrigues axis-angle vector of a row-major rotation matrix.
pub fn rotation_to_rvec(rotation: &[[f64; 3]; 3]) -> [f64; 3] {
    let q = DQuat::from_mat3(&mat3_from_rows(rotation));
    let (axis, angle) = q.to_axis_angle();
    (axis * angle).to_array()
}

/// Project world points through a rigid transform and a pinhole camera matrix.
///
/// # Arguments
///
/// * `world` - 3D points in the world frame.
/// * `rotation` - Row-major world to camera rotation.
/// * `translation` - World to camera translation.
/// * `k` - Row-major camera intrinsics matrix.
///
/// # Returns
///
/// Pixel coordinates of each point. Points on the camera plane project to infinity.
pub fn project_points(
    world: &[[f64; 3]],
    rotation: &[[f64; 3]; 3],
    translation: &[f64; 3],
    k: &[[f64; 3]; 3],
) -> Vec<[f64; 2]> {
    let r = mat3_from_rows(rotation);
    let t = DVec3::from_array(*translation);
    let (fx, fy, cx, cy) = (k[0][0], k[1][1], k[0][2], k[1][2]);
    world
        .iter()
        .map(|p| {
            let pc = r * DVec3::from_array(*p) + t;
            let inv_z = 1.0 / pc.z;
            [fx * pc.x * inv_z + cx, fy * pc.y * inv_z + cy]
        })
        .collect()
}

/// Expand the beta vector into the ten quadratic monomials used by the L matrix.
#[inline]
fn beta_monomials(b: &[f64; 4]) -> [f64; 10] {
    [
        b[0] * b[0],
        b[0] * b[1],
        b[1] * b[1],
        b[0] * b[2],
        b[1] * b[2],
        b[2] * b[2],
        b[0] * b[3],
        b[1] * b[3],
        b[2] * b[3],
        b[3] * b[3],
    ]
}

/// Gauss-Newton refinement of the betas so that the distances between the
/// camera-frame control points match the world-frame distances `rho`.
pub(crate) fn gauss_newton(beta_init: [f64; 4], l: &[[f64; 10]; 6], rho: &[f64; 6]) -> [f64; 4] {
    let mut b = beta_init;

    for _ in 0..MAX_GN_ITERATIONS {
        let mut a = Matrix6x4::<f64>::zeros();
        let mut r = Vector6::<f64>::zeros();
        let mono = beta_monomials(&b);

        for (i, row) in l.iter().enumerate() {
            a[(i, 0)] = 2.0 * row[0] * b[0] + row[1] * b[1] + row[3] * b[2] + row[6] * b[3];
            a[(i, 1)] = row[1] * b[0] + 2.0 * row[2] * b[1] + row[4] * b[2] + row[7] * b[3];
            a[(i, 2)] = row[3] * b[0] + row[4] * b[1] + 2.0 * row[5] * b[2] + row[8] * b[3];
            a[(i, 3)] = row[6] * b[0] + row[7] * b[1] + row[8] * b[2] + 2.0 * row[9] * b[3];
            let predicted: f64 = row.iter().zip(mono.iter()).map(|(x, y)| x * y).sum();
            r[i] = rho[i] - predicted;
        }

        let Ok(delta) = a.svd(true, true).solve(&r, 1e-12) else {
            break;
        };
        for (bi, di) in b.iter_mut().zip(delta.iter()) {
            *bi += di;
        }
        if delta.norm() < 1e-12 {
            break;
        }
    }

    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compute_centroid() {
        let pts = [
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(4.0, 5.0, 6.0),
            DVec3::new(7.0, 8.0, 9.0),
        ];
        let c = compute_centroid(&pts);
        assert_eq!(c, DVec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_principal_axes_sorted() {
        let pts = [
            DVec3::new(-2.0, 0.0, 0.0),
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::new(0.0, -1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, -0.5),
            DVec3::new(0.0, 0.0, 0.5),
        ];
        let axes = principal_axes(&pts, compute_centroid(&pts));
        assert!(axes[0].0 > axes[1].0 && axes[1].0 > axes[2].0);
        assert_relative_eq!(axes[0].1.x.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(axes[2].1.z.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rotation_to_rvec_about_z() {
        let angle: f64 = 0.3;
        let r = [
            [angle.cos(), -angle.sin(), 0.0],
            [angle.sin(), angle.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let rvec = rotation_to_rvec(&r);
        assert_relative_eq!(rvec[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(rvec[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(rvec[2], angle, epsilon = 1e-9);
    }

    #[test]
    fn test_gauss_newton_keeps_exact_solution() {
        // a single null-space direction whose pairwise distances already match rho
        let l = [[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]; 6];
        let rho = [4.0; 6];
        let b = gauss_newton([2.0, 0.0, 0.0, 0.0], &l, &rho);
        assert_relative_eq!(b[0], 2.0, epsilon = 1e-12);
    }
}
