//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: [Lepetit et al., IJCV 2009](https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf)
//! Reference: [OpenCV EPnP implementation](https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp)

use crate::ops::{
    compute_centroid, gauss_newton, mat3_from_rows, mat3_to_rows, principal_axes, rotation_to_rvec,
};
use crate::rigid::umeyama;
use crate::{NumericTol, PnPError, PnPResult};
use glam::{DMat3, DVec3};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
}

impl EPnPParams {
    /// Set the minimum principal spread ratio below which points count as coplanar.
    pub fn with_planarity(mut self, planarity: f64) -> Self {
        self.tol.planarity = planarity;
        self
    }

    /// Set the minimum accepted focal length.
    pub fn with_min_focal(mut self, min_focal: f64) -> Self {
        self.tol.min_focal = min_focal;
        self
    }
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `points_world` – 3-D coordinates in the world frame, shape *(N,3)* with `N≥4`.
/// * `points_image` – Corresponding pixel coordinates, shape *(N,2)*.
/// * `k` – Camera intrinsics matrix (row-major).
///
/// # Returns
/// A [`PnPResult`] with
/// - `rotation`: 3×3 rotation, mapping from world → camera
/// - `translation`: 3-vector translation
/// - `rvec`: Rodrigues axis-angle representation of the rotation
///
/// Degenerate inputs (near-zero focal length, coplanar or collinear points) are
/// reported as errors instead of producing a pose.
pub fn solve_epnp(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    let n = points_world.len();
    if n != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: n,
            right_name: "image points",
            right_len: points_image.len(),
        });
    }
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }
    check_intrinsics(k, &params.tol)?;

    let world: Vec<DVec3> = points_world.iter().map(|p| DVec3::from_array(*p)).collect();
    if world.iter().any(|p| !p.is_finite())
        || points_image.iter().flatten().any(|v| !v.is_finite())
    {
        return Err(PnPError::NonFinite);
    }

    let cw = select_control_points(&world, &params.tol)?;
    let alphas = compute_barycentric(&world, &cw);

    // Build the 2N×12 design matrix M
    let m_rows = build_m(&alphas, points_image, k)?;
    let m_flat: Vec<f64> = m_rows.iter().flat_map(|row| row.iter()).cloned().collect();
    let m_mat = DMatrix::<f64>::from_row_slice(2 * n, 12, &m_flat);

    // Null-space of M via eigen decomposition of MtM (12×12)
    let mtm = m_mat.transpose() * &m_mat;
    let eig = mtm.symmetric_eigen();

    let mut order: Vec<(f64, usize)> = eig
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(index, value)| (value.abs(), index))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    // column i holds the eigenvector of the i-th smallest eigenvalue
    let null4 = DMatrix::from_columns(&[
        eig.eigenvectors.column(order[0].1),
        eig.eigenvectors.column(order[1].1),
        eig.eigenvectors.column(order[2].1),
        eig.eigenvectors.column(order[3].1),
    ]);

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::<f64>::from_column_slice(&rho);

    let candidates: Vec<[f64; 4]> = [
        estimate_beta_6x4(&l, &rho_vec, params.tol.svd),
        estimate_beta_6x3(&l, &rho_vec, params.tol.svd),
        estimate_beta_6x5(&l, &rho_vec, params.tol.svd),
    ]
    .into_iter()
    .flatten()
    .map(|b| gauss_newton(b, &l, &rho))
    .collect();

    let mut best: Option<(f64, DMat3, DVec3)> = None;
    for betas in &candidates {
        let Some((r, t)) = pose_from_betas(betas, &null4, &alphas, &world)? else {
            continue;
        };
        let Some(err) = rmse_px(&world, points_image, &r, &t, k) else {
            continue;
        };
        if best.as_ref().is_none_or(|(best_err, _, _)| err < *best_err) {
            best = Some((err, r, t));
        }
    }

    let Some((best_err, best_r, best_t)) = best else {
        return Err(PnPError::NoValidCandidate);
    };
    if !best_err.is_finite() || !best_r.is_finite() || !best_t.is_finite() {
        return Err(PnPError::NonFinite);
    }

    let rotation = mat3_to_rows(&best_r);
    Ok(PnPResult {
        rotation,
        translation: best_t.to_array(),
        rvec: rotation_to_rvec(&rotation),
        reproj_rmse: Some(best_err),
    })
}

fn check_intrinsics(k: &[[f64; 3]; 3], tol: &NumericTol) -> Result<(), PnPError> {
    let (fx, fy) = (k[0][0], k[1][1]);
    let finite = k.iter().flatten().all(|v| v.is_finite());
    if !finite || fx.abs() < tol.min_focal || fy.abs() < tol.min_focal {
        return Err(PnPError::DegenerateIntrinsics {
            fx,
            fy,
            min_focal: tol.min_focal,
        });
    }
    Ok(())
}

/// Centroid plus one control point per principal axis, scaled by the spread
/// of the points along that axis.
fn select_control_points(points_world: &[DVec3], tol: &NumericTol) -> Result<[DVec3; 4], PnPError> {
    let c = compute_centroid(points_world);
    let axes = principal_axes(points_world, c);

    let largest = axes[0].0;
    let smallest = axes[2].0;
    let ratio = if largest > 0.0 { smallest / largest } else { 0.0 };
    if !(ratio >= tol.planarity) {
        return Err(PnPError::DegenerateConfiguration {
            ratio,
            threshold: tol.planarity,
        });
    }

    let mut cw = [c; 4];
    for (i, (sigma, axis)) in axes.iter().enumerate() {
        cw[i + 1] = c + *axis * *sigma;
    }
    Ok(cw)
}

/// Compute barycentric coordinates of world-space points with respect to the
/// 4 control points returned by `select_control_points`.
///
/// # Returns
/// `Vec<[f64; 4]>` of length `N`. For each point, the weights `[a0, a1, a2, a3]` satisfy
/// `a0 + a1 + a2 + a3 = 1` and `pw_i = sum_j(a_j * Cw_j)`.
fn compute_barycentric(points_world: &[DVec3], cw: &[DVec3; 4]) -> Vec<[f64; 4]> {
    // the control points span the principal axes, so B is well conditioned
    // once the planarity check passed
    let b = DMat3::from_cols(cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]);
    let b_inv = b.inverse();

    points_world
        .iter()
        .map(|&p| {
            let lamb = b_inv * (p - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect()
}

/// Construct the 2N x 12 design matrix `M` used by EPnP.
///
/// Two rows per correspondence; each row is the 12-vector multiplying the
/// stacked camera-frame control points.
fn build_m(
    alphas: &[[f64; 4]],
    points_image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
) -> Result<Vec<[f64; 12]>, PnPError> {
    if alphas.len() != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "barycentric alphas",
            left_len: alphas.len(),
            right_name: "image points",
            right_len: points_image.len(),
        });
    }
    let n = alphas.len();

    let fu = k[0][0];
    let fv = k[1][1];
    let uc = k[0][2];
    let vc = k[1][2];

    let mut m = vec![[0.0f64; 12]; 2 * n];

    for (i, (a, uv)) in alphas.iter().zip(points_image.iter()).enumerate() {
        let (u, v) = (uv[0], uv[1]);
        let row_x = 2 * i;
        let row_y = row_x + 1;

        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[row_x][base] = alpha * fu;
            m[row_x][base + 2] = alpha * (uc - u);
            m[row_y][base + 1] = alpha * fv;
            m[row_y][base + 2] = alpha * (vc - v);
        }
    }

    Ok(m)
}

/// Build the 6×10 matrix **L** from the 12×4 null-space basis.
///
/// Columns follow the monomial order `[b00, b01, b11, b02, b12, b22, b03, b13, b23, b33]`.
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let mut l = [[0.0f64; 10]; 6];

    for (row, &(a, b)) in l.iter_mut().zip(CP_PAIRS.iter()) {
        let mut d = [DVec3::ZERO; 4];
        for (k, dk) in d.iter_mut().enumerate() {
            let col = null4.column(k);
            *dk = DVec3::new(
                col[3 * a] - col[3 * b],
                col[3 * a + 1] - col[3 * b + 1],
                col[3 * a + 2] - col[3 * b + 2],
            );
        }

        *row = [
            d[0].dot(d[0]),
            2.0 * d[0].dot(d[1]),
            d[1].dot(d[1]),
            2.0 * d[0].dot(d[2]),
            2.0 * d[1].dot(d[2]),
            d[2].dot(d[2]),
            2.0 * d[0].dot(d[3]),
            2.0 * d[1].dot(d[3]),
            2.0 * d[2].dot(d[3]),
            d[3].dot(d[3]),
        ];
    }
    l
}

/// Extracts a 6×k `DMatrix` by picking the specified columns from the 6×10 `L` matrix.
fn l_submatrix(l: &[[f64; 10]; 6], cols: &[usize]) -> DMatrix<f64> {
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    DMatrix::<f64>::from_column_slice(6, cols.len(), &data)
}

fn solve_subset(l: &[[f64; 10]; 6], cols: &[usize], rho: &DVector<f64>, tol_svd: f64) -> Option<DVector<f64>> {
    let l_sub = l_submatrix(l, cols);
    let x = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Betas for `N = 4`: approximates `[b00, b01, b02, b03]`.
fn estimate_beta_6x4(l: &[[f64; 10]; 6], rho: &DVector<f64>, tol_svd: f64) -> Option<[f64; 4]> {
    let x = solve_subset(l, &[0, 1, 3, 6], rho, tol_svd)?;
    if x[0] < 0.0 {
        let s = (-x[0]).sqrt();
        Some([s, -x[1] / s, -x[2] / s, -x[3] / s])
    } else if x[0] > 0.0 {
        let s = x[0].sqrt();
        Some([s, x[1] / s, x[2] / s, x[3] / s])
    } else {
        None
    }
}

/// Betas for `N = 2`: approximates `[b00, b01, b11]`.
fn estimate_beta_6x3(l: &[[f64; 10]; 6], rho: &DVector<f64>, tol_svd: f64) -> Option<[f64; 4]> {
    let x = solve_subset(l, &[0, 1, 2], rho, tol_svd)?;
    let mut beta = [0.0; 4];
    if x[0] < 0.0 {
        beta[0] = (-x[0]).sqrt();
        beta[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
    } else {
        beta[0] = x[0].sqrt();
        beta[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
    }
    if x[1] < 0.0 {
        beta[0] = -beta[0];
    }
    Some(beta)
}

/// Betas for `N = 3`: approximates `[b00, b01, b11, b02, b12]`.
fn estimate_beta_6x5(l: &[[f64; 10]; 6], rho: &DVector<f64>, tol_svd: f64) -> Option<[f64; 4]> {
    let x = solve_subset(l, &[0, 1, 2, 3, 4], rho, tol_svd)?;
    let mut beta = [0.0; 4];
    if x[0] < 0.0 {
        beta[0] = (-x[0]).sqrt();
        beta[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
    } else {
        beta[0] = x[0].sqrt();
        beta[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
    }
    if x[1] < 0.0 {
        beta[0] = -beta[0];
    }
    if beta[0] == 0.0 {
        return None;
    }
    beta[2] = x[3] / beta[0];
    Some(beta)
}

/// Compute the six squared distances (ρ vector) between the 4 control points.
fn rho_ctrlpts(cw: &[DVec3; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| cw[i].distance_squared(cw[j]))
}

/// Compute pose (R, t) from a set of betas using the null-space vectors.
///
/// Returns `Ok(None)` when the betas collapse the control points.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    alphas: &[[f64; 4]],
    world: &[DVec3],
) -> Result<Option<(DMat3, DVec3)>, PnPError> {
    let beta_vec = nalgebra::Vector4::from_column_slice(betas);
    let cc_flat = null4 * beta_vec;

    let mut cc = [DVec3::ZERO; 4];
    for (i, c) in cc.iter_mut().enumerate() {
        *c = DVec3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]);
    }
    if cc.iter().any(|c| !c.is_finite()) {
        return Ok(None);
    }

    let mut camera: Vec<DVec3> = alphas
        .iter()
        .map(|a| cc[0] * a[0] + cc[1] * a[1] + cc[2] * a[2] + cc[3] * a[3])
        .collect();

    if camera[0].z < 0.0 {
        for p in &mut camera {
            *p = -*p;
        }
    }

    let (r, t) = umeyama(world, &camera).map_err(|e| PnPError::SvdFailed(e.to_string()))?;
    Ok(Some((r, t)))
}

/// Root-mean-square reprojection error in pixels.
///
/// Returns `None` if any point lands behind the camera.
fn rmse_px(
    world: &[DVec3],
    points_image: &[[f64; 2]],
    r: &DMat3,
    t: &DVec3,
    k: &[[f64; 3]; 3],
) -> Option<f64> {
    let kk = mat3_from_rows(k);
    let mut sum_sq = 0.0;
    for (pw, uv) in world.iter().zip(points_image.iter()) {
        let pc = *r * *pw + *t;
        if pc.z <= 0.0 {
            return None;
        }
        let proj = kk * pc;
        let du = proj.x / proj.z - uv[0];
        let dv = proj.y / proj.z - uv[1];
        sum_sq += du.mul_add(du, dv * dv);
    }
    Some((sum_sq / world.len() as f64).sqrt())
}
