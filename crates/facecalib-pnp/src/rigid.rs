//! Rigid alignment utilities (Kabsch / Umeyama)

use glam::{DMat3, DVec3};
use nalgebra::{Matrix3, SVD};
use thiserror::Error;

/// Rotation and translation output of Umeyama without scaling.
pub type UmeyamaOutput = (DMat3, DVec3);

/// Error type for Umeyama rigid alignment operations.
#[derive(Debug, Error)]
pub enum UmeyamaError {
    /// Source and destination arrays must have the same length
    #[error("Source and destination arrays must have the same length")]
    MismatchedInputLengths,
    /// At least one correspondence is needed
    #[error("Umeyama alignment requires at least one correspondence")]
    Empty,
    /// Failed to compute U in SVD
    #[error("Failed to compute U in SVD")]
    SvdU,
    /// Failed to compute V^T in SVD
    #[error("Failed to compute V^T in SVD")]
    SvdVT,
}

/// Result type alias for Umeyama.
pub type UmeyamaResult = Result<UmeyamaOutput, UmeyamaError>;

/// Umeyama/Kabsch algorithm without scale.
///
/// Finds `(R, t)` minimising `sum |dst_i - (R * src_i + t)|^2`.
pub fn umeyama(src: &[DVec3], dst: &[DVec3]) -> UmeyamaResult {
    if src.len() != dst.len() {
        return Err(UmeyamaError::MismatchedInputLengths);
    }
    if src.is_empty() {
        return Err(UmeyamaError::Empty);
    }
    let n = src.len() as f64;

    let mu_s = src.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / n;
    let mu_d = dst.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / n;

    // H[row][col] += dst[row] * src[col]
    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let sc = *s - mu_s;
        let dc = *d - mu_d;
        let sc = nalgebra::Vector3::new(sc.x, sc.y, sc.z);
        let dc = nalgebra::Vector3::new(dc.x, dc.y, dc.z);
        h += dc * sc.transpose();
    }
    h /= n;

    let svd = SVD::new(h, true, true);
    let Some(u) = svd.u else {
        return Err(UmeyamaError::SvdU);
    };
    let Some(v_t) = svd.v_t else {
        return Err(UmeyamaError::SvdVT);
    };

    let mut r_na = u * v_t;
    if r_na.determinant() < 0.0 {
        // reflection: R = U * diag(1, 1, -1) * V^T
        let mut u_fixed = u;
        u_fixed.column_mut(2).scale_mut(-1.0);
        r_na = u_fixed * v_t;
    }

    let r = DMat3::from_cols(
        DVec3::new(r_na[(0, 0)], r_na[(1, 0)], r_na[(2, 0)]),
        DVec3::new(r_na[(0, 1)], r_na[(1, 1)], r_na[(2, 1)]),
        DVec3::new(r_na[(0, 2)], r_na[(1, 2)], r_na[(2, 2)]),
    );
    let t = mu_d - r * mu_s;

    Ok((r, t))
}
