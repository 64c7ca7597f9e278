use facecalib_pnp::{project_points, solve_epnp, EPnPParams, PnPError};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn rotation_angle_between(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> f64 {
    // angle of a^T * b
    let mut trace = 0.0;
    for i in 0..3 {
        for k in 0..3 {
            trace += a[k][i] * b[k][i];
        }
    }
    ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
}

#[test]
fn epnp_error_grows_with_pixel_noise() -> Result<(), PnPError> {
    let mut rng = StdRng::seed_from_u64(7);
    let world: Vec<[f64; 3]> = (0..68)
        .map(|_| {
            [
                rng.random_range(-0.08..0.08),
                rng.random_range(-0.09..0.09),
                rng.random_range(0.0..0.1),
            ]
        })
        .collect();
    let (s, c) = 0.3f64.sin_cos();
    let r = [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]];
    let t = [0.03, -0.04, 0.4];
    let k = [[450.0, 0.0, 240.0], [0.0, 450.0, 320.0], [0.0, 0.0, 1.0]];
    let clean = project_points(&world, &r, &t, &k);

    // one fixed noise pattern, scaled by the noise magnitude
    let pattern: Vec<[f64; 2]> = (0..world.len())
        .map(|_| [rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)])
        .collect();

    let mut previous = -1.0;
    for sigma in [0.0, 0.5, 2.0, 8.0] {
        let noisy: Vec<[f64; 2]> = clean
            .iter()
            .zip(pattern.iter())
            .map(|(p, n)| [p[0] + sigma * n[0], p[1] + sigma * n[1]])
            .collect();
        let result = solve_epnp(&world, &noisy, &k, &EPnPParams::default())?;
        let t_err = (0..3)
            .map(|i| (result.translation[i] - t[i]).powi(2))
            .sum::<f64>()
            .sqrt();
        let err = t_err + rotation_angle_between(&result.rotation, &r);

        if sigma == 0.0 {
            assert!(err < 1e-6, "noiseless error {err}");
        } else {
            assert!(err > previous, "error {err} at sigma {sigma} not above {previous}");
        }
        previous = err;
    }
    Ok(())
}
