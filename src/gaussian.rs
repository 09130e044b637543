use ndarray::{Array1, Array2, Array3, Axis, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{MppiError, MppiResult};

// 対称性の許容誤差
const SYMMETRY_TOL: f64 = 1e-9;

/// Zero-mean multivariate Gaussian control noise `N(0, Σ)`.
///
/// Besides the full covariance it tracks the diagonal `cov_action` and its
/// square root, which the halton-spline path uses to scale unit deltas and
/// which the covariance update may move.
#[derive(Debug, Clone)]
pub struct Gaussian {
    sigma: Array2<f64>,
    sigma_inv: Array2<f64>,
    chol_l: Array2<f64>,
    cov_action: Array1<f64>,
    scale_tril: Array1<f64>,
}

fn to_array(m: &na::DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

impl Gaussian {
    pub fn new(sigma: &na::DMatrix<f64>) -> MppiResult<Self> {
        if !sigma.is_square() || sigma.nrows() == 0 {
            return Err(MppiError::Covariance(format!(
                "expected a square matrix, got {}x{}",
                sigma.nrows(),
                sigma.ncols()
            )));
        }
        let scale = sigma.amax().max(1.0);
        if (sigma - sigma.transpose()).amax() > SYMMETRY_TOL * scale {
            return Err(MppiError::Covariance("matrix is not symmetric".into()));
        }
        let chol = sigma
            .clone()
            .cholesky()
            .ok_or_else(|| MppiError::Covariance("matrix is not positive-definite".into()))?;
        let sigma_inv = chol.inverse();
        if sigma_inv.iter().any(|v| !v.is_finite()) {
            return Err(MppiError::Covariance("inverse is not finite".into()));
        }
        let cov_action = sigma.diagonal().iter().copied().collect::<Array1<f64>>();
        let scale_tril = cov_action.mapv(f64::sqrt);
        Ok(Self {
            sigma: to_array(sigma),
            sigma_inv: to_array(&sigma_inv),
            chol_l: to_array(&chol.l()),
            cov_action,
            scale_tril,
        })
    }

    pub fn nu(&self) -> usize {
        self.sigma.nrows()
    }

    pub fn sigma(&self) -> &Array2<f64> {
        &self.sigma
    }

    pub fn sigma_inv(&self) -> &Array2<f64> {
        &self.sigma_inv
    }

    pub fn cov_action(&self) -> &Array1<f64> {
        &self.cov_action
    }

    pub fn scale_tril(&self) -> &Array1<f64> {
        &self.scale_tril
    }

    /// Replace the tracked diagonal; the scale follows as its square root.
    pub fn set_cov_action(&mut self, cov_action: Array1<f64>) {
        self.scale_tril = cov_action.mapv(|v| v.max(0.0).sqrt());
        self.cov_action = cov_action;
    }

    /// `k x t` independent draws from `N(0, Σ)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, k: usize, t: usize) -> Array3<f64> {
        let z = standard_normal(rng, k, t, self.nu());
        let mut out = Array3::zeros(z.raw_dim());
        Zip::from(out.lanes_mut(Axis(2)))
            .and(z.lanes(Axis(2)))
            .for_each(|mut o, z| o.assign(&self.chol_l.dot(&z)));
        out
    }

    /// Action-perturbation cost `λ · noise · Σ⁻¹` per sample and step.
    pub fn action_cost(&self, noise: &Array3<f64>, lambda: f64, abs: bool) -> Array3<f64> {
        let mut cost = Array3::zeros(noise.raw_dim());
        Zip::from(cost.lanes_mut(Axis(2)))
            .and(noise.lanes(Axis(2)))
            .for_each(|mut c, n| {
                // |noise| は全コストが等しいときのバイアスを避ける
                let n = if abs { n.mapv(f64::abs) } else { n.to_owned() };
                c.assign(&(n.dot(&self.sigma_inv) * lambda));
            });
        cost
    }
}

/// `k x t x nu` draws from the unit normal.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R, k: usize, t: usize, nu: usize) -> Array3<f64> {
    Array3::from_shape_simple_fn((k, t, nu), || rng.sample(StandardNormal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn rejects_singular_and_asymmetric() {
        let singular = na::DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(matches!(
            Gaussian::new(&singular),
            Err(MppiError::Covariance(_))
        ));
        let asym = na::DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.0, 2.0]);
        assert!(Gaussian::new(&asym).is_err());
        let rect = na::DMatrix::<f64>::zeros(2, 3);
        assert!(Gaussian::new(&rect).is_err());
    }

    #[test]
    fn inverse_and_scale() {
        let sigma = na::DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 9.0]);
        let g = Gaussian::new(&sigma).unwrap();
        assert!((g.sigma_inv()[[0, 0]] - 0.25).abs() < 1e-12);
        assert!((g.sigma_inv()[[1, 1]] - 1.0 / 9.0).abs() < 1e-12);
        assert_eq!(g.scale_tril().to_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn sample_covariance_matches() {
        let sigma = na::DMatrix::from_row_slice(2, 2, &[2.0, 0.6, 0.6, 1.0]);
        let g = Gaussian::new(&sigma).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let s = g.sample(&mut rng, 400, 50);
        assert_eq!(s.shape(), &[400, 50, 2]);
        let n = (400 * 50) as f64;
        let mut c = [[0.0; 2]; 2];
        for v in s.lanes(Axis(2)) {
            for i in 0..2 {
                for j in 0..2 {
                    c[i][j] += v[i] * v[j] / n;
                }
            }
        }
        assert!((c[0][0] - 2.0).abs() < 0.1, "var0 = {}", c[0][0]);
        assert!((c[1][1] - 1.0).abs() < 0.05, "var1 = {}", c[1][1]);
        assert!((c[0][1] - 0.6).abs() < 0.05, "cov = {}", c[0][1]);
    }

    #[test]
    fn action_cost_uses_inverse() {
        let sigma = na::DMatrix::from_row_slice(1, 1, &[2.0]);
        let g = Gaussian::new(&sigma).unwrap();
        let noise = Array3::from_elem((1, 2, 1), -4.0);
        let cost = g.action_cost(&noise, 0.5, false);
        assert!((cost[[0, 1, 0]] + 1.0).abs() < 1e-12);
        let cost = g.action_cost(&noise, 0.5, true);
        assert!((cost[[0, 0, 0]] - 1.0).abs() < 1e-12);
    }
}
