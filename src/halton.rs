//! Scrambled (generalized) Halton sequence and its Gaussian transform.

use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Halton sequence with seeded digit permutations per base.
///
/// Permutations keep digit 0 fixed, so every point from index 1 on lies
/// strictly inside `(0, 1)`.
#[derive(Debug, Clone)]
pub struct Halton {
    bases: Vec<u64>,
    perms: Vec<Vec<u64>>,
    index: u64,
}

fn primes(n: usize) -> Vec<u64> {
    let mut out = Vec::with_capacity(n);
    let mut c = 2u64;
    while out.len() < n {
        if out.iter().take_while(|&&p| p * p <= c).all(|&p| c % p != 0) {
            out.push(c);
        }
        c += 1;
    }
    out
}

impl Halton {
    pub fn new(dims: usize, seed: u64) -> Self {
        let bases = primes(dims);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let perms = bases
            .iter()
            .map(|&b| {
                let mut p: Vec<u64> = (0..b).collect();
                p[1..].shuffle(&mut rng);
                p
            })
            .collect();
        Self {
            bases,
            perms,
            index: 0,
        }
    }

    pub fn dims(&self) -> usize {
        self.bases.len()
    }

    fn radical_inverse(&self, dim: usize, mut n: u64) -> f64 {
        let b = self.bases[dim];
        let inv = 1.0 / b as f64;
        let mut f = inv;
        let mut v = 0.0;
        while n > 0 {
            v += self.perms[dim][(n % b) as usize] as f64 * f;
            n /= b;
            f *= inv;
        }
        v
    }

    /// Next `count` points as rows of a `count x dims` array.
    pub fn take(&mut self, count: usize) -> Array2<f64> {
        let start = self.index + 1;
        self.index += count as u64;
        Array2::from_shape_fn((count, self.dims()), |(i, d)| {
            self.radical_inverse(d, start + i as u64)
        })
    }
}

// Acklam の有理近似
const A: [f64; 6] = [
    -3.969683028665376e+01,
    2.209460984245205e+02,
    -2.759285104469687e+02,
    1.383577518672690e+02,
    -3.066479806614716e+01,
    2.506628277459239e+00,
];
const B: [f64; 5] = [
    -5.447609879822406e+01,
    1.615858368580409e+02,
    -1.556989798598866e+02,
    6.680131188771972e+01,
    -1.328068155288572e+01,
];
const C: [f64; 6] = [
    -7.784894002430293e-03,
    -3.223964580411365e-01,
    -2.400758277161838e+00,
    -2.549671010115381e+00,
    4.374664141464968e+00,
    2.938163982698783e+00,
];
const D: [f64; 4] = [
    7.784695709041462e-03,
    3.224671290700398e-01,
    2.445134137142996e+00,
    3.754408661907416e+00,
];
const P_LOW: f64 = 0.02425;

/// Inverse CDF of the standard normal, `sqrt(2) · erfinv(2p − 1)`.
pub fn norm_ppf(p: f64) -> f64 {
    let p = p.clamp(f64::EPSILON, 1.0 - f64::EPSILON);
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -norm_ppf(1.0 - p)
    }
}

/// `count x dims` Gaussian quasi-random points from a freshly seeded sequence.
pub fn gaussian_halton_samples(count: usize, dims: usize, seed: u64) -> Array2<f64> {
    Halton::new(dims, seed).take(count).mapv(norm_ppf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_primes() {
        assert_eq!(primes(6), vec![2, 3, 5, 7, 11, 13]);
    }

    #[test]
    fn points_inside_unit_cube() {
        let mut h = Halton::new(5, 0);
        let pts = h.take(200);
        assert!(pts.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn base_two_stays_van_der_corput() {
        // 2 進では置換が恒等になる
        let mut h = Halton::new(1, 3);
        let pts = h.take(4);
        assert_eq!(pts.column(0).to_vec(), vec![0.5, 0.25, 0.75, 0.125]);
    }

    #[test]
    fn seeded_sequences_repeat() {
        let a = gaussian_halton_samples(16, 4, 0);
        let b = gaussian_halton_samples(16, 4, 0);
        assert_eq!(a, b);
        let mut h = Halton::new(4, 0);
        let first = h.take(8);
        let second = h.take(8);
        assert_ne!(first, second);
    }

    #[test]
    fn ppf_is_symmetric_and_monotone() {
        assert!(norm_ppf(0.5).abs() < 1e-9);
        assert!((norm_ppf(0.975) - 1.959964).abs() < 1e-5);
        assert!((norm_ppf(0.01) + norm_ppf(0.99)).abs() < 1e-9);
        assert!(norm_ppf(0.0).is_finite());
        let xs: Vec<f64> = (1..100).map(|i| norm_ppf(i as f64 / 100.0)).collect();
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }
}
