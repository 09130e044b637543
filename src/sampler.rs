use ndarray::{s, Array2, Array3, ArrayView1, ArrayViewMut2, Axis, Zip};
use rand::Rng;

use crate::config::{Backend, MppiConfig, SampleMethod};
use crate::gaussian::{self, Gaussian};
use crate::halton::gaussian_halton_samples;
use crate::spline::bspline;

/// Produces the control deltas of one cycle.
#[derive(Debug, Clone)]
pub struct Sampler {
    method: SampleMethod,
    horizon: usize,
    nu: usize,
    n_knots: usize,
    degree: usize,
    seed: u64,
    backend: Backend,
    knot_points: Option<Array2<f64>>,
    delta: Option<Array3<f64>>,
}

impl Sampler {
    pub fn new(config: &MppiConfig) -> Self {
        Self {
            method: config.sample_method,
            horizon: config.horizon,
            nu: config.nu(),
            n_knots: config.n_knots(),
            degree: config.spline_degree,
            seed: config.seed,
            backend: config.backend,
            knot_points: None,
            delta: None,
        }
    }

    /// `k x T` draws from the configured noise `N(0, Σ)`.
    pub fn sample_random<R: Rng + ?Sized>(&self, noise: &Gaussian, rng: &mut R, k: usize) -> Array3<f64> {
        noise.sample(rng, k, self.horizon)
    }

    /// Unit-scale deltas for the spline path; the last row is always zero.
    ///
    /// With [`SampleMethod::Halton`] the knots are generated on the first
    /// call and the same deltas are returned on every later call.
    pub fn sample_spline<R: Rng + ?Sized>(&mut self, rng: &mut R, k: usize) -> Array3<f64> {
        let mut delta = match self.method {
            SampleMethod::Random => gaussian::standard_normal(rng, k, self.horizon, self.nu),
            SampleMethod::Halton => match &self.delta {
                Some(d) if d.len_of(Axis(0)) == k => d.clone(),
                _ => {
                    let knots = gaussian_halton_samples(k, self.n_knots * self.nu, self.seed);
                    log::trace!(
                        "halton knots drawn: {k} samples x {} knots x {} dims",
                        self.n_knots,
                        self.nu
                    );
                    let d = self.expand(&knots);
                    self.knot_points = Some(knots);
                    self.delta = Some(d.clone());
                    d
                }
            },
        };
        // 平均そのものを必ずサンプルに含める
        if k > 0 {
            delta.index_axis_mut(Axis(0), k - 1).fill(0.0);
        }
        delta
    }

    /// Cached knot values (`K x (nu · n_knots)`), if drawn.
    pub fn knot_points(&self) -> Option<&Array2<f64>> {
        self.knot_points.as_ref()
    }

    pub fn reset(&mut self) {
        self.knot_points = None;
        self.delta = None;
    }

    fn expand(&self, knots: &Array2<f64>) -> Array3<f64> {
        let (n_knots, horizon, degree) = (self.n_knots, self.horizon, self.degree);
        let mut out = Array3::zeros((knots.nrows(), horizon, self.nu));
        let fill = move |mut o: ArrayViewMut2<f64>, kp: ArrayView1<f64>| {
            for (j, mut col) in o.axis_iter_mut(Axis(1)).enumerate() {
                let ctrl = kp.slice(s![j * n_knots..(j + 1) * n_knots]);
                col.assign(&bspline(ctrl, horizon, degree));
            }
        };
        let zip = Zip::from(out.outer_iter_mut()).and(knots.outer_iter());
        match self.backend {
            Backend::Rayon => zip.par_for_each(fill),
            Backend::Serial => zip.for_each(fill),
        }
        out
    }
}
