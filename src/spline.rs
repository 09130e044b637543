use ndarray::{Array1, ArrayView1};

/// Clamped B-spline passing through a short sequence of knot values.
///
/// The values are placed at uniform parameters over `[0, 1]` and the
/// control points are solved so that the curve interpolates every one of
/// them. Interior spline knots are parameter averages, which keeps the
/// collocation system non-singular. The degree is lowered when there are
/// too few values to support it.
#[derive(Debug, Clone)]
pub struct BSpline {
    ctrl: Vec<f64>,
    knots: Vec<f64>,
    degree: usize,
}

// 値を置くパラメータ (0..=1 の等間隔)
fn parameters(n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
}

fn averaged_knots(params: &[f64], degree: usize) -> Vec<f64> {
    let n = params.len();
    let mut knots = vec![0.0; degree + 1];
    knots.extend((1..n - degree).map(|j| {
        if degree == 0 {
            (params[j - 1] + params[j]) / 2.0
        } else {
            params[j..j + degree].iter().sum::<f64>() / degree as f64
        }
    }));
    knots.extend(std::iter::repeat(1.0).take(degree + 1));
    knots
}

impl BSpline {
    pub fn interpolate(values: ArrayView1<f64>, degree: usize) -> Self {
        let n = values.len();
        let degree = degree.min(n.saturating_sub(1));
        let params = parameters(n);
        let knots = averaged_knots(&params, degree);

        // 列 j は j 番目の基底関数を各パラメータで評価したもの
        let mut unit = Self {
            ctrl: vec![0.0; n],
            knots,
            degree,
        };
        let mut basis = na::DMatrix::zeros(n, n);
        for j in 0..n {
            unit.ctrl[j] = 1.0;
            for (i, &u) in params.iter().enumerate() {
                basis[(i, j)] = unit.eval(u);
            }
            unit.ctrl[j] = 0.0;
        }
        let rhs = na::DVector::from_iterator(n, values.iter().copied());
        unit.ctrl = match basis.lu().solve(&rhs) {
            Some(c) => c.iter().copied().collect(),
            None => {
                log::warn!("spline collocation singular for {n} values, using them as control points");
                values.to_vec()
            }
        };
        unit
    }

    fn span(&self, u: f64) -> usize {
        let n = self.ctrl.len();
        if u >= 1.0 {
            return n - 1;
        }
        (self.degree..n)
            .rev()
            .find(|&k| self.knots[k] <= u)
            .unwrap_or(self.degree)
    }

    /// de Boor evaluation at `u` in `[0, 1]`.
    pub fn eval(&self, u: f64) -> f64 {
        let p = self.degree;
        let u = u.clamp(0.0, 1.0);
        let k = self.span(u);
        let mut d: Vec<f64> = (0..=p).map(|j| self.ctrl[j + k - p]).collect();
        for r in 1..=p {
            for j in (r..=p).rev() {
                let lo = self.knots[j + k - p];
                let hi = self.knots[j + 1 + k - r];
                let alpha = if hi > lo { (u - lo) / (hi - lo) } else { 0.0 };
                d[j] = (1.0 - alpha) * d[j - 1] + alpha * d[j];
            }
        }
        d[p]
    }

    /// `n` evaluations at uniformly spaced parameters over the whole curve.
    pub fn sample(&self, n: usize) -> Array1<f64> {
        if n == 1 {
            return Array1::from_elem(1, self.eval(0.0));
        }
        Array1::linspace(0.0, 1.0, n).mapv(|u| self.eval(u))
    }
}

/// Expand knot values to a curve of length `n` through all of them.
pub fn bspline(values: ArrayView1<f64>, n: usize, degree: usize) -> Array1<f64> {
    if values.is_empty() {
        return Array1::zeros(n);
    }
    BSpline::interpolate(values, degree).sample(n)
}
