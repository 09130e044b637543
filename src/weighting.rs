//! Information-theoretic weights and the control-distribution update.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};

use crate::config::{Backend, BetaAdaptation};

/// `[1, γ, γ², …]` of length `horizon`.
pub fn discount_sequence(gamma: f64, horizon: usize) -> Array1<f64> {
    let mut acc = 1.0;
    Array1::from_shape_fn(horizon, |t| {
        if t > 0 {
            acc *= gamma;
        }
        acc
    })
}

/// Discounted cost-to-go `K x T`.
///
/// Entry `(k, t)` is `Σ_{s ≥ t} γ^{s−t} c_{k,s}`, so column 0 is the
/// discounted cost of the whole horizon.
pub fn cost_to_go(cost_horizon: ArrayView2<f64>, gamma_seq: ArrayView1<f64>, backend: Backend) -> Array2<f64> {
    let mut out = Array2::zeros(cost_horizon.raw_dim());
    let row = |mut o: ndarray::ArrayViewMut1<f64>, c: ArrayView1<f64>| {
        let mut acc = 0.0;
        for t in (0..c.len()).rev() {
            acc += gamma_seq[t] * c[t];
            o[t] = acc / gamma_seq[t];
        }
    };
    let zip = Zip::from(out.rows_mut()).and(cost_horizon.rows());
    match backend {
        Backend::Rayon => zip.par_for_each(row),
        Backend::Serial => zip.for_each(row),
    }
    out
}

/// `exp(−factor · (cost − min))`: the minimum maps to 1, so the sum never
/// vanishes whatever the sign and scale of the raw costs.
pub fn ensure_non_zero(cost: &Array1<f64>, min: f64, factor: f64) -> Array1<f64> {
    cost.mapv(|c| (-factor * (c - min)).exp())
}

fn min_of(v: &Array1<f64>) -> f64 {
    v.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Normalized weights from exponentiated costs.
#[derive(Debug, Clone)]
pub struct Weights {
    pub weights: Array1<f64>,
    /// Unnormalized partition value, a proxy for the effective sample count.
    pub eta: f64,
    /// Costs after subtracting the batch minimum.
    pub total_costs: Array1<f64>,
}

fn normalize(exp: Array1<f64>, total_costs: Array1<f64>) -> Weights {
    let eta = exp.sum();
    let weights = exp / eta;
    if weights.iter().any(|w| !w.is_finite()) {
        log::warn!("non-finite weights (eta = {eta})");
    }
    Weights {
        weights,
        eta,
        total_costs,
    }
}

/// Simple-mode weights `exp(−(c − min)/λ) / η` on total costs.
pub fn simple_weights(cost_total: &Array1<f64>, lambda: f64) -> Weights {
    let min = min_of(cost_total);
    let exp = ensure_non_zero(cost_total, min, 1.0 / lambda);
    normalize(exp, cost_total - min)
}

/// Weights from the discounted cost horizon with temperature `beta`.
pub fn exp_util(cost_horizon: ArrayView2<f64>, gamma_seq: ArrayView1<f64>, beta: f64, backend: Backend) -> Weights {
    let traj_costs = cost_to_go(cost_horizon, gamma_seq, backend).column(0).to_owned();
    let total_costs = &traj_costs - min_of(&traj_costs);
    let exp = total_costs.mapv(|c| (-c / beta).exp());
    normalize(exp, total_costs)
}

/// Index of the largest weight; ties keep the first.
pub fn argmax(weights: &Array1<f64>) -> usize {
    weights
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bw), (i, &w)| if w > bw { (i, w) } else { (bi, bw) })
        .0
}

/// Indices of the `n` largest weights, best first.
pub fn top_k(weights: &Array1<f64>, n: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..weights.len()).collect();
    idx.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));
    idx.truncate(n);
    idx
}

/// `Σ_k w_k · x_k` over the leading axis.
pub fn weighted_sum(weights: &Array1<f64>, x: ArrayView3<f64>) -> Array2<f64> {
    let mut acc = Array2::zeros((x.len_of(Axis(1)), x.len_of(Axis(2))));
    for (w, xk) in weights.iter().zip(x.outer_iter()) {
        acc.scaled_add(*w, &xk);
    }
    acc
}

/// Diagonal covariance estimate: time-averaged `Σ_k w_k δ²`.
pub fn covariance_estimate(weights: &Array1<f64>, delta: &Array3<f64>) -> Array1<f64> {
    let sq = delta.mapv(|d| d * d);
    weighted_sum(weights, sq.view())
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(delta.len_of(Axis(2))))
}

/// Receding-horizon shift by `n` steps; the last entry is repeated.
pub fn shift_by(seq: &Array2<f64>, n: usize) -> Array2<f64> {
    let horizon = seq.nrows();
    let mut out = seq.clone();
    if horizon == 0 {
        return out;
    }
    for t in 0..horizon {
        out.row_mut(t).assign(&seq.row((t + n).min(horizon - 1)));
    }
    out
}

pub fn shift_action(seq: &Array2<f64>) -> Array2<f64> {
    shift_by(seq, 1)
}

/// One tracked mode of the control distribution.
#[derive(Debug, Clone)]
pub struct Mode {
    pub mean: Array2<f64>,
    pub best_traj: Array2<f64>,
    pub beta: f64,
}

/// Outcome of updating one [`Mode`].
#[derive(Debug, Clone)]
pub struct ModeUpdate {
    pub weights: Weights,
    pub best_idx: usize,
    /// Realized actions minus the updated mean.
    pub delta: Array3<f64>,
}

impl Mode {
    pub fn new(horizon: usize, nu: usize) -> Self {
        Self {
            mean: Array2::zeros((horizon, nu)),
            best_traj: Array2::zeros((horizon, nu)),
            beta: 1.0,
        }
    }

    pub fn shift(&mut self) {
        self.mean = shift_action(&self.mean);
        self.best_traj = shift_action(&self.best_traj);
    }

    /// Weight the samples, cache the best one and move the mean towards the
    /// weighted average with step `alpha`.
    pub fn update(
        &mut self,
        cost_horizon: ArrayView2<f64>,
        actions: ArrayView3<f64>,
        gamma_seq: ArrayView1<f64>,
        alpha: f64,
        adaptation: Option<&BetaAdaptation>,
        backend: Backend,
    ) -> ModeUpdate {
        let weights = exp_util(cost_horizon, gamma_seq, self.beta, backend);
        if let Some(a) = adaptation {
            let beta = a.adapt(self.beta, weights.eta);
            if beta != self.beta {
                log::debug!("beta {:.4} -> {beta:.4} (eta {:.2})", self.beta, weights.eta);
            }
            self.beta = beta;
        }
        let best_idx = argmax(&weights.weights);
        self.best_traj = actions.index_axis(Axis(0), best_idx).to_owned();

        let new_mean = weighted_sum(&weights.weights, actions);
        self.mean = &self.mean * (1.0 - alpha) + new_mean * alpha;

        let delta = &actions - &self.mean.view().insert_axis(Axis(0));
        ModeUpdate {
            weights,
            best_idx,
            delta,
        }
    }
}

/// Run [`Mode::update`] on each half of the batch independently.
///
/// Returned weights cover the whole batch with each half carrying half the
/// mass; the deltas are concatenated in sample order.
pub fn update_bimodal(
    modes: &mut [Mode; 2],
    cost_horizon: ArrayView2<f64>,
    actions: ArrayView3<f64>,
    gamma_seq: ArrayView1<f64>,
    alpha: f64,
    adaptation: Option<&BetaAdaptation>,
    backend: Backend,
) -> (ModeUpdate, [usize; 2]) {
    let half = cost_horizon.nrows() / 2;
    let [m1, m2] = modes;
    let u1 = m1.update(
        cost_horizon.slice(s![..half, ..]),
        actions.slice(s![..half, .., ..]),
        gamma_seq,
        alpha,
        adaptation,
        backend,
    );
    let u2 = m2.update(
        cost_horizon.slice(s![half.., ..]),
        actions.slice(s![half.., .., ..]),
        gamma_seq,
        alpha,
        adaptation,
        backend,
    );
    let cat1 = |a: &Array1<f64>, b: &Array1<f64>| {
        ndarray::concatenate(Axis(0), &[a.view(), b.view()]).unwrap_or_else(|_| a.clone())
    };
    let weights = Weights {
        weights: cat1(&u1.weights.weights, &u2.weights.weights) * 0.5,
        eta: u1.weights.eta + u2.weights.eta,
        total_costs: cat1(&u1.weights.total_costs, &u2.weights.total_costs),
    };
    let delta = ndarray::concatenate(Axis(0), &[u1.delta.view(), u2.delta.view()])
        .unwrap_or_else(|_| u1.delta.clone());
    let best = [u1.best_idx, half + u2.best_idx];
    let best_idx = if weights.weights[best[0]] >= weights.weights[best[1]] {
        best[0]
    } else {
        best[1]
    };
    (
        ModeUpdate {
            weights,
            best_idx,
            delta,
        },
        best,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn sums_to_one(w: &Array1<f64>) {
        assert!(w.iter().all(|&v| v >= 0.0), "{w}");
        assert!((w.sum() - 1.0).abs() < 1e-12, "sum = {}", w.sum());
    }

    #[test]
    fn discount_of_single_step() {
        assert_eq!(discount_sequence(0.95, 1).to_vec(), vec![1.0]);
        let g = discount_sequence(0.5, 4);
        assert_eq!(g.to_vec(), vec![1.0, 0.5, 0.25, 0.125]);
    }

    #[test]
    fn cost_to_go_discounts_the_tail() {
        let c = array![[1.0, 2.0, 4.0]];
        let g = discount_sequence(0.5, 3);
        let ctg = cost_to_go(c.view(), g.view(), Backend::Serial);
        // 1 + 0.5*2 + 0.25*4, 2 + 0.5*4, 4
        assert_eq!(ctg.row(0).to_vec(), vec![3.0, 4.0, 4.0]);
        let single = cost_to_go(array![[7.0]].view(), discount_sequence(0.9, 1).view(), Backend::Rayon);
        assert_eq!(single[[0, 0]], 7.0);
    }

    #[test]
    fn weights_favor_low_cost() {
        let cost = array![[3.0, 3.0], [0.5, 0.5], [10.0, 1.0]];
        let g = discount_sequence(1.0, 2);
        let w = exp_util(cost.view(), g.view(), 1.0, Backend::Serial);
        sums_to_one(&w.weights);
        assert_eq!(argmax(&w.weights), 1);
        assert_eq!(w.total_costs[1], 0.0);
        assert!(w.eta >= 1.0);
    }

    #[test]
    fn equal_costs_give_uniform_weights() {
        let w = simple_weights(&array![-4.0, -4.0, -4.0, -4.0], 0.1);
        for v in w.weights.iter() {
            assert!((v - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn huge_costs_do_not_overflow() {
        let w = simple_weights(&array![1e6, 1e6 + 1.0, 2e6], 1.0);
        sums_to_one(&w.weights);
        assert!(w.weights[0] > w.weights[1]);
    }

    #[test]
    fn shift_is_a_rotation_with_held_tail() {
        let x = Array::linspace(0.0, 5.0, 6).into_shape((6, 1)).unwrap();
        assert_eq!(shift_action(&shift_action(&x)), shift_by(&x, 2));
        assert_eq!(shift_action(&x).column(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 5.0]);
        let c = Array2::from_elem((4, 2), 3.0);
        assert_eq!(shift_action(&c), c);
    }

    #[test]
    fn top_k_is_sorted() {
        let w = array![0.1, 0.4, 0.2, 0.3];
        assert_eq!(top_k(&w, 3), vec![1, 3, 2]);
        assert_eq!(top_k(&w, 10).len(), 4);
    }

    #[test]
    fn mode_update_moves_mean_to_best() {
        let mut mode = Mode::new(2, 1);
        // サンプル 0 のみ低コスト
        let cost = array![[0.0, 0.0], [50.0, 50.0]];
        let actions = Array::from_shape_vec((2, 2, 1), vec![1.0, 1.0, -1.0, -1.0]).unwrap();
        let g = discount_sequence(0.95, 2);
        let up = mode.update(cost.view(), actions.view(), g.view(), 0.98, None, Backend::Serial);
        assert_eq!(up.best_idx, 0);
        assert_eq!(mode.best_traj.column(0).to_vec(), vec![1.0, 1.0]);
        assert!(mode.mean[[0, 0]] > 0.95, "{}", mode.mean);
        assert_eq!(up.delta.shape(), &[2, 2, 1]);
        assert!((up.delta[[0, 0, 0]] - (1.0 - mode.mean[[0, 0]])).abs() < 1e-12);
    }

    #[test]
    fn beta_adapts_on_eta() {
        let mut mode = Mode::new(1, 1);
        let cost = Array2::zeros((30, 1));
        let actions = Array3::zeros((30, 1, 1));
        let g = discount_sequence(0.95, 1);
        let a = BetaAdaptation::default();
        mode.update(cost.view(), actions.view(), g.view(), 0.98, Some(&a), Backend::Serial);
        // 30 個の等しいサンプル -> eta = 30 > 20
        assert!((mode.beta - 0.9).abs() < 1e-12);
    }

    #[test]
    fn bimodal_halves_do_not_mix() {
        let mut modes = [Mode::new(1, 1), Mode::new(1, 1)];
        let cost = array![[0.0], [9.0], [9.0], [0.0]];
        let actions = Array::from_shape_vec((4, 1, 1), vec![1.0, 5.0, 7.0, -1.0]).unwrap();
        let g = discount_sequence(0.95, 1);
        let (up, best) = update_bimodal(&mut modes, cost.view(), actions.view(), g.view(), 1.0, None, Backend::Serial);
        sums_to_one(&up.weights.weights);
        assert_eq!(best, [0, 3]);
        assert!(modes[0].mean[[0, 0]] > 0.0 && modes[0].mean[[0, 0]] < 5.0);
        assert!(modes[1].mean[[0, 0]] < 7.0 && modes[1].mean[[0, 0]] > -1.0);
        assert!(modes[1].mean[[0, 0]] < 0.0, "{}", modes[1].mean);
        assert_eq!(modes[1].best_traj[[0, 0]], -1.0);
    }

    #[test]
    fn covariance_estimate_is_weighted() {
        let w = array![1.0, 0.0];
        let delta = Array::from_shape_vec((2, 2, 1), vec![2.0, 0.0, 9.0, 9.0]).unwrap();
        assert_eq!(covariance_estimate(&w, &delta).to_vec(), vec![2.0]);
    }
}
