use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::bound::{bound_action, scale_ctrl, Bounds};
use crate::config::{MppiConfig, MppiMode};
use crate::dynamics::{Dynamics, RunningCost, TerminalCost};
use crate::error::{MppiError, MppiResult};
use crate::gaussian::Gaussian;
use crate::rollout::{normalize_state, rollout, Rollout, RolloutOptions};
use crate::sampler::Sampler;
use crate::savgol::SavGol;
use crate::weighting::{
    argmax, covariance_estimate, discount_sequence, simple_weights, top_k, update_bimodal,
    weighted_sum, Mode, ModeUpdate,
};

/// Diagnostics of the last `command` call.
#[derive(Debug, Clone)]
pub struct Cycle {
    /// Bounded actions that were sent to the rollout.
    pub perturbed_actions: Array3<f64>,
    pub rollout: Rollout,
    pub weights: Array1<f64>,
    pub eta: f64,
    /// Costs entering the exponent, after subtracting the minimum.
    pub total_costs: Array1<f64>,
    /// Realized actions minus the mean.
    pub noise: Array3<f64>,
    pub best_idx: usize,
    pub top_idx: Vec<usize>,
    pub top_trajs: Array3<f64>,
}

// MPPI (Model Predictive Path Integral) controller
pub struct Mppi<D, C> {
    config: MppiConfig,
    k: usize,
    horizon: usize,
    nu: usize,
    dynamics: D,
    running_cost: C,
    terminal: Option<Box<dyn TerminalCost>>,
    noise: Gaussian,
    noise_init: Gaussian,
    bounds: Option<Bounds>,
    sampler: Sampler,
    smoother: Option<SavGol>,
    rng: Xoshiro256PlusPlus,
    gamma_seq: Array1<f64>,
    mode: Mode,
    modes: Option<[Mode; 2]>,
    last: Option<Cycle>,
}

impl<D: Dynamics, C: RunningCost> Mppi<D, C> {
    pub fn new(config: MppiConfig, dynamics: D, running_cost: C) -> MppiResult<Self> {
        config.validate()?;
        let noise = Gaussian::new(&config.noise_sigma)?;
        let bounds = config.bounds()?.map(|(min, max)| Bounds::new(min, max));
        let smoother = if config.filter_u {
            SavGol::for_length(config.sgf_window, config.sgf_order, config.horizon)?
        } else {
            None
        };
        let (k, horizon, nu) = (config.num_samples, config.horizon, config.nu());
        let modes = config
            .multi_modal
            .then(|| [Mode::new(horizon, nu), Mode::new(horizon, nu)]);
        log::info!(
            "mppi: mode {}, samples {k}, horizon {horizon}, nu {nu}, method {}{}",
            config.mode,
            config.sample_method,
            if config.multi_modal { ", multi-modal" } else { "" }
        );
        Ok(Self {
            k,
            horizon,
            nu,
            dynamics,
            running_cost,
            terminal: None,
            noise_init: noise.clone(),
            noise,
            bounds,
            sampler: Sampler::new(&config),
            smoother,
            rng: Xoshiro256PlusPlus::seed_from_u64(config.seed),
            gamma_seq: discount_sequence(config.gamma, horizon),
            mode: Mode::new(horizon, nu),
            modes,
            last: None,
            config,
        })
    }

    pub fn with_terminal_cost(mut self, terminal: impl TerminalCost + 'static) -> Self {
        self.terminal = Some(Box::new(terminal));
        self
    }

    /// Plan from a single state and return the first `u_per_command` actions.
    pub fn command(&mut self, state: ArrayView1<f64>) -> MppiResult<Array2<f64>> {
        let state = normalize_state(state.into_dyn(), self.k, self.config.nx)?;
        self.command_inner(state)
    }

    /// Plan from one state per sample (`K x nx`), e.g. a belief over states.
    pub fn command_batch(&mut self, states: ArrayView2<f64>) -> MppiResult<Array2<f64>> {
        let state = normalize_state(states.into_dyn(), self.k, self.config.nx)?;
        self.command_inner(state)
    }

    fn command_inner(&mut self, state: Array2<f64>) -> MppiResult<Array2<f64>> {
        let mut cycle = match self.config.mode {
            MppiMode::Simple => self.cycle_simple(&state)?,
            MppiMode::HaltonSpline => self.cycle_halton(&state)?,
        };

        // 重み上位の軌道
        let n = self.config.top_k.min(self.k);
        cycle.top_idx = top_k(&cycle.weights, n);
        cycle.top_trajs = self.top_trajectories(&cycle.rollout, &cycle.top_idx);

        log::debug!(
            "cycle: min cost {:.4}, best {}, eta {:.3}, beta {:?}",
            cycle.rollout.cost_total.iter().copied().fold(f64::INFINITY, f64::min),
            cycle.best_idx,
            cycle.eta,
            self.betas()
        );
        self.last = Some(cycle);

        // 平均全体を平滑化してから先頭を返す
        let n = self.config.u_per_command;
        Ok(match &self.smoother {
            Some(smoother) => smoother.smooth(&self.mode.mean).slice_move(s![..n, ..]),
            None => self.mode.mean.slice(s![..n, ..]).to_owned(),
        })
    }

    fn cycle_simple(&mut self, state: &Array2<f64>) -> MppiResult<Cycle> {
        self.mode.shift();
        let noise = self.sampler.sample_random(&self.noise, &mut self.rng, self.k);
        let mut perturbed = &noise + &self.mode.mean.view().insert_axis(Axis(0));
        if let Some(b) = &self.bounds {
            bound_action(&mut perturbed, b);
        }
        let mut rollout = self.run_rollout(state, &perturbed)?;

        // クリップ後のノイズ
        let noise = &rollout.actions - &self.mode.mean.view().insert_axis(Axis(0));
        if self.config.perturbation_cost {
            rollout.cost_total += &self.perturbation_cost(&noise);
        }
        let w = simple_weights(&rollout.cost_total, self.config.lambda);
        self.mode.mean += &weighted_sum(&w.weights, noise.view());
        let best_idx = argmax(&w.weights);
        self.mode.best_traj = rollout.actions.index_axis(Axis(0), best_idx).to_owned();

        Ok(Cycle {
            perturbed_actions: perturbed,
            rollout,
            weights: w.weights,
            eta: w.eta,
            total_costs: w.total_costs,
            noise,
            best_idx,
            top_idx: Vec::new(),
            top_trajs: Array3::zeros((0, 0, 0)),
        })
    }

    fn cycle_halton(&mut self, state: &Array2<f64>) -> MppiResult<Cycle> {
        self.mode.shift();
        if let Some(modes) = &mut self.modes {
            modes.iter_mut().for_each(Mode::shift);
        }

        let delta = self.sampler.sample_spline(&mut self.rng, self.k);
        let scaled = &delta * self.noise.scale_tril();
        let half = self.k / 2;
        let mut act = match &self.modes {
            Some([m1, m2]) => {
                let mut act = scaled;
                let mut lo = act.slice_mut(s![..half, .., ..]);
                lo += &m1.mean.view().insert_axis(Axis(0));
                let mut hi = act.slice_mut(s![half.., .., ..]);
                hi += &m2.mean.view().insert_axis(Axis(0));
                act
            }
            None => scaled + &self.mode.mean.view().insert_axis(Axis(0)),
        };
        if let Some(b) = &self.bounds {
            scale_ctrl(&mut act, b, self.config.squash_fn);
        }
        if let Some([m1, m2]) = &self.modes {
            act.index_axis_mut(Axis(0), 0).assign(&m1.best_traj);
            act.index_axis_mut(Axis(0), half).assign(&m2.best_traj);
        }

        let mut rollout = self.run_rollout(state, &act)?;
        let update = self.update_distribution(&rollout)?;

        if self.config.update_cov {
            let estimate = covariance_estimate(&update.weights.weights, &update.delta);
            let s = self.config.step_size_cov;
            let cov = self.noise.cov_action() * (1.0 - s) + estimate * s + self.config.kappa;
            log::trace!("covariance diagonal {cov}");
            self.noise.set_cov_action(cov);
        }

        if self.config.perturbation_cost {
            rollout.cost_total += &self.perturbation_cost(&update.delta);
        }

        Ok(Cycle {
            perturbed_actions: act,
            rollout,
            weights: update.weights.weights,
            eta: update.weights.eta,
            total_costs: update.weights.total_costs,
            noise: update.delta,
            best_idx: update.best_idx,
            top_idx: Vec::new(),
            top_trajs: Array3::zeros((0, 0, 0)),
        })
    }

    fn update_distribution(&mut self, rollout: &Rollout) -> MppiResult<ModeUpdate> {
        let (alpha, adaptation, backend) = (
            self.config.step_size_mean,
            self.config.beta_adaptation.as_ref(),
            self.config.backend,
        );
        let cost_horizon = rollout.cost_horizon.view();
        let actions = rollout.actions.view();
        let Some(modes) = &mut self.modes else {
            return Ok(self.mode.update(
                cost_horizon,
                actions,
                self.gamma_seq.view(),
                alpha,
                adaptation,
                backend,
            ));
        };
        let (update, best) = update_bimodal(
            modes,
            cost_horizon,
            actions,
            self.gamma_seq.view(),
            alpha,
            adaptation,
            backend,
        );
        // 最良サンプルのコストが低い方のモードを返す
        let cost = &rollout.cost_total;
        let pick = if cost[best[0]] <= cost[best[1]] { 0 } else { 1 };
        let chosen = modes
            .get(pick)
            .ok_or_else(|| MppiError::Numerical("mode index out of range".into()))?;
        self.mode.mean = chosen.mean.clone();
        self.mode.best_traj = chosen.best_traj.clone();
        Ok(update)
    }

    fn run_rollout(&mut self, state: &Array2<f64>, perturbed: &Array3<f64>) -> MppiResult<Rollout> {
        let opts = RolloutOptions {
            nx: self.config.nx,
            u_scale: self.config.u_scale,
            sample_null_action: self.config.sample_null_action,
            step_dependent: self.config.step_dependent_dynamics,
            rollout_samples: self.config.rollout_samples,
        };
        rollout(
            &mut self.dynamics,
            &mut self.running_cost,
            self.terminal.as_deref_mut(),
            state,
            perturbed,
            &opts,
        )
    }

    // Σ_t,j mean · λ noise Σ⁻¹
    fn perturbation_cost(&self, noise: &Array3<f64>) -> Array1<f64> {
        let action_cost = self
            .noise
            .action_cost(noise, self.config.lambda, self.config.noise_abs_cost);
        let weighted = action_cost * &self.mode.mean.view().insert_axis(Axis(0));
        weighted.sum_axis(Axis(2)).sum_axis(Axis(1))
    }

    fn top_trajectories(&self, rollout: &Rollout, idx: &[usize]) -> Array3<f64> {
        if let Some(ee) = &rollout.ee_states {
            return ee.select(Axis(0), idx);
        }
        let nx = self.config.nx;
        let mut channels: Vec<usize> = self
            .config
            .position_channels
            .iter()
            .copied()
            .filter(|&c| c < nx)
            .collect();
        if channels.is_empty() {
            channels = (0..nx).collect();
        }
        rollout.states.select(Axis(0), idx).select(Axis(2), &channels)
    }

    /// Back to the freshly constructed distribution.
    pub fn reset(&mut self) {
        self.mode = Mode::new(self.horizon, self.nu);
        if let Some(modes) = &mut self.modes {
            *modes = [Mode::new(self.horizon, self.nu), Mode::new(self.horizon, self.nu)];
        }
        self.noise = self.noise_init.clone();
        self.sampler.reset();
        self.rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
        self.last = None;
    }

    pub fn config(&self) -> &MppiConfig {
        &self.config
    }

    pub fn dynamics(&self) -> &D {
        &self.dynamics
    }

    pub fn dynamics_mut(&mut self) -> &mut D {
        &mut self.dynamics
    }

    /// Current mean control sequence `T x nu`.
    pub fn mean_action(&self) -> &Array2<f64> {
        &self.mode.mean
    }

    pub fn best_trajectory(&self) -> &Array2<f64> {
        &self.mode.best_traj
    }

    /// Both tracked modes in multi-modal operation.
    pub fn modes(&self) -> Option<&[Mode; 2]> {
        self.modes.as_ref()
    }

    /// Temperature of the single mode, or β₁ and β₂ of both modes.
    pub fn betas(&self) -> Vec<f64> {
        match &self.modes {
            Some(modes) => modes.iter().map(|m| m.beta).collect(),
            None => vec![self.mode.beta],
        }
    }

    /// Current per-dimension noise scale used by the spline path.
    pub fn noise_scale(&self) -> &Array1<f64> {
        self.noise.scale_tril()
    }

    pub fn knot_points(&self) -> Option<&Array2<f64>> {
        self.sampler.knot_points()
    }

    pub fn last_cycle(&self) -> Option<&Cycle> {
        self.last.as_ref()
    }

    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.last.as_ref().map(|c| &c.weights)
    }

    pub fn cost_total(&self) -> Option<&Array1<f64>> {
        self.last.as_ref().map(|c| &c.rollout.cost_total)
    }

    pub fn top_trajectories_last(&self) -> Option<&Array3<f64>> {
        self.last.as_ref().map(|c| &c.top_trajs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn integrator(x: &Array2<f64>, u: &Array2<f64>, _t: Option<usize>) -> (Array2<f64>, Array2<f64>) {
        (x + u, u.clone())
    }

    fn to_goal(x: &Array2<f64>, _u: &Array2<f64>, _t: usize) -> Array1<f64> {
        x.column(0).mapv(|p| (p - 2.0).powi(2))
    }

    type Controller = Mppi<
        fn(&Array2<f64>, &Array2<f64>, Option<usize>) -> (Array2<f64>, Array2<f64>),
        fn(&Array2<f64>, &Array2<f64>, usize) -> Array1<f64>,
    >;

    fn controller(config: MppiConfig) -> Controller {
        Mppi::new(config, integrator as _, to_goal as _).unwrap()
    }

    fn config() -> MppiConfig {
        MppiConfig {
            num_samples: 4,
            horizon: 3,
            nx: 1,
            u_min: Some(vec![-1.0]),
            u_max: Some(vec![1.0]),
            ..MppiConfig::default()
        }
    }

    #[test]
    fn rejects_singular_covariance() {
        let cfg = MppiConfig {
            noise_sigma: na::DMatrix::zeros(2, 2),
            u_min: None,
            u_max: None,
            ..config()
        };
        let err = Mppi::new(cfg, integrator, to_goal).err().unwrap();
        assert!(matches!(err, MppiError::Covariance(_)), "{err}");
    }

    #[test]
    fn four_sample_halton_scenario() {
        // n_knots = 1 なので各サンプルは一定値: 0, Φ⁻¹(1/4), Φ⁻¹(3/4), 0
        let mut mppi = controller(config());
        let u = mppi.command(array![0.0].view()).unwrap();
        assert_eq!(u.shape(), &[1, 1]);

        let cycle = mppi.last_cycle().unwrap();
        assert!((cycle.weights.sum() - 1.0).abs() < 1e-12);
        let lowest = cycle
            .rollout
            .cost_total
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |b, (i, &c)| if c < b.1 { (i, c) } else { b })
            .0;
        assert_eq!(lowest, 2);
        assert_eq!(argmax(&cycle.weights), lowest);
        assert!(mppi.mean_action()[[0, 0]] > 0.5, "{}", mppi.mean_action());
        assert!(u[[0, 0]] > 0.0);
    }

    #[test]
    fn simple_mode_moves_towards_goal() {
        let cfg = MppiConfig {
            num_samples: 256,
            mode: MppiMode::Simple,
            sample_method: crate::config::SampleMethod::Random,
            seed: 3,
            ..config()
        };
        let mut mppi = controller(cfg);
        mppi.command(array![0.0].view()).unwrap();
        let cycle = mppi.last_cycle().unwrap();
        assert!(cycle.weights.iter().all(|&w| w >= 0.0));
        assert!((cycle.weights.sum() - 1.0).abs() < 1e-9);
        assert!(mppi.mean_action()[[0, 0]] > 0.0, "{}", mppi.mean_action());
        // 重みの凸結合なので平均も範囲内
        assert!(mppi.mean_action().iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn single_step_horizon() {
        let cfg = MppiConfig {
            horizon: 1,
            ..config()
        };
        let mut mppi = controller(cfg);
        let u = mppi.command(array![0.0].view()).unwrap();
        assert_eq!(u.shape(), &[1, 1]);
        assert!(u[[0, 0]].is_finite());
    }

    #[test]
    fn state_shape_is_checked() {
        let mut mppi = controller(config());
        let err = mppi.command(array![0.0, 1.0].view()).unwrap_err();
        assert!(matches!(err, MppiError::Shape { .. }));
        assert!(mppi.command_batch(Array2::zeros((4, 1)).view()).is_ok());
        assert!(mppi.command_batch(Array2::zeros((3, 1)).view()).is_err());
    }

    #[test]
    fn top_trajectories_fall_back_to_full_state() {
        let mut mppi = controller(config());
        mppi.command(array![0.0].view()).unwrap();
        let cycle = mppi.last_cycle().unwrap();
        // nx = 1 のとき既定のチャネル [0, 2] は 0 のみ有効
        assert_eq!(cycle.top_trajs.shape(), &[4, 3, 1]);
        assert_eq!(cycle.top_idx[0], cycle.best_idx);
    }

    #[test]
    fn reset_restores_initial_distribution() {
        let mut mppi = controller(config());
        let first = mppi.command(array![0.0].view()).unwrap();
        mppi.command(array![0.5].view()).unwrap();
        mppi.reset();
        assert!(mppi.mean_action().iter().all(|&v| v == 0.0));
        assert!(mppi.last_cycle().is_none());
        assert_eq!(mppi.command(array![0.0].view()).unwrap(), first);
    }
}
