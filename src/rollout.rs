use ndarray::{stack, Array1, Array2, Array3, ArrayView2, ArrayViewD, Axis, Ix2};

use crate::dynamics::{Dynamics, RunningCost, TerminalCost};
use crate::error::{check_shape, MppiError, MppiResult};

/// Everything the rollout measured for one batch of action sequences.
#[derive(Debug, Clone)]
pub struct Rollout {
    /// Total cost per sample, averaged over rollout samples.
    pub cost_total: Array1<f64>,
    /// Per-step cost `K x T`, averaged over rollout samples.
    pub cost_horizon: Array2<f64>,
    pub states: Array3<f64>,
    /// Applied actions `K x T x nu`, in the same units as the requested ones.
    pub actions: Array3<f64>,
    /// End-effector trajectory `K x T x c` when the dynamics reports one.
    pub ee_states: Option<Array3<f64>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RolloutOptions {
    pub nx: usize,
    pub u_scale: f64,
    pub sample_null_action: bool,
    pub step_dependent: bool,
    pub rollout_samples: usize,
}

/// Bring the caller's state into `K x nx`.
///
/// A single state (`nx` or `1 x nx`) is broadcast to every sample; a full
/// `K x nx` batch is taken as is. Anything else is rejected.
pub fn normalize_state(state: ArrayViewD<f64>, k: usize, nx: usize) -> MppiResult<Array2<f64>> {
    let got = state.shape().to_vec();
    let err = || MppiError::Shape {
        what: "initial state",
        expected: vec![k, nx],
        got: got.clone(),
    };
    match got.as_slice() {
        [n] | [1, n] if *n == nx => {
            let row: Array1<f64> = state.iter().copied().collect();
            Ok(row.broadcast((k, nx)).ok_or_else(err)?.to_owned())
        }
        [rows, n] if *rows == k && *n == nx => Ok(state
            .into_dimensionality::<Ix2>()
            .map_err(|_| err())?
            .to_owned()),
        _ => Err(err()),
    }
}

/// Simulate `perturbed` (`K x T x nu`) from `state` (`K x nx`).
///
/// Each step scales the requested actions, forces the last sample to the
/// null action if asked, steps the dynamics and charges the running cost on
/// the resulting state and the action actually applied. With more than one
/// rollout sample the whole horizon is repeated and the costs averaged; the
/// trajectories of the first repetition are kept.
pub fn rollout<D, C>(
    dynamics: &mut D,
    running_cost: &mut C,
    mut terminal: Option<&mut (dyn TerminalCost + '_)>,
    state: &Array2<f64>,
    perturbed: &Array3<f64>,
    opts: &RolloutOptions,
) -> MppiResult<Rollout>
where
    D: Dynamics + ?Sized,
    C: RunningCost + ?Sized,
{
    let (k, horizon, nu) = perturbed.dim();
    let nx = opts.nx;
    check_shape("initial state", &[k, nx], state.shape())?;
    let m_samples = opts.rollout_samples.max(1);

    let mut cost_total = Array1::<f64>::zeros(k);
    let mut cost_horizon = Array2::<f64>::zeros((k, horizon));
    let mut kept = None;

    for m in 0..m_samples {
        let mut x = state.clone();
        let mut states = Array3::<f64>::zeros((k, horizon, nx));
        let mut actions = Array3::<f64>::zeros((k, horizon, nu));
        let mut ee: Vec<Array2<f64>> = Vec::new();
        let mut cost_samples = Array1::<f64>::zeros(k);

        for t in 0..horizon {
            let mut u = perturbed.index_axis(Axis(1), t).mapv(|v| v * opts.u_scale);
            // 最後のサンプルは停止動作
            if opts.sample_null_action {
                u.row_mut(k - 1).fill(0.0);
            }
            let (next, mut applied) = dynamics.step(&x, &u, opts.step_dependent.then_some(t));
            check_shape("dynamics state", &[k, nx], next.shape())?;
            check_shape("dynamics action", &[k, nu], applied.shape())?;
            if opts.sample_null_action {
                applied.row_mut(k - 1).fill(0.0);
            }
            let c = running_cost.cost(&next, &applied, t);
            check_shape("running cost", &[k], c.shape())?;

            cost_samples += &c;
            let mut col = cost_horizon.column_mut(t);
            col += &c;
            if let Some(p) = dynamics.end_effector() {
                check_shape("end effector", &[k, p.ncols()], p.shape())?;
                ee.push(p);
            }
            states.index_axis_mut(Axis(1), t).assign(&next);
            actions
                .index_axis_mut(Axis(1), t)
                .assign(&applied.mapv(|v| v / opts.u_scale));
            x = next;
        }

        if let Some(term) = terminal.as_deref_mut() {
            let c = term.cost(&states, &actions);
            check_shape("terminal cost", &[k], c.shape())?;
            cost_samples += &c;
        }
        cost_total += &cost_samples;

        if m == 0 {
            let ee_states = if ee.len() == horizon && horizon > 0 {
                let views: Vec<ArrayView2<f64>> = ee.iter().map(|a| a.view()).collect();
                Some(stack(Axis(1), &views).map_err(|e| MppiError::Numerical(e.to_string()))?)
            } else {
                None
            };
            kept = Some((states, actions, ee_states));
        }
    }

    let scale = 1.0 / m_samples as f64;
    cost_total *= scale;
    cost_horizon *= scale;
    let (states, actions, ee_states) = kept.ok_or_else(|| MppiError::Numerical("no rollout ran".into()))?;
    Ok(Rollout {
        cost_total,
        cost_horizon,
        states,
        actions,
        ee_states,
    })
}
