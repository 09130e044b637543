use ndarray::{Array1, Array2, Array3};

/// Batched transition model simulated by the rollout.
///
/// `state` is `K x nx` and `action` is `K x nu`. Returns the next state
/// together with the action that was actually applied, which may differ from
/// the requested one (actuator limits, attached constraints, ...). `t` is
/// `Some(step)` only for step-dependent dynamics.
pub trait Dynamics {
    fn step(&mut self, state: &Array2<f64>, action: &Array2<f64>, t: Option<usize>) -> (Array2<f64>, Array2<f64>);

    /// `K x 3` end-effector point after the last `step`, if the model tracks one.
    fn end_effector(&self) -> Option<Array2<f64>> {
        None
    }
}

/// Per-step cost of a batch of (next state, applied action) pairs.
pub trait RunningCost {
    fn cost(&mut self, state: &Array2<f64>, action: &Array2<f64>, t: usize) -> Array1<f64>;
}

/// Cost on whole `K x T x nx` / `K x T x nu` trajectories.
pub trait TerminalCost {
    fn cost(&mut self, states: &Array3<f64>, actions: &Array3<f64>) -> Array1<f64>;
}

impl<F> Dynamics for F
where
    F: FnMut(&Array2<f64>, &Array2<f64>, Option<usize>) -> (Array2<f64>, Array2<f64>),
{
    fn step(&mut self, state: &Array2<f64>, action: &Array2<f64>, t: Option<usize>) -> (Array2<f64>, Array2<f64>) {
        self(state, action, t)
    }
}

impl<F> RunningCost for F
where
    F: FnMut(&Array2<f64>, &Array2<f64>, usize) -> Array1<f64>,
{
    fn cost(&mut self, state: &Array2<f64>, action: &Array2<f64>, t: usize) -> Array1<f64> {
        self(state, action, t)
    }
}

impl<F> TerminalCost for F
where
    F: FnMut(&Array3<f64>, &Array3<f64>) -> Array1<f64>,
{
    fn cost(&mut self, states: &Array3<f64>, actions: &Array3<f64>) -> Array1<f64> {
        self(states, actions)
    }
}
