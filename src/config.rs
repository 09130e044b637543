use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MppiError, MppiResult};

/// How the controller samples and updates its control distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MppiMode {
    /// Fresh Gaussian noise every cycle, mean moved by the weighted noise.
    Simple,
    /// Spline-shaped deltas around a persistent mean updated from the
    /// discounted cost horizon.
    HaltonSpline,
}

/// Source of the deltas used by [`MppiMode::HaltonSpline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleMethod {
    Random,
    Halton,
}

/// Squashing applied to `mean + delta` before rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SquashFn {
    Clamp,
    ClampRescale,
    Tanh,
    Identity,
}

/// Execution substrate for the batched numeric helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Serial,
    Rayon,
}

macro_rules! impl_name {
    ($ty:ty, $what:literal, $($variant:path => $name:literal),+ $(,)?) => {
        impl FromStr for $ty {
            type Err = MppiError;

            fn from_str(s: &str) -> MppiResult<Self> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(MppiError::Config(format!(
                        concat!("unknown ", $what, " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($variant => $name,)+
                };
                f.write_str(name)
            }
        }
    };
}

impl_name!(MppiMode, "mppi mode", MppiMode::Simple => "simple", MppiMode::HaltonSpline => "halton-spline");
impl_name!(SampleMethod, "sample method", SampleMethod::Random => "random", SampleMethod::Halton => "halton");
impl_name!(
    SquashFn,
    "squash function",
    SquashFn::Clamp => "clamp",
    SquashFn::ClampRescale => "clamp-rescale",
    SquashFn::Tanh => "tanh",
    SquashFn::Identity => "identity",
);
impl_name!(Backend, "backend", Backend::Serial => "serial", Backend::Rayon => "rayon");

/// Temperature adaptation driven by the partition value `eta`.
///
/// `eta` above `eta_upper` means many samples share the mass, so β shrinks;
/// below `eta_lower` the distribution is too peaked and β grows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaAdaptation {
    pub eta_upper: f64,
    pub eta_lower: f64,
    pub shrink: f64,
    pub grow: f64,
}

impl Default for BetaAdaptation {
    fn default() -> Self {
        Self {
            eta_upper: 20.0,
            eta_lower: 10.0,
            shrink: 0.9,
            grow: 1.2,
        }
    }
}

impl BetaAdaptation {
    pub fn adapt(&self, beta: f64, eta: f64) -> f64 {
        if eta > self.eta_upper {
            beta * self.shrink
        } else if eta < self.eta_lower {
            beta * self.grow
        } else {
            beta
        }
    }
}

/// Controller configuration. Fixed for the lifetime of an [`crate::Mppi`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MppiConfig {
    /// Number of sampled trajectories K.
    pub num_samples: usize,
    /// Planning horizon T.
    pub horizon: usize,
    /// State dimension.
    pub nx: usize,
    /// Control noise covariance (nu x nu). Its size defines nu.
    pub noise_sigma: na::DMatrix<f64>,
    pub u_min: Option<Vec<f64>>,
    pub u_max: Option<Vec<f64>>,
    /// Temperature λ of the simple-mode weights and the action cost.
    pub lambda: f64,
    /// Discount γ of the cost-to-go.
    pub gamma: f64,
    pub mode: MppiMode,
    pub sample_method: SampleMethod,
    pub multi_modal: bool,
    pub sample_null_action: bool,
    pub u_per_command: usize,
    pub u_scale: f64,
    pub step_dependent_dynamics: bool,
    /// Rollouts per action sequence, averaged for stochastic dynamics.
    pub rollout_samples: usize,
    pub filter_u: bool,
    pub sgf_window: usize,
    pub sgf_order: usize,
    pub step_size_mean: f64,
    pub update_cov: bool,
    pub step_size_cov: f64,
    pub kappa: f64,
    pub knot_scale: usize,
    pub spline_degree: usize,
    pub seed: u64,
    pub squash_fn: SquashFn,
    /// Add the action-perturbation cost to the total cost.
    pub perturbation_cost: bool,
    pub noise_abs_cost: bool,
    pub beta_adaptation: Option<BetaAdaptation>,
    pub top_k: usize,
    /// State channels reported in the top trajectories. Channels beyond nx
    /// are ignored; if none remain the full state is reported.
    pub position_channels: Vec<usize>,
    pub backend: Backend,
}

impl Default for MppiConfig {
    fn default() -> Self {
        Self {
            num_samples: 100,
            horizon: 20,
            nx: 2,
            noise_sigma: na::DMatrix::identity(1, 1),
            u_min: None,
            u_max: None,
            lambda: 1.0,
            gamma: 0.95,
            mode: MppiMode::HaltonSpline,
            sample_method: SampleMethod::Halton,
            multi_modal: false,
            sample_null_action: false,
            u_per_command: 1,
            u_scale: 1.0,
            step_dependent_dynamics: false,
            rollout_samples: 1,
            filter_u: true,
            sgf_window: 9,
            sgf_order: 2,
            step_size_mean: 0.98,
            update_cov: false,
            step_size_cov: 0.7,
            kappa: 0.005,
            knot_scale: 4,
            spline_degree: 2,
            seed: 0,
            squash_fn: SquashFn::Clamp,
            perturbation_cost: true,
            noise_abs_cost: false,
            beta_adaptation: None,
            top_k: 20,
            position_channels: vec![0, 2],
            backend: Backend::Rayon,
        }
    }
}

impl MppiConfig {
    /// Control dimension.
    pub fn nu(&self) -> usize {
        self.noise_sigma.nrows()
    }

    /// Number of spline knots per control dimension, at least one.
    pub fn n_knots(&self) -> usize {
        (self.horizon / self.knot_scale.max(1)).max(1)
    }

    /// Resolve the bounds pair. A single given bound is mirrored.
    pub fn bounds(&self) -> MppiResult<Option<(Vec<f64>, Vec<f64>)>> {
        let (min, max) = match (&self.u_min, &self.u_max) {
            (None, None) => return Ok(None),
            (Some(min), None) => (min.clone(), min.iter().map(|v| -v).collect()),
            (None, Some(max)) => (max.iter().map(|v| -v).collect(), max.clone()),
            (Some(min), Some(max)) => (min.clone(), max.clone()),
        };
        let nu = self.nu();
        if min.len() != nu || max.len() != nu {
            return Err(MppiError::Shape {
                what: "control bounds",
                expected: vec![nu],
                got: vec![min.len(), max.len()],
            });
        }
        if let Some(j) = (0..nu).find(|&j| min[j] > max[j]) {
            return Err(MppiError::Config(format!(
                "u_min[{j}] = {} exceeds u_max[{j}] = {}",
                min[j], max[j]
            )));
        }
        Ok(Some((min, max)))
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> MppiResult<()> {
        if self.num_samples == 0 {
            return Err(MppiError::Config("num_samples must be positive".into()));
        }
        if self.horizon == 0 {
            return Err(MppiError::Config("horizon must be positive".into()));
        }
        if self.nx == 0 {
            return Err(MppiError::Config("nx must be positive".into()));
        }
        if self.noise_sigma.nrows() == 0 || !self.noise_sigma.is_square() {
            return Err(MppiError::Covariance(format!(
                "noise_sigma must be a non-empty square matrix, got {}x{}",
                self.noise_sigma.nrows(),
                self.noise_sigma.ncols()
            )));
        }
        if !(self.lambda > 0.0) {
            return Err(MppiError::Config(format!(
                "lambda must be positive, got {}",
                self.lambda
            )));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(MppiError::Config(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        if self.u_per_command == 0 || self.u_per_command > self.horizon {
            return Err(MppiError::Config(format!(
                "u_per_command must be in [1, {}], got {}",
                self.horizon, self.u_per_command
            )));
        }
        if self.multi_modal {
            if self.mode != MppiMode::HaltonSpline {
                return Err(MppiError::Config(
                    "multi_modal requires the halton-spline mode".into(),
                ));
            }
            if self.num_samples % 2 != 0 || self.num_samples < 2 {
                return Err(MppiError::Config(format!(
                    "multi_modal requires an even num_samples, got {}",
                    self.num_samples
                )));
            }
        }
        if self.rollout_samples == 0 {
            return Err(MppiError::Config("rollout_samples must be positive".into()));
        }
        if self.u_scale == 0.0 || !self.u_scale.is_finite() {
            return Err(MppiError::Config(format!(
                "u_scale must be finite and non-zero, got {}",
                self.u_scale
            )));
        }
        if self.knot_scale == 0 {
            return Err(MppiError::Config("knot_scale must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.step_size_mean) {
            return Err(MppiError::Config(format!(
                "step_size_mean must be in [0, 1], got {}",
                self.step_size_mean
            )));
        }
        if self.update_cov && (!(0.0..=1.0).contains(&self.step_size_cov) || self.kappa < 0.0) {
            return Err(MppiError::Config(format!(
                "covariance update needs step_size_cov in [0, 1] and kappa >= 0, got {} and {}",
                self.step_size_cov, self.kappa
            )));
        }
        if self.filter_u && self.sgf_window < 3 {
            return Err(MppiError::Config(format!(
                "sgf_window must be at least 3, got {}",
                self.sgf_window
            )));
        }
        self.bounds()?;
        Ok(())
    }
}
