extern crate nalgebra as na;

pub mod bound;
pub mod config;
pub mod dynamics;
pub mod error;
pub mod gaussian;
pub mod halton;
pub mod mppi;
pub mod rollout;
pub mod sampler;
pub mod savgol;
pub mod spline;
pub mod weighting;

pub use config::{Backend, BetaAdaptation, MppiConfig, MppiMode, SampleMethod, SquashFn};
pub use dynamics::{Dynamics, RunningCost, TerminalCost};
pub use error::{MppiError, MppiResult};
pub use mppi::{Cycle, Mppi};
