//! Universal successor feature approximators.
//!
//! The `successor_features` head maps the hidden vector of the LSTM `core`
//! and a policy vector `z` to features `psi(s, a, z)` for every action. The
//! value of action `a` for task `w` is the generalized policy improvement
//! over a set of policies, `max_z psi(s, a, z) . w`.
//!
//! The learner regresses `psi` on n-step sums of the `cumulant` stored with
//! each step, for the task itself and for Gaussian perturbations of it.
mod actor;
mod builder;
mod config;
mod learner;
mod network;
use crate::util::randn;
pub use actor::UsfaActor;
pub use builder::UsfaBuilder;
pub use config::{TaskSupport, UsfaConfig};
pub use learner::UsfaLearner;
pub use network::{expected_roles, task_dim, UsfaNetworkFactory};
use rand::Rng;

/// The task followed by `nsamples` perturbations of it with the given
/// variance, flattened to `[1 + nsamples, task.len()]`.
fn policies_around(task: &[f32], nsamples: usize, variance: f32, rng: &mut impl Rng) -> Vec<f32> {
    let std = variance.sqrt();
    let mut out = Vec::with_capacity((1 + nsamples) * task.len());
    out.extend_from_slice(task);
    for _ in 0..nsamples {
        out.extend(task.iter().map(|w| w + std * randn(rng)));
    }
    out
}

/// Dot product.
fn dot(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y.iter()).map(|(a, b)| a * b).sum()
}

#[cfg(test)]
mod tests;
