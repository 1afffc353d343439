//! Environment.
use super::{Action, EnvSpec, Observation, Step};
use anyhow::Result;

/// Represents an environment, typically an MDP.
///
/// Failures of [`Env::step`] and [`Env::reset`] end the current episode in the
/// training loop. Return an [`EnvError::Unrecoverable`] to stop training
/// altogether.
///
/// [`EnvError::Unrecoverable`]: crate::error::EnvError::Unrecoverable
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Describes observations and actions of the environment.
    ///
    /// Must return the same value for the lifetime of the environment.
    fn spec(&self) -> EnvSpec;

    /// Starts a new episode.
    fn reset(&mut self) -> Result<Observation>;

    /// Performs an environment step.
    fn step(&mut self, a: Action) -> Result<Step>;

    /// Starts a new episode with a given index.
    ///
    /// The index is used in an arbitrary way, e.g. as a random seed for
    /// reproducible evaluation runs.
    fn reset_with_index(&mut self, _ix: usize) -> Result<Observation> {
        self.reset()
    }
}
