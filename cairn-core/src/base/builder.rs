//! Agent builder and network factory.
use super::{Actor, EnvSpec, Learner};
use crate::{
    error::CairnError,
    replay_buffer::{ReplayBufferConfig, SharedReplayBuffer},
};
use anyhow::Result;

/// Produces the networks of an algorithm from an environment spec.
///
/// Construction only: the returned bundle holds the initial parameters and
/// nothing else.
pub trait NetworkFactory<C> {
    /// Networks produced by the factory.
    type Bundle;

    /// Builds the networks.
    fn build(&self, spec: &EnvSpec, config: &C) -> Result<Self::Bundle>;
}

/// Components built by an [`AgentBuilder`].
pub struct AgentParts {
    /// Owns and updates the parameters.
    pub learner: Box<dyn Learner>,

    /// Acts with snapshots of the parameters.
    pub actor: Box<dyn Actor>,

    /// Stores trajectories and samples windows for the learner.
    pub replay_buffer: SharedReplayBuffer,
}

impl AgentParts {
    /// Checks that the three components share one temporal contract.
    pub fn check_contracts(&self) -> Result<(), CairnError> {
        let l = self.learner.contract();
        let a = self.actor.contract();
        let r = self.replay_buffer.contract();
        if l != a || l != &r {
            return Err(CairnError::config(format!(
                "temporal contracts disagree: learner={:?}, actor={:?}, replay={:?}",
                l, a, r
            )));
        }
        Ok(())
    }
}

/// Assembles a learner, an actor and a replay buffer for one algorithm.
///
/// Implementations check the config against the environment spec and the
/// roles of the network bundle, and fail with
/// [`CairnError::Configuration`] before anything is trained.
pub trait AgentBuilder {
    /// Algorithm configuration.
    type Config;

    /// Networks the builder expects from the factory.
    type Bundle;

    /// Builds the components.
    fn build(
        &self,
        config: &Self::Config,
        network_factory: &dyn NetworkFactory<Self::Config, Bundle = Self::Bundle>,
        spec: &EnvSpec,
        replay_config: &ReplayBufferConfig,
    ) -> Result<AgentParts>;
}
