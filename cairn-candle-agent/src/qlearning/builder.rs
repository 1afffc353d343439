use super::{expected_roles, QLearningActor, QLearningConfig, QLearningLearner};
use crate::network::NetworkBundle;
use anyhow::Result;
use cairn_core::{
    replay_buffer::{ReplayBufferConfig, SequenceReplayBuffer, SharedReplayBuffer},
    AgentBuilder, AgentParts, EnvSpec, Learner, NetworkFactory,
};
use log::info;
use std::collections::BTreeMap;

/// Assembles a Q-learning agent.
#[derive(Clone, Debug, Default)]
pub struct QLearningBuilder;

impl AgentBuilder for QLearningBuilder {
    type Config = QLearningConfig;
    type Bundle = NetworkBundle;

    fn build(
        &self,
        config: &QLearningConfig,
        network_factory: &dyn NetworkFactory<QLearningConfig, Bundle = NetworkBundle>,
        spec: &EnvSpec,
        replay_config: &ReplayBufferConfig,
    ) -> Result<AgentParts> {
        let contract = config.common.contract(spec, BTreeMap::new())?;
        config.common.check_window(config.n_step, "n_step")?;

        let bundle = network_factory.build(spec, config)?;
        bundle.check_roles(&expected_roles(spec, config)?)?;
        let roles = bundle.roles().clone();
        let device = bundle.device().clone();

        let learner = QLearningLearner::build(config.clone(), contract.clone(), bundle)?;
        let params = learner.params()?;
        let actor = QLearningActor::build(config, contract.clone(), roles, &params, device)?;
        let replay = SequenceReplayBuffer::build(replay_config, contract)?;
        info!("Built Q-learning agent");

        Ok(AgentParts {
            learner: Box::new(learner),
            actor: Box::new(actor),
            replay_buffer: SharedReplayBuffer::new(replay),
        })
    }
}
