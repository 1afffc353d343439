use super::{expected_roles, MuZeroActor, MuZeroConfig, MuZeroLearner};
use crate::network::NetworkBundle;
use anyhow::Result;
use cairn_core::{
    replay_buffer::{ReplayBufferConfig, SequenceReplayBuffer, SharedReplayBuffer},
    AgentBuilder, AgentParts, EnvSpec, Learner, NetworkFactory,
};
use log::info;
use std::collections::BTreeMap;

/// Assembles a MuZero agent.
#[derive(Clone, Debug, Default)]
pub struct MuZeroBuilder;

impl AgentBuilder for MuZeroBuilder {
    type Config = MuZeroConfig;
    type Bundle = NetworkBundle;

    fn build(
        &self,
        config: &MuZeroConfig,
        network_factory: &dyn NetworkFactory<MuZeroConfig, Bundle = NetworkBundle>,
        spec: &EnvSpec,
        replay_config: &ReplayBufferConfig,
    ) -> Result<AgentParts> {
        config.check()?;
        let extras = BTreeMap::from([
            ("policy".to_string(), spec.num_actions()?),
            ("value".to_string(), 1),
        ]);
        let contract = config.common.contract(spec, extras)?;
        config.common.check_window(config.simulation_steps, "simulation_steps")?;

        let bundle = network_factory.build(spec, config)?;
        bundle.check_roles(&expected_roles(spec, config)?)?;
        let roles = bundle.roles().clone();
        let device = bundle.device().clone();

        let learner = MuZeroLearner::build(config.clone(), contract.clone(), bundle)?;
        let params = learner.params()?;
        let actor = MuZeroActor::build(config, contract.clone(), roles, &params, device)?;
        let replay = SequenceReplayBuffer::build(replay_config, contract)?;
        info!(
            "Built MuZero agent with {} simulations of depth {}",
            config.num_simulations, config.max_sim_depth
        );

        Ok(AgentParts {
            learner: Box::new(learner),
            actor: Box::new(actor),
            replay_buffer: SharedReplayBuffer::new(replay),
        })
    }
}
