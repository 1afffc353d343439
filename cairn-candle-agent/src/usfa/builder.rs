use super::{expected_roles, task_dim, UsfaActor, UsfaConfig, UsfaLearner};
use crate::network::NetworkBundle;
use anyhow::Result;
use cairn_core::{
    replay_buffer::{ReplayBufferConfig, SequenceReplayBuffer, SharedReplayBuffer},
    AgentBuilder, AgentParts, EnvSpec, Learner, NetworkFactory,
};
use log::info;
use std::collections::BTreeMap;

/// Assembles a USFA agent.
///
/// Every stored step carries the `cumulant` reported by the environment and
/// the `task` the actor acted on.
#[derive(Clone, Debug, Default)]
pub struct UsfaBuilder;

impl AgentBuilder for UsfaBuilder {
    type Config = UsfaConfig;
    type Bundle = NetworkBundle;

    fn build(
        &self,
        config: &UsfaConfig,
        network_factory: &dyn NetworkFactory<UsfaConfig, Bundle = NetworkBundle>,
        spec: &EnvSpec,
        replay_config: &ReplayBufferConfig,
    ) -> Result<AgentParts> {
        let c = task_dim(spec)?;
        config.check_tasks(c)?;
        let extras = BTreeMap::from([("cumulant".to_string(), c), ("task".to_string(), c)]);
        let contract = config.common.contract(spec, extras)?;
        config.common.check_window(config.n_step, "n_step")?;

        let bundle = network_factory.build(spec, config)?;
        bundle.check_roles(&expected_roles(spec, config)?)?;
        let roles = bundle.roles().clone();
        let device = bundle.device().clone();

        let learner = UsfaLearner::build(config.clone(), contract.clone(), bundle, c)?;
        let params = learner.params()?;
        let actor = UsfaActor::build(config, contract.clone(), roles, &params, device, c)?;
        let replay = SequenceReplayBuffer::build(replay_config, contract)?;
        info!("Built USFA agent with task dim {}", c);

        Ok(AgentParts {
            learner: Box::new(learner),
            actor: Box::new(actor),
            replay_buffer: SharedReplayBuffer::new(replay),
        })
    }
}
