//! Q-learning actor.
use super::QLearningConfig;
use crate::{
    acting::ActingNetworks,
    explorer::Explorer,
    network::RoleSpec,
    util::{argmax, to_host},
};
use anyhow::Result;
use cairn_core::{
    params::ParamSet, Actor, ActorOutput, Observation, RecurrentState, TemporalContract,
};
use candle_core::Device;
use rand::{rngs::SmallRng, SeedableRng};
use std::{collections::BTreeMap, sync::Arc};

/// Acts with the explorer over the action values of the loaded snapshot.
pub struct QLearningActor {
    contract: TemporalContract,
    explorer: Explorer,
    nets: ActingNetworks,
    state_dim: usize,
    train: bool,
    rng: SmallRng,
}

impl QLearningActor {
    /// Builds the actor from the initial snapshot of the learner.
    pub fn build(
        config: &QLearningConfig,
        contract: TemporalContract,
        roles: BTreeMap<String, RoleSpec>,
        params: &ParamSet,
        device: Device,
    ) -> Result<Self> {
        Ok(Self {
            contract,
            explorer: config.explorer.clone(),
            nets: ActingNetworks::build(roles, params, device)?,
            state_dim: config.common.state_dim,
            train: true,
            rng: SmallRng::seed_from_u64(config.common.seed),
        })
    }

    /// Action values for `obs` and the next recurrent state.
    pub fn q_values(
        &self,
        obs: &Observation,
        state: &RecurrentState,
    ) -> Result<(Vec<f32>, RecurrentState)> {
        let (h, next) = self.nets.core_step("core", obs, state)?;
        let q = self.nets.nets().mlp("value")?.forward(&h)?;
        Ok((to_host(&q)?, next))
    }
}

impl Actor for QLearningActor {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn initial_state(&self) -> RecurrentState {
        RecurrentState::zeros(2, self.state_dim)
    }

    fn select_action(&mut self, obs: &Observation, state: &RecurrentState) -> Result<ActorOutput> {
        self.contract.check_state(state)?;
        let (q, state) = self.q_values(obs, state)?;
        let action = match self.train {
            true => self.explorer.action(&q, &mut self.rng),
            false => argmax(&q),
        };
        Ok(ActorOutput {
            action,
            state,
            extras: Default::default(),
        })
    }

    fn update_params(&mut self, params: Arc<ParamSet>) -> Result<()> {
        self.nets.update(params)
    }

    fn params_version(&self) -> u64 {
        self.nets.version()
    }

    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }
}
