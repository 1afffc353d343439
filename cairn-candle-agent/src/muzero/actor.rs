//! MuZero actor.
use super::{
    mcts::{search, SearchConfig, SearchResult},
    network::LearnedModel,
    MuZeroConfig,
};
use crate::{acting::ActingNetworks, discretizer::Discretizer, network::RoleSpec};
use anyhow::Result;
use cairn_core::{
    params::ParamSet, Actor, ActorOutput, Extras, Observation, RecurrentState, TemporalContract,
};
use candle_core::Device;
use log::trace;
use rand::{distributions::WeightedIndex, rngs::SmallRng, Rng, SeedableRng};
use std::{collections::BTreeMap, sync::Arc};

/// Plans with the learned model from the latent state of each observation.
///
/// The visit distribution is stored as extra `policy` and the root value as
/// extra `value`.
pub struct MuZeroActor {
    contract: TemporalContract,
    nets: ActingNetworks,
    discretizer: Discretizer,
    search_config: SearchConfig,
    temperature: f32,
    state_dim: usize,
    train: bool,
    rng: SmallRng,
}

impl MuZeroActor {
    /// Builds the actor from the initial snapshot of the learner.
    pub fn build(
        config: &MuZeroConfig,
        contract: TemporalContract,
        roles: BTreeMap<String, RoleSpec>,
        params: &ParamSet,
        device: Device,
    ) -> Result<Self> {
        Ok(Self {
            contract,
            nets: ActingNetworks::build(roles, params, device)?,
            discretizer: config.discretizer(),
            search_config: config.search_config(),
            temperature: config.temperature,
            state_dim: config.common.state_dim,
            train: true,
            rng: SmallRng::seed_from_u64(config.common.seed),
        })
    }

    /// Searches from `obs` and returns the result with the next recurrent
    /// state.
    pub fn plan(
        &self,
        obs: &Observation,
        state: &RecurrentState,
    ) -> Result<(SearchResult, RecurrentState)> {
        let (h, next) = self.nets.core_step("core", obs, state)?;
        let latent = self.nets.nets().mlp("representation")?.forward(&h)?;
        let model = LearnedModel {
            nets: self.nets.nets(),
            discretizer: &self.discretizer,
            num_actions: self.contract.num_actions,
            device: self.nets.device(),
        };
        Ok((search(&model, latent, &self.search_config)?, next))
    }
}

impl Actor for MuZeroActor {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn initial_state(&self) -> RecurrentState {
        RecurrentState::zeros(2, self.state_dim)
    }

    fn select_action(&mut self, obs: &Observation, state: &RecurrentState) -> Result<ActorOutput> {
        self.contract.check_state(state)?;
        let (result, state) = self.plan(obs, state)?;
        let action = match self.train {
            true => {
                let probs = result.action_probs(self.temperature);
                match WeightedIndex::new(&probs) {
                    Ok(dist) => self.rng.sample(dist),
                    Err(_) => result.best_action(),
                }
            }
            false => result.best_action(),
        };
        trace!("visits={:?}, value={}, action={}", result.visits, result.value, action);

        let mut extras = Extras::new();
        extras.insert("policy".to_string(), result.policy);
        extras.insert("value".to_string(), vec![result.value]);
        Ok(ActorOutput { action, state, extras })
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
