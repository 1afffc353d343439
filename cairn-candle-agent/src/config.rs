//! Configuration shared by every algorithm.
use cairn_core::{error::CairnError, EnvSpec, TemporalContract};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters every algorithm config embeds as its `common` field.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct CommonConfig {
    /// Learning rate of the optimizer.
    pub learning_rate: f64,

    /// Length of sampled windows, burn-in included.
    pub sequence_length: usize,

    /// Discount factor.
    pub discount: f32,

    /// Leading steps of a window used only to warm up the recurrent state.
    pub burn_in_length: usize,

    /// Size of the hidden and the cell vector of the recurrent core.
    pub state_dim: usize,

    /// Updates between copies of the online parameters into the target
    /// networks.
    pub target_update_period: usize,

    /// Gradients are rescaled to this global norm; non-positive disables
    /// clipping.
    pub max_grad_norm: f64,

    /// Seed of the actor's random number generator.
    pub seed: u64,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            sequence_length: 8,
            discount: 0.99,
            burn_in_length: 2,
            state_dim: 32,
            target_update_period: 100,
            max_grad_norm: 40.0,
            seed: 42,
        }
    }
}

impl CommonConfig {
    /// Sets the learning rate.
    pub fn learning_rate(mut self, v: f64) -> Self {
        self.learning_rate = v;
        self
    }

    /// Sets the sequence length.
    pub fn sequence_length(mut self, v: usize) -> Self {
        self.sequence_length = v;
        self
    }

    /// Sets the discount factor.
    pub fn discount(mut self, v: f32) -> Self {
        self.discount = v;
        self
    }

    /// Sets the burn-in length.
    pub fn burn_in_length(mut self, v: usize) -> Self {
        self.burn_in_length = v;
        self
    }

    /// Sets the size of the recurrent state.
    pub fn state_dim(mut self, v: usize) -> Self {
        self.state_dim = v;
        self
    }

    /// Sets the target update period.
    pub fn target_update_period(mut self, v: usize) -> Self {
        self.target_update_period = v;
        self
    }

    /// Sets the maximum gradient norm.
    pub fn max_grad_norm(mut self, v: f64) -> Self {
        self.max_grad_norm = v;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }
}

impl CommonConfig {
    /// Checks that a window holds the burn-in plus `horizon` steps, where
    /// `horizon` is the n-step or unroll length of the loss.
    pub fn check_window(&self, horizon: usize, what: &str) -> Result<(), CairnError> {
        if horizon == 0 {
            return Err(CairnError::config(format!("{} must be positive", what)));
        }
        if self.sequence_length <= self.burn_in_length + horizon {
            return Err(CairnError::config(format!(
                "sequence_length ({}) must exceed burn_in_length ({}) + {} ({})",
                self.sequence_length, self.burn_in_length, what, horizon
            )));
        }
        if self.state_dim == 0 {
            return Err(CairnError::config("state_dim must be positive"));
        }
        Ok(())
    }

    /// Contract of an agent with an LSTM core on an environment with
    /// discrete actions.
    pub fn contract(
        &self,
        spec: &EnvSpec,
        extras: BTreeMap<String, usize>,
    ) -> Result<TemporalContract, CairnError> {
        Ok(TemporalContract {
            sequence_length: self.sequence_length,
            state_shape: vec![2, self.state_dim],
            num_actions: spec.num_actions()?,
            obs_dim: spec.obs_dim(),
            obs_aux: spec.observation.aux.clone(),
            extras,
        })
    }
}
