//! Configuration of MuZero agent.
use super::mcts::SearchConfig;
use crate::{discretizer::Discretizer, opt::OptimizerConfig, CommonConfig, Device};
use anyhow::Result;
use cairn_core::error::CairnError;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`MuZeroBuilder`](super::MuZeroBuilder).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MuZeroConfig {
    /// Parameters shared by all algorithms.
    pub common: CommonConfig,

    /// Simulations per action; zero acts on the prior policy.
    pub num_simulations: usize,

    /// Maximum depth of a simulation.
    pub max_sim_depth: usize,

    /// Steps the dynamics are unrolled in the loss.
    pub simulation_steps: usize,

    /// Rewards summed before bootstrapping from the stored search value.
    pub td_steps: usize,

    /// Bins of the categorical value and reward heads.
    pub num_bins: usize,

    /// Bound of the support of the value and reward heads.
    pub max_scalar_value: f32,

    /// Scale of the gradient flowing back through the dynamics.
    pub scale_grad: f64,

    /// PUCT constant.
    pub pb_c_init: f32,

    /// PUCT visit scale.
    pub pb_c_base: f32,

    /// Temperature of the visit distribution sampled in training mode.
    pub temperature: f32,

    /// Weight of the policy loss.
    pub policy_coeff: f32,

    /// Weight of the value loss.
    pub value_coeff: f32,

    /// Weight of the reward loss.
    pub reward_coeff: f32,

    /// Weight of the maximum value error in the priority of a window.
    pub max_priority_weight: f32,

    /// Size of the latent state of the model.
    pub latent_dim: usize,

    /// Hidden layers of the model networks.
    pub model_units: Vec<usize>,

    /// Optimizer.
    pub opt_config: OptimizerConfig,

    /// Device of the networks.
    pub device: Device,
}

impl Default for MuZeroConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            num_simulations: 16,
            max_sim_depth: 5,
            simulation_steps: 3,
            td_steps: 5,
            num_bins: 21,
            max_scalar_value: 10.0,
            scale_grad: 0.5,
            pb_c_init: 1.25,
            pb_c_base: 19652.0,
            temperature: 1.0,
            policy_coeff: 1.0,
            value_coeff: 0.25,
            reward_coeff: 1.0,
            max_priority_weight: 0.9,
            latent_dim: 32,
            model_units: vec![64],
            opt_config: OptimizerConfig::default(),
            device: Device::Cpu,
        }
    }
}

impl MuZeroConfig {
    /// Sets the common parameters.
    pub fn common(mut self, v: CommonConfig) -> Self {
        self.common = v;
        self
    }

    /// Sets the number of simulations.
    pub fn num_simulations(mut self, v: usize) -> Self {
        self.num_simulations = v;
        self
    }

    /// Sets the maximum simulation depth.
    pub fn max_sim_depth(mut self, v: usize) -> Self {
        self.max_sim_depth = v;
        self
    }

    /// Sets the number of unrolled steps.
    pub fn simulation_steps(mut self, v: usize) -> Self {
        self.simulation_steps = v;
        self
    }

    /// Sets the number of steps of the value target.
    pub fn td_steps(mut self, v: usize) -> Self {
        self.td_steps = v;
        self
    }

    /// Sets the number of bins.
    pub fn num_bins(mut self, v: usize) -> Self {
        self.num_bins = v;
        self
    }

    /// Sets the bound of the support.
    pub fn max_scalar_value(mut self, v: f32) -> Self {
        self.max_scalar_value = v;
        self
    }

    /// Sets the gradient scale of the dynamics.
    pub fn scale_grad(mut self, v: f64) -> Self {
        self.scale_grad = v;
        self
    }

    /// Sets the temperature.
    pub fn temperature(mut self, v: f32) -> Self {
        self.temperature = v;
        self
    }

    /// Sets the weights of the policy, value and reward losses.
    pub fn loss_coeffs(mut self, policy: f32, value: f32, reward: f32) -> Self {
        self.policy_coeff = policy;
        self.value_coeff = value;
        self.reward_coeff = reward;
        self
    }

    /// Sets the size of the latent state.
    pub fn latent_dim(mut self, v: usize) -> Self {
        self.latent_dim = v;
        self
    }

    /// Sets the hidden layers of the model networks.
    pub fn model_units(mut self, v: Vec<usize>) -> Self {
        self.model_units = v;
        self
    }

    /// Sets the optimizer.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = v;
        self
    }

    /// Support of the value and reward heads.
    pub fn discretizer(&self) -> Discretizer {
        Discretizer::new(self.num_bins, self.max_scalar_value)
    }

    /// Parameters of the tree search.
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            num_simulations: self.num_simulations,
            max_sim_depth: self.max_sim_depth,
            discount: self.common.discount,
            pb_c_init: self.pb_c_init,
            pb_c_base: self.pb_c_base,
        }
    }

    /// Checks the search and model parameters.
    pub fn check(&self) -> Result<(), CairnError> {
        if self.max_sim_depth == 0 {
            return Err(CairnError::config("max_sim_depth must be positive"));
        }
        if self.td_steps == 0 {
            return Err(CairnError::config("td_steps must be positive"));
        }
        if self.num_bins < 2 || self.max_scalar_value <= 0.0 {
            return Err(CairnError::config(format!(
                "value support needs 2 bins and a positive bound, got {} bins on [-{}, {}]",
                self.num_bins, self.max_scalar_value, self.max_scalar_value
            )));
        }
        if self.latent_dim == 0 {
            return Err(CairnError::config("latent_dim must be positive"));
        }
        if self.temperature < 0.0 {
            return Err(CairnError::config("temperature must be non-negative"));
        }
        Ok(())
    }

    /// Constructs [`MuZeroConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`MuZeroConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
