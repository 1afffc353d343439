//! Configuration of Q-learning agent.
use crate::{explorer::Explorer, opt::OptimizerConfig, util::CriticLoss, CommonConfig, Device};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`QLearningBuilder`](super::QLearningBuilder).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct QLearningConfig {
    /// Parameters shared by all algorithms.
    pub common: CommonConfig,

    /// Number of rewards summed before bootstrapping.
    pub n_step: usize,

    /// If `true`, the bootstrap action is chosen by the online network.
    pub double_q: bool,

    /// Weight of the maximum TD error in the priority of a window; the mean
    /// gets the rest.
    pub max_priority_weight: f32,

    /// Type of critic loss function.
    pub critic_loss: CriticLoss,

    /// Exploration in training mode.
    pub explorer: Explorer,

    /// Hidden layers of the value head.
    pub value_units: Vec<usize>,

    /// Optimizer.
    pub opt_config: OptimizerConfig,

    /// Device of the networks.
    pub device: Device,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            n_step: 3,
            double_q: true,
            max_priority_weight: 0.9,
            critic_loss: CriticLoss::Mse,
            explorer: Explorer::default(),
            value_units: vec![64],
            opt_config: OptimizerConfig::default(),
            device: Device::Cpu,
        }
    }
}

impl QLearningConfig {
    /// Sets the common parameters.
    pub fn common(mut self, v: CommonConfig) -> Self {
        self.common = v;
        self
    }

    /// Sets the number of steps of the TD target.
    pub fn n_step(mut self, v: usize) -> Self {
        self.n_step = v;
        self
    }

    /// Enables or disables double Q-learning.
    pub fn double_q(mut self, v: bool) -> Self {
        self.double_q = v;
        self
    }

    /// Sets the weight of the maximum TD error in priorities.
    pub fn max_priority_weight(mut self, v: f32) -> Self {
        self.max_priority_weight = v;
        self
    }

    /// Sets the critic loss.
    pub fn critic_loss(mut self, v: CriticLoss) -> Self {
        self.critic_loss = v;
        self
    }

    /// Sets the explorer.
    pub fn explorer(mut self, v: Explorer) -> Self {
        self.explorer = v;
        self
    }

    /// Sets the hidden layers of the value head.
    pub fn value_units(mut self, v: Vec<usize>) -> Self {
        self.value_units = v;
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

    /// Constructs [`QLearningConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`QLearningConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
