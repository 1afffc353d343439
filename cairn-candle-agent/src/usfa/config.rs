//! Configuration of USFA agent.
use crate::{explorer::Explorer, opt::OptimizerConfig, CommonConfig, Device};
use anyhow::Result;
use cairn_core::error::CairnError;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Policies the actor maximizes over in evaluation mode.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum TaskSupport {
    /// The training tasks.
    Train,

    /// The current task only.
    Eval,

    /// The training tasks and the current task.
    TrainEval,
}

/// Configuration of [`UsfaBuilder`](super::UsfaBuilder).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct UsfaConfig {
    /// Parameters shared by all algorithms.
    pub common: CommonConfig,

    /// Number of cumulants summed before bootstrapping.
    pub n_step: usize,

    /// Weight of the maximum TD error in the priority of a window.
    pub max_priority_weight: f32,

    /// Gaussian perturbations of the task added to the policies in training.
    pub nsamples: usize,

    /// Variance of the perturbations.
    pub variance: f32,

    /// Policies used in evaluation mode.
    pub eval_task_support: TaskSupport,

    /// Task vectors seen in training, used by [`TaskSupport::Train`] and
    /// [`TaskSupport::TrainEval`].
    pub train_tasks: Vec<Vec<f32>>,

    /// Weight of the TD loss of `Q(s, a, w) = psi(s, a, w) . w` on the
    /// reward; zero disables it.
    pub q_coeff: f32,

    /// Exploration in training mode.
    pub explorer: Explorer,

    /// Hidden layers of the successor feature head.
    pub sf_units: Vec<usize>,

    /// Optimizer.
    pub opt_config: OptimizerConfig,

    /// Device of the networks.
    pub device: Device,
}

impl Default for UsfaConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            n_step: 3,
            max_priority_weight: 0.9,
            nsamples: 4,
            variance: 0.5,
            eval_task_support: TaskSupport::Eval,
            train_tasks: vec![],
            q_coeff: 0.0,
            explorer: Explorer::default(),
            sf_units: vec![64],
            opt_config: OptimizerConfig::default(),
            device: Device::Cpu,
        }
    }
}

impl UsfaConfig {
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

    /// Sets the weight of the maximum TD error in priorities.
    pub fn max_priority_weight(mut self, v: f32) -> Self {
        self.max_priority_weight = v;
        self
    }

    /// Sets the number of sampled policies.
    pub fn nsamples(mut self, v: usize) -> Self {
        self.nsamples = v;
        self
    }

    /// Sets the variance of sampled policies.
    pub fn variance(mut self, v: f32) -> Self {
        self.variance = v;
        self
    }

    /// Sets the evaluation policies.
    pub fn eval_task_support(mut self, v: TaskSupport) -> Self {
        self.eval_task_support = v;
        self
    }

    /// Sets the training tasks.
    pub fn train_tasks(mut self, v: Vec<Vec<f32>>) -> Self {
        self.train_tasks = v;
        self
    }

    /// Sets the weight of the reward TD loss.
    pub fn q_coeff(mut self, v: f32) -> Self {
        self.q_coeff = v;
        self
    }

    /// Sets the explorer.
    pub fn explorer(mut self, v: Explorer) -> Self {
        self.explorer = v;
        self
    }

    /// Sets the hidden layers of the successor feature head.
    pub fn sf_units(mut self, v: Vec<usize>) -> Self {
        self.sf_units = v;
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

    /// Number of policies evaluated per step in training.
    pub fn num_train_policies(&self) -> usize {
        1 + self.nsamples
    }

    /// Checks the task-related fields against the task dimension.
    pub fn check_tasks(&self, task_dim: usize) -> Result<(), CairnError> {
        if self.variance.is_nan() || self.variance < 0.0 {
            return Err(CairnError::config(format!(
                "variance must be non-negative, got {}",
                self.variance
            )));
        }
        if let Some(w) = self.train_tasks.iter().find(|w| w.len() != task_dim) {
            return Err(CairnError::config(format!(
                "train task of length {} does not match task dim {}",
                w.len(),
                task_dim
            )));
        }
        if self.eval_task_support != TaskSupport::Eval && self.train_tasks.is_empty() {
            return Err(CairnError::config(format!(
                "eval_task_support {:?} requires train_tasks",
                self.eval_task_support
            )));
        }
        Ok(())
    }

    /// Constructs [`UsfaConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`UsfaConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
