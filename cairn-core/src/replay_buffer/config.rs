//! Configuration of the replay buffer.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How importance weights are normalized.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum WeightNormalizer {
    /// Divide by the largest possible weight over all stored trajectories.
    All,

    /// Divide by the largest weight in the batch.
    Batch,
}

/// Configuration of prioritized sampling.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PerConfig {
    /// Exponent applied to priorities. `0` gives uniform sampling over
    /// trajectories.
    pub alpha: f32,

    /// Initial importance sampling exponent.
    pub beta_0: f32,

    /// Final importance sampling exponent.
    pub beta_final: f32,

    /// Number of sampled batches after which `beta` reaches `beta_final`.
    pub n_opts_final: usize,

    /// Normalization of importance weights.
    pub normalize: WeightNormalizer,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.9,
            beta_0: 0.6,
            beta_final: 1.0,
            n_opts_final: 100_000,
            normalize: WeightNormalizer::Batch,
        }
    }
}

impl PerConfig {
    /// Sets `alpha`.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets `beta_0`.
    pub fn beta_0(mut self, beta_0: f32) -> Self {
        self.beta_0 = beta_0;
        self
    }

    /// Sets `beta_final`.
    pub fn beta_final(mut self, beta_final: f32) -> Self {
        self.beta_final = beta_final;
        self
    }

    /// Sets `n_opts_final`.
    pub fn n_opts_final(mut self, n_opts_final: usize) -> Self {
        self.n_opts_final = n_opts_final;
        self
    }

    /// Sets the weight normalizer.
    pub fn normalize(mut self, normalize: WeightNormalizer) -> Self {
        self.normalize = normalize;
        self
    }
}

/// Configuration of [`SequenceReplayBuffer`](super::SequenceReplayBuffer).
///
/// The sequence length is not part of it: the agent builder takes it from the
/// algorithm config so that windows always match what the learner expects.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayBufferConfig {
    /// Maximum number of stored trajectories.
    pub capacity: usize,

    /// Distance between window starts. `None` means the sequence length,
    /// i.e. windows do not overlap.
    #[serde(default)]
    pub period: Option<usize>,

    /// Random seed of sampling.
    pub seed: u64,

    /// Prioritized sampling, uniform if `None`.
    #[serde(default)]
    pub per_config: Option<PerConfig>,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            period: None,
            seed: 42,
            per_config: None,
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the capacity in trajectories.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the distance between window starts.
    pub fn period(mut self, period: usize) -> Self {
        self.period = Some(period);
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enables prioritized sampling.
    pub fn per_config(mut self, per_config: Option<PerConfig>) -> Self {
        self.per_config = per_config;
        self
    }

    /// Constructs [`ReplayBufferConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ReplayBufferConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
