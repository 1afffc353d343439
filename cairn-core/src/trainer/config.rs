//! Configuration of [`Trainer`](super::Trainer).
use crate::error::CairnError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Trainer`](super::Trainer).
///
/// Budgets and intervals equal to `usize::MAX` are disabled.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrainerConfig {
    /// The maximum number of environment steps.
    pub max_env_steps: usize,

    /// The maximum number of learner updates.
    pub max_learn_steps: usize,

    /// The maximum number of episodes.
    pub max_episodes: usize,

    /// Stored steps required before the first update.
    pub min_replay_transitions: usize,

    /// Interval of learning in environment steps.
    pub learn_interval: usize,

    /// Learner updates per learning phase.
    pub updates_per_learn: usize,

    /// Number of windows per batch.
    pub batch_size: usize,

    /// Interval of publishing parameters to the actor in learner updates.
    pub publish_interval: usize,

    /// Episodes are cut after this many steps.
    pub max_episode_steps: usize,

    /// In-flight trajectories are committed in chunks of this length.
    pub max_trajectory_length: usize,

    /// Consecutive environment failures tolerated before training stops.
    pub max_consecutive_env_failures: usize,

    /// Interval of evaluation in learner updates.
    pub eval_interval: usize,

    /// Interval of flushing records in learner updates.
    pub flush_record_interval: usize,

    /// Interval of saving parameters in learner updates.
    pub save_interval: usize,

    /// Where to save parameters and replay occupancy.
    #[serde(default)]
    pub model_dir: Option<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_env_steps: usize::MAX,
            max_learn_steps: usize::MAX,
            max_episodes: usize::MAX,
            min_replay_transitions: 100,
            learn_interval: 1,
            updates_per_learn: 1,
            batch_size: 32,
            publish_interval: 1,
            max_episode_steps: usize::MAX,
            max_trajectory_length: usize::MAX,
            max_consecutive_env_failures: 100,
            eval_interval: usize::MAX,
            flush_record_interval: usize::MAX,
            save_interval: usize::MAX,
            model_dir: None,
        }
    }
}

impl TrainerConfig {
    /// Sets the maximum number of environment steps.
    pub fn max_env_steps(mut self, v: usize) -> Self {
        self.max_env_steps = v;
        self
    }

    /// Sets the maximum number of learner updates.
    pub fn max_learn_steps(mut self, v: usize) -> Self {
        self.max_learn_steps = v;
        self
    }

    /// Sets the maximum number of episodes.
    pub fn max_episodes(mut self, v: usize) -> Self {
        self.max_episodes = v;
        self
    }

    /// Sets the number of stored steps required before learning.
    pub fn min_replay_transitions(mut self, v: usize) -> Self {
        self.min_replay_transitions = v;
        self
    }

    /// Sets the interval of learning in environment steps.
    pub fn learn_interval(mut self, v: usize) -> Self {
        self.learn_interval = v;
        self
    }

    /// Sets the number of updates per learning phase.
    pub fn updates_per_learn(mut self, v: usize) -> Self {
        self.updates_per_learn = v;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the interval of publishing parameters in learner updates.
    pub fn publish_interval(mut self, v: usize) -> Self {
        self.publish_interval = v;
        self
    }

    /// Sets the maximum length of an episode.
    pub fn max_episode_steps(mut self, v: usize) -> Self {
        self.max_episode_steps = v;
        self
    }

    /// Sets the chunk length of long episodes.
    pub fn max_trajectory_length(mut self, v: usize) -> Self {
        self.max_trajectory_length = v;
        self
    }

    /// Sets the number of tolerated consecutive environment failures.
    pub fn max_consecutive_env_failures(mut self, v: usize) -> Self {
        self.max_consecutive_env_failures = v;
        self
    }

    /// Sets the interval of evaluation in learner updates.
    pub fn eval_interval(mut self, v: usize) -> Self {
        self.eval_interval = v;
        self
    }

    /// Sets the interval of flushing records in learner updates.
    pub fn flush_record_interval(mut self, v: usize) -> Self {
        self.flush_record_interval = v;
        self
    }

    /// Sets the interval of saving parameters in learner updates.
    pub fn save_interval(mut self, v: usize) -> Self {
        self.save_interval = v;
        self
    }

    /// Sets the directory parameters are saved in.
    pub fn model_dir(mut self, v: impl Into<String>) -> Self {
        self.model_dir = Some(v.into());
        self
    }

    /// Checks that batch size and intervals are positive.
    pub fn check(&self) -> Result<(), CairnError> {
        if self.batch_size == 0 {
            return Err(CairnError::config("batch_size must be positive"));
        }
        for (name, v) in [
            ("learn_interval", self.learn_interval),
            ("publish_interval", self.publish_interval),
            ("eval_interval", self.eval_interval),
            ("flush_record_interval", self.flush_record_interval),
            ("save_interval", self.save_interval),
        ]
        .iter()
        {
            if *v == 0 {
                return Err(CairnError::config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
