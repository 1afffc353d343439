//! Experiment declaration and the runner.
use anyhow::Result;
use cairn_candle_agent::{AgentEntry, AlgorithmConfig, Registry};
use cairn_core::{
    error::CairnError, record::AggregateRecorder, replay_buffer::ReplayBufferConfig, AgentParts,
    Env, Evaluator, Trainer, TrainerConfig, TrainingSummary,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Declares how to make the environment and the agent of an experiment.
pub trait Experiment {
    /// Environment of the experiment.
    type Env: Env;

    /// Makes an environment with a given seed.
    fn make_environment(&self, seed: i64) -> Result<Self::Env>;

    /// Makes the agent, resolved from its algorithm once.
    fn make_agent(&self) -> Result<AgentEntry>;

    /// Configuration of the replay buffer.
    fn replay_config(&self) -> ReplayBufferConfig {
        ReplayBufferConfig::default()
    }

    /// Configuration of the training loop.
    fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig::default()
    }

    /// Seed of the training environment.
    fn seed(&self) -> i64 {
        0
    }

    /// Evaluator run by the training loop, if any.
    fn make_evaluator(&self) -> Result<Option<Box<dyn Evaluator>>> {
        Ok(None)
    }
}

/// Experiment as a YAML file: algorithm id, agent, replay and trainer
/// configs.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ExperimentConfig {
    /// Id the algorithm is resolved with.
    pub algorithm: String,

    /// Configuration of the agent, the variant of [`Self::algorithm`].
    pub agent_config: AlgorithmConfig,

    /// Configuration of the replay buffer.
    #[serde(default)]
    pub replay_config: ReplayBufferConfig,

    /// Configuration of the training loop.
    #[serde(default)]
    pub trainer_config: TrainerConfig,

    /// Seed of the training environment.
    #[serde(default)]
    pub seed: i64,
}

impl ExperimentConfig {
    /// Experiment of the algorithm of `agent_config` with default replay and
    /// trainer configs.
    pub fn new(agent_config: AlgorithmConfig) -> Self {
        Self {
            algorithm: agent_config.algorithm().to_string(),
            agent_config,
            replay_config: ReplayBufferConfig::default(),
            trainer_config: TrainerConfig::default(),
            seed: 0,
        }
    }

    /// Sets the algorithm id.
    pub fn algorithm(mut self, v: impl Into<String>) -> Self {
        self.algorithm = v.into();
        self
    }

    /// Sets the replay buffer config.
    pub fn replay_config(mut self, v: ReplayBufferConfig) -> Self {
        self.replay_config = v;
        self
    }

    /// Sets the trainer config.
    pub fn trainer_config(mut self, v: TrainerConfig) -> Self {
        self.trainer_config = v;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, v: i64) -> Self {
        self.seed = v;
        self
    }

    /// Resolves the agent in `registry`.
    pub fn resolve(&self, registry: &Registry) -> Result<AgentEntry, CairnError> {
        registry.resolve(&self.algorithm, self.agent_config.clone())
    }

    /// Constructs [`ExperimentConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ExperimentConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// [`Experiment`] of an [`ExperimentConfig`] on environment `E`.
pub struct ConfiguredExperiment<E: Env> {
    config: ExperimentConfig,
    env_config: E::Config,
    registry: Registry,
}

impl<E: Env> ConfiguredExperiment<E> {
    /// Experiment resolved with the default [`Registry`].
    pub fn new(config: ExperimentConfig, env_config: E::Config) -> Self {
        Self::with_registry(config, env_config, Registry::default())
    }

    /// Experiment resolved with `registry`.
    pub fn with_registry(
        config: ExperimentConfig,
        env_config: E::Config,
        registry: Registry,
    ) -> Self {
        Self {
            config,
            env_config,
            registry,
        }
    }

    /// The experiment config.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }
}

impl<E: Env> Experiment for ConfiguredExperiment<E> {
    type Env = E;

    fn make_environment(&self, seed: i64) -> Result<E> {
        E::build(&self.env_config, seed)
    }

    fn make_agent(&self) -> Result<AgentEntry> {
        Ok(self.config.resolve(&self.registry)?)
    }

    fn replay_config(&self) -> ReplayBufferConfig {
        self.config.replay_config.clone()
    }

    fn trainer_config(&self) -> TrainerConfig {
        self.config.trainer_config.clone()
    }

    fn seed(&self) -> i64 {
        self.config.seed
    }
}

/// Result of [`run`]: the counters of the loop and the trained agent.
pub struct Run {
    /// Counters at the end of training.
    pub summary: TrainingSummary,

    /// Learner, actor and replay buffer after training.
    pub agent: AgentParts,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Builds the agent of an experiment and trains it.
///
/// ```mermaid
/// flowchart LR
///   X[Experiment] -- make_agent --> E[AgentEntry]
///   X -- make_environment --> Env
///   Env -- spec --> E
///   E -- build --> P[AgentParts]
///   P --> T[Trainer::train]
///   Env --> T
/// ```
pub fn run<X: Experiment>(experiment: &X, recorder: &mut dyn AggregateRecorder) -> Result<Run> {
    let entry = experiment.make_agent()?;
    let mut env = experiment.make_environment(experiment.seed())?;
    let spec = env.spec();
    let mut agent = entry.build(&spec, &experiment.replay_config())?;
    info!(
        "Running {} with {} actions and observation dim {}",
        entry.algorithm(),
        agent.actor.contract().num_actions,
        spec.obs_dim()
    );

    let mut evaluator = experiment.make_evaluator()?;
    let mut trainer = Trainer::build(experiment.trainer_config());
    let evaluator: Option<&mut dyn Evaluator> = match evaluator.as_mut() {
        Some(e) => Some(e.as_mut()),
        None => None,
    };
    let summary = trainer.train(&mut env, &mut agent, recorder, evaluator)?;
    Ok(Run { summary, agent })
}
