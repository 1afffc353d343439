//! Observation, action and the result of an environment step.
use std::collections::BTreeMap;

/// Discrete action index.
///
/// All agents in this workspace act on discrete action spaces. Continuous
/// spaces can be described in an [`EnvSpec`](super::EnvSpec) but every
/// builder rejects them.
pub type Action = usize;

/// Named auxiliary vectors attached to observations, steps and actor outputs.
///
/// A `BTreeMap` keeps iteration order stable, which the replay buffer relies on
/// when it stacks extras into batches.
pub type Extras = BTreeMap<String, Vec<f32>>;

/// Observation emitted by an environment.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Observation {
    /// Flattened observation in row-major order.
    pub data: Vec<f32>,

    /// Auxiliary vectors, e.g. the task vector for successor-feature agents.
    pub aux: Extras,
}

impl Observation {
    /// Creates an observation without auxiliary vectors.
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            data,
            aux: Extras::new(),
        }
    }

    /// Adds an auxiliary vector.
    pub fn with_aux(mut self, key: impl Into<String>, value: Vec<f32>) -> Self {
        self.aux.insert(key.into(), value);
        self
    }

    /// Returns an observation of the same layout filled with zeros.
    ///
    /// Used for padding replay windows.
    pub fn zeros_like(&self) -> Self {
        Self {
            data: vec![0f32; self.data.len()],
            aux: self
                .aux
                .iter()
                .map(|(k, v)| (k.clone(), vec![0f32; v.len()]))
                .collect(),
        }
    }
}

/// Result of [`Env::step`](super::Env::step).
#[derive(Clone, Debug)]
pub struct Step {
    /// Observation after the action was applied.
    pub observation: Observation,

    /// Reward for the applied action.
    pub reward: f32,

    /// `true` if the episode terminated with this step.
    pub terminated: bool,

    /// Per-transition quantities, e.g. the cumulant of successor features.
    ///
    /// The training loop merges them into the extras of the stored step.
    pub info: Extras,
}

impl Step {
    /// Constructs a step without info.
    pub fn new(observation: Observation, reward: f32, terminated: bool) -> Self {
        Self {
            observation,
            reward,
            terminated,
            info: Extras::new(),
        }
    }

    /// Adds a per-transition vector.
    pub fn with_info(mut self, key: impl Into<String>, value: Vec<f32>) -> Self {
        self.info.insert(key.into(), value);
        self
    }
}
