//! Environment spec and the temporal contract shared by built components.
use super::{RecurrentState, Trajectory};
use crate::error::CairnError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element type of the raw observation before it is converted to `f32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ObsDtype {
    /// 32-bit floats.
    F32,

    /// Bytes, e.g. pixels.
    U8,
}

/// Shape and layout of observations.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ObsSpec {
    /// Shape of [`Observation::data`](super::Observation::data).
    pub shape: Vec<usize>,

    /// Element type of the raw observation.
    pub dtype: ObsDtype,

    /// Names and lengths of [`Observation::aux`](super::Observation::aux) vectors.
    #[serde(default)]
    pub aux: BTreeMap<String, usize>,
}

impl ObsSpec {
    /// Observation with the given shape and no auxiliary vectors.
    pub fn new(shape: Vec<usize>) -> Self {
        Self {
            shape,
            dtype: ObsDtype::F32,
            aux: BTreeMap::new(),
        }
    }

    /// Declares an auxiliary vector.
    pub fn aux(mut self, key: impl Into<String>, dim: usize) -> Self {
        self.aux.insert(key.into(), dim);
        self
    }

    /// Number of elements in a flattened observation.
    pub fn dim(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Action space.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum ActionSpace {
    /// `n` discrete actions, `0..n`.
    Discrete(usize),

    /// Real-valued actions of the given dimension.
    Continuous {
        /// Action dimension.
        dim: usize,
    },
}

/// Describes an environment at setup time.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EnvSpec {
    /// Observation layout.
    pub observation: ObsSpec,

    /// Action space.
    pub action: ActionSpace,

    /// Names and lengths of [`Step::info`](super::Step::info) vectors.
    #[serde(default)]
    pub info: BTreeMap<String, usize>,
}

impl EnvSpec {
    /// Spec of an environment with discrete actions.
    pub fn discrete(observation: ObsSpec, num_actions: usize) -> Self {
        Self {
            observation,
            action: ActionSpace::Discrete(num_actions),
            info: BTreeMap::new(),
        }
    }

    /// Declares a per-step info vector.
    pub fn info(mut self, key: impl Into<String>, dim: usize) -> Self {
        self.info.insert(key.into(), dim);
        self
    }

    /// Number of elements in a flattened observation.
    pub fn obs_dim(&self) -> usize {
        self.observation.dim()
    }

    /// Number of discrete actions.
    ///
    /// Fails with a configuration error for continuous or empty action spaces.
    pub fn num_actions(&self) -> Result<usize, CairnError> {
        match self.action {
            ActionSpace::Discrete(n) if n > 0 => Ok(n),
            ActionSpace::Discrete(_) => Err(CairnError::config("action space is empty")),
            ActionSpace::Continuous { dim } => Err(CairnError::config(format!(
                "continuous action space (dim={}) is not supported",
                dim
            ))),
        }
    }

    /// Checks that observations carry an auxiliary vector `key` of length `dim`.
    pub fn require_aux(&self, key: &str, dim: usize) -> Result<(), CairnError> {
        match self.observation.aux.get(key) {
            Some(&d) if d == dim => Ok(()),
            Some(&d) => Err(CairnError::config(format!(
                "observation aux '{}' has dim {}, expected {}",
                key, d, dim
            ))),
            None => Err(CairnError::config(format!(
                "environment does not provide observation aux '{}'",
                key
            ))),
        }
    }

    /// Checks that steps carry an info vector `key` of length `dim`.
    pub fn require_info(&self, key: &str, dim: usize) -> Result<(), CairnError> {
        match self.info.get(key) {
            Some(&d) if d == dim => Ok(()),
            Some(&d) => Err(CairnError::config(format!(
                "step info '{}' has dim {}, expected {}",
                key, d, dim
            ))),
            None => Err(CairnError::config(format!(
                "environment does not provide step info '{}'",
                key
            ))),
        }
    }
}

/// What the learner, the actor and the replay buffer built together agree on.
///
/// An [`AgentBuilder`](super::AgentBuilder) creates one contract and hands a
/// copy to each component.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TemporalContract {
    /// Length of sampled windows, burn-in included.
    pub sequence_length: usize,

    /// Shape of the recurrent state.
    pub state_shape: Vec<usize>,

    /// Number of discrete actions.
    pub num_actions: usize,

    /// Number of elements in a flattened observation.
    pub obs_dim: usize,

    /// Observation aux vectors, by name and length.
    pub obs_aux: BTreeMap<String, usize>,

    /// Extras every stored step must carry, by name and length.
    pub extras: BTreeMap<String, usize>,
}

impl TemporalContract {
    /// Checks the shape of a recurrent state.
    pub fn check_state(&self, state: &RecurrentState) -> Result<(), CairnError> {
        if state.shape() != self.state_shape {
            return Err(CairnError::config(format!(
                "recurrent state shape {:?} does not match {:?}",
                state.shape(),
                self.state_shape
            )));
        }
        Ok(())
    }

    /// Validates a trajectory before it is stored.
    pub fn check_trajectory(&self, trajectory: &Trajectory) -> Result<(), CairnError> {
        let n = trajectory.len();
        if n == 0 {
            return Err(CairnError::config("empty trajectory"));
        }
        if trajectory.states.len() != n {
            return Err(CairnError::config(format!(
                "trajectory has {} steps but {} recurrent states",
                n,
                trajectory.states.len()
            )));
        }
        for state in trajectory.states.iter() {
            self.check_state(state)?;
        }
        for (t, step) in trajectory.steps.iter().enumerate() {
            if step.action >= self.num_actions {
                return Err(CairnError::config(format!(
                    "action {} at step {} is out of range 0..{}",
                    step.action, t, self.num_actions
                )));
            }
            if step.observation.data.len() != self.obs_dim {
                return Err(CairnError::config(format!(
                    "observation at step {} has {} elements, expected {}",
                    t,
                    step.observation.data.len(),
                    self.obs_dim
                )));
            }
            for (key, &dim) in self.obs_aux.iter() {
                match step.observation.aux.get(key) {
                    Some(v) if v.len() == dim => {}
                    _ => {
                        return Err(CairnError::config(format!(
                            "observation aux '{}' missing or not of length {} at step {}",
                            key, dim, t
                        )))
                    }
                }
            }
            for (key, &dim) in self.extras.iter() {
                match step.extras.get(key) {
                    Some(v) if v.len() == dim => {}
                    _ => {
                        return Err(CairnError::config(format!(
                            "extra '{}' missing or not of length {} at step {}",
                            key, dim, t
                        )))
                    }
                }
            }
            if step.terminated && t + 1 != n {
                return Err(CairnError::config(format!(
                    "terminal step {} is not the last of {} steps",
                    t, n
                )));
            }
        }
        Ok(())
    }
}
