//! Trajectories committed to the replay buffer.
use super::{Action, Extras, Observation, RecurrentState};

/// One interaction of the actor with the environment.
#[derive(Clone, Debug)]
pub struct TrajectoryStep {
    /// Observation the action was selected for.
    pub observation: Observation,

    /// Selected action.
    pub action: Action,

    /// Reward received for the action.
    pub reward: f32,

    /// `true` if the episode terminated after this step.
    pub terminated: bool,

    /// Actor outputs merged with the step info of the environment.
    pub extras: Extras,
}

/// Contiguous steps of one episode.
///
/// `states[t]` is the recurrent state the actor received together with
/// `steps[t].observation`, so a window sampled at offset `k` starts from
/// `states[k]`. Long episodes may be committed in several chunks sharing the
/// same `episode_id`.
#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    /// Identity of the episode the steps belong to.
    pub episode_id: u64,

    /// Steps in time order.
    pub steps: Vec<TrajectoryStep>,

    /// Recurrent state at each step.
    pub states: Vec<RecurrentState>,
}

impl Trajectory {
    /// Creates an empty trajectory.
    pub fn new(episode_id: u64) -> Self {
        Self {
            episode_id,
            steps: vec![],
            states: vec![],
        }
    }

    /// Appends a step together with the recurrent state it was acted on.
    pub fn push(&mut self, step: TrajectoryStep, state: RecurrentState) {
        self.steps.push(step);
        self.states.push(state);
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if there is no step.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns `true` if the last step ends the episode.
    pub fn is_terminal(&self) -> bool {
        self.steps.last().map(|s| s.terminated).unwrap_or(false)
    }

    /// The recurrent state observed at the first step.
    pub fn initial_state(&self) -> Option<&RecurrentState> {
        self.states.first()
    }

    /// Sum of rewards.
    pub fn total_reward(&self) -> f32 {
        self.steps.iter().map(|s| s.reward).sum()
    }
}
