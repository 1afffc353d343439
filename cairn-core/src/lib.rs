#![warn(missing_docs)]
//! Core of a framework for recurrent reinforcement learning agents.
//!
//! An agent is assembled by an [`AgentBuilder`] from an algorithm config, a
//! [`NetworkFactory`] and the [`EnvSpec`] of an environment. The builder
//! returns [`AgentParts`]: a [`Learner`] owning the parameters, an [`Actor`]
//! acting with published snapshots of them, and a replay buffer of whole
//! trajectories sampled as fixed-length windows. All three agree on one
//! [`TemporalContract`]. The [`Trainer`] drives the loop between them.
pub mod dummy;
pub mod error;
pub mod params;
pub mod record;
pub mod replay_buffer;

mod base;
pub use base::{
    Action, ActionSpace, Actor, ActorOutput, AgentBuilder, AgentParts, Env, EnvSpec, Extras,
    Learner, LearnerUpdate, NetworkFactory, ObsDtype, ObsSpec, Observation, RecurrentState, Step,
    TemporalContract, Trajectory, TrajectoryStep,
};

mod trainer;
pub use trainer::{StopSignal, Trainer, TrainerConfig, TrainerState, TrainingSummary};

mod evaluator;
pub use evaluator::{DefaultEvaluator, Evaluator};
