//! Experiments with recurrent reinforcement learning agents.
//!
//! Cairn consists of the following crates:
//!
//! * [`cairn_core`] defines the environment, learner and actor traits, the
//!   trajectory replay buffer and the training loop.
//! * [`cairn_candle_agent`] implements recurrent Q-learning, universal
//!   successor features and MuZero with
//!   [candle](https://crates.io/crates/candle-core), and the registry that
//!   maps algorithm ids to them.
//! * This crate declares experiments: an [`Experiment`] makes the environment
//!   and the agent, and [`run`] trains one.
mod experiment;
pub use cairn_candle_agent;
pub use cairn_core;
pub use experiment::{run, ConfiguredExperiment, Experiment, ExperimentConfig, Run};
