//! MuZero with a recurrent observation encoder.
//!
//! The actor encodes the observation history with the LSTM `core`, maps the
//! hidden vector to a latent state and runs a visit-count tree search with
//! the learned `dynamics`, `reward`, `value` and `policy` networks. Value and
//! reward are categorical over a two-hot support.
mod actor;
mod builder;
mod config;
mod learner;
pub mod mcts;
mod network;
pub use actor::MuZeroActor;
pub use builder::MuZeroBuilder;
pub use config::MuZeroConfig;
pub use learner::MuZeroLearner;
pub use network::{expected_roles, MuZeroNetworkFactory};

#[cfg(test)]
mod tests;
