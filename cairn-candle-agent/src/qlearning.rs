//! Recurrent Q-learning.
//!
//! An LSTM core (role `core`) runs over the observations of a window from the
//! stored recurrent state, and an MLP head (role `value`) maps hidden vectors
//! to action values. The learner minimizes n-step double-Q TD errors against
//! target networks, skipping burn-in and padding.
mod actor;
mod builder;
mod config;
mod learner;
mod network;
pub use actor::QLearningActor;
pub use builder::QLearningBuilder;
pub use config::QLearningConfig;
pub use learner::QLearningLearner;
pub use network::{expected_roles, QLearningNetworkFactory};

#[cfg(test)]
mod tests;
