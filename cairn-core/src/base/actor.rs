//! Actor.
use super::{Action, Extras, Observation, RecurrentState, TemporalContract};
use crate::params::ParamSet;
use anyhow::Result;
use std::sync::Arc;

/// Output of [`Actor::select_action`].
#[derive(Clone, Debug)]
pub struct ActorOutput {
    /// Selected action.
    pub action: Action,

    /// Recurrent state to pass with the next observation of the same episode.
    pub state: RecurrentState,

    /// Algorithm specific outputs stored with the step, e.g. search policy.
    pub extras: Extras,
}

/// Selects actions with a read-only copy of the learner's parameters.
///
/// The recurrent state is never kept inside the actor: the caller passes the
/// state returned by the previous call of the same episode, and
/// [`Actor::initial_state`] at the start of an episode.
pub trait Actor {
    /// The contract the actor was built with.
    fn contract(&self) -> &TemporalContract;

    /// Recurrent state at the start of an episode.
    fn initial_state(&self) -> RecurrentState;

    /// Selects an action.
    fn select_action(&mut self, obs: &Observation, state: &RecurrentState)
        -> Result<ActorOutput>;

    /// Replaces the parameters with a published snapshot.
    fn update_params(&mut self, params: Arc<ParamSet>) -> Result<()>;

    /// Version of the parameters currently in use.
    fn params_version(&self) -> u64;

    /// Set the actor to training mode.
    fn train(&mut self);

    /// Set the actor to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;
}
