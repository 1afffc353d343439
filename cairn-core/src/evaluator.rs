//! Evaluate an [`Actor`].
use crate::{record::Record, Actor};
use anyhow::Result;
mod default_evaluator;
pub use default_evaluator::DefaultEvaluator;

/// Evaluate an [`Actor`].
pub trait Evaluator {
    /// Evaluate an [`Actor`].
    ///
    /// The caller of this method needs to handle the internal state of
    /// `actor`, like training/evaluation mode.
    fn evaluate(&mut self, actor: &mut dyn Actor) -> Result<Record>;
}
