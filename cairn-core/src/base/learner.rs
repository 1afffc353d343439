//! Learner.
use super::TemporalContract;
use crate::{params::ParamSet, record::Record, replay_buffer::SequenceBatch};
use anyhow::Result;
use std::{path::Path, sync::Arc};

/// Result of [`Learner::update`].
pub struct LearnerUpdate {
    /// Snapshot of the parameters after the update.
    pub params: Arc<ParamSet>,

    /// Scalar diagnostics, at least `loss` and `grad_norm`.
    pub record: Record,

    /// New priorities of the sampled windows, in batch order.
    pub priorities: Option<Vec<f32>>,
}

/// Sole owner and mutator of the parameters of a network bundle.
pub trait Learner {
    /// The contract the learner was built with.
    fn contract(&self) -> &TemporalContract;

    /// Computes the loss on a batch and applies one optimization step.
    ///
    /// A non-finite loss or gradient norm is reported as
    /// [`CairnError::LearnerDivergence`](crate::error::CairnError::LearnerDivergence);
    /// no snapshot is produced in that case.
    fn update(&mut self, batch: &SequenceBatch) -> Result<LearnerUpdate>;

    /// Snapshot of the current parameters.
    fn params(&self) -> Result<Arc<ParamSet>>;

    /// Number of successful updates.
    fn n_updates(&self) -> usize;

    /// Saves parameters in the given directory.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Loads parameters from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
