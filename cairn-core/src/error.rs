//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// Everything is propagated through [`anyhow::Result`]; callers that need to
/// tell the categories apart downcast with
/// `err.downcast_ref::<CairnError>()`.
#[derive(Error, Debug)]
pub enum CairnError {
    /// Config, network roles and environment spec do not fit together.
    ///
    /// Raised by agent builders before any training step runs. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure inside the environment adapter.
    #[error("Environment error: {0}")]
    Environment(#[from] EnvError),

    /// Non-finite values were detected in a learner update.
    #[error("Learner diverged at update {update}: {reason}")]
    LearnerDivergence {
        /// Index of the failed update, counted from 1.
        update: usize,

        /// What was non-finite, with the offending values.
        reason: String,
    },

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}

impl CairnError {
    /// Shorthand for [`CairnError::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns `true` if the error is a [`CairnError::Configuration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns `true` if the error is a [`CairnError::LearnerDivergence`].
    pub fn is_divergence(&self) -> bool {
        matches!(self, Self::LearnerDivergence { .. })
    }
}

/// Error reported by an environment adapter.
///
/// The training loop ends the current episode on a transient error and keeps
/// going; an unrecoverable error stops the loop. Errors that are not an
/// `EnvError` at all are treated as transient.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvError {
    /// Failure confined to the current episode.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The adapter cannot continue.
    #[error("unrecoverable failure: {0}")]
    Unrecoverable(String),
}

impl EnvError {
    /// Returns `true` if the adapter cannot continue after this error.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

/// Returns `true` if `err` carries an unrecoverable [`EnvError`], either
/// directly or wrapped in [`CairnError::Environment`].
pub fn is_unrecoverable(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<EnvError>() {
        return e.is_unrecoverable();
    }
    matches!(
        err.downcast_ref::<CairnError>(),
        Some(CairnError::Environment(e)) if e.is_unrecoverable()
    )
}
