//! Cooperative stop signal.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Requests the training loop to stop.
///
/// Clones share one flag. The loop checks it between environment steps and
/// between learner updates.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Creates a signal that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`StopSignal::request`] was called.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lowers the signal so the trainer can be reused.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
