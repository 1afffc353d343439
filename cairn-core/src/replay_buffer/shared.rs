//! Handle sharing one replay buffer between producers and the learner.
use super::{ReplayOccupancy, SampleKey, SequenceBatch, SequenceReplayBuffer};
use crate::base::{TemporalContract, Trajectory};
use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle to a [`SequenceReplayBuffer`] behind a mutex.
///
/// Every operation takes the lock for its whole duration, so `insert` and
/// `sample` never observe each other half-done.
#[derive(Clone)]
pub struct SharedReplayBuffer {
    inner: Arc<Mutex<SequenceReplayBuffer>>,
}

impl SharedReplayBuffer {
    /// Wraps a buffer.
    pub fn new(buffer: SequenceReplayBuffer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SequenceReplayBuffer> {
        // Every method leaves the buffer consistent before it can panic.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// See [`SequenceReplayBuffer::insert`].
    pub fn insert(&self, trajectory: Trajectory) -> Result<()> {
        self.lock().insert(trajectory)
    }

    /// See [`SequenceReplayBuffer::sample`].
    pub fn sample(&self, batch_size: usize) -> Result<SequenceBatch> {
        self.lock().sample(batch_size)
    }

    /// See [`SequenceReplayBuffer::update_priority`].
    pub fn update_priority(&self, keys: &[SampleKey], priorities: &[f32]) {
        self.lock().update_priority(keys, priorities)
    }

    /// Number of stored trajectories.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of stored steps.
    pub fn num_transitions(&self) -> usize {
        self.lock().num_transitions()
    }

    /// Occupancy metadata.
    pub fn occupancy(&self) -> ReplayOccupancy {
        self.lock().occupancy()
    }

    /// Copy of the contract of the buffer.
    pub fn contract(&self) -> TemporalContract {
        self.lock().contract().clone()
    }

    /// Runs `f` with exclusive access to the buffer.
    pub fn with<T>(&self, f: impl FnOnce(&mut SequenceReplayBuffer) -> T) -> T {
        f(&mut self.lock())
    }
}
