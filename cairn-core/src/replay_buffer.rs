//! Replay buffer of whole trajectories sampled as fixed-length windows.
//!
//! Trajectories are inserted only when complete (or when a long episode is
//! cut into a chunk), so eviction never touches anything still being written.
//! Each trajectory of length `L` is cut into windows of the sequence length
//! `T` starting every `period` steps; a trailing window aligned to the end is
//! added when `period` does not divide `L - T`. Trajectories shorter than `T`
//! form a single zero-padded window.
//!
//! Sampling picks a trajectory with probability proportional to its window
//! count (uniform over windows) or, with [`PerConfig`], to its priority raised
//! to `alpha`, and then one of its windows uniformly.
mod base;
mod batch;
mod config;
mod iw_scheduler;
mod shared;
mod sum_tree;
pub use base::{ReplayOccupancy, SequenceReplayBuffer};
pub use batch::{Column, SampleKey, SequenceBatch};
pub use config::{PerConfig, ReplayBufferConfig, WeightNormalizer};
pub use iw_scheduler::IwScheduler;
pub use shared::SharedReplayBuffer;
pub use sum_tree::SumTree;
