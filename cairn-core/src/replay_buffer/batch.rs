//! Batch of fixed-length windows.
use crate::base::RecurrentState;
use std::collections::BTreeMap;

/// Identifies a sampled window for priority feedback.
///
/// `generation` changes whenever the slot is overwritten, so priorities
/// computed for an evicted trajectory are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleKey {
    /// Slot in the buffer.
    pub slot: usize,

    /// Insertion counter of the trajectory held by the slot.
    pub generation: u64,

    /// Step of the trajectory the window starts at.
    pub start: usize,
}

/// A named per-step vector stacked as `[batch_size, seq_len, dim]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Length of the vector at each step.
    pub dim: usize,

    /// Elements in `[batch_size, seq_len, dim]` row-major order.
    pub data: Vec<f32>,
}

impl Column {
    fn zeros(batch_size: usize, seq_len: usize, dim: usize) -> Self {
        Self {
            dim,
            data: vec![0f32; batch_size * seq_len * dim],
        }
    }

    /// Vector at `(b, t)`.
    pub fn at(&self, seq_len: usize, b: usize, t: usize) -> &[f32] {
        let i = (b * seq_len + t) * self.dim;
        &self.data[i..i + self.dim]
    }
}

/// Windows of equal length stacked into `[batch_size, seq_len, ...]` arrays.
///
/// Positions past the end of a short trajectory are zero and have
/// `mask == 0`.
#[derive(Clone, Debug)]
pub struct SequenceBatch {
    /// Number of windows.
    pub batch_size: usize,

    /// Steps per window.
    pub seq_len: usize,

    /// Flattened observation size.
    pub obs_dim: usize,

    /// `[batch_size, seq_len, obs_dim]`.
    pub obs: Vec<f32>,

    /// Observation aux vectors.
    pub obs_aux: BTreeMap<String, Column>,

    /// `[batch_size, seq_len]`.
    pub action: Vec<i64>,

    /// `[batch_size, seq_len]`.
    pub reward: Vec<f32>,

    /// `[batch_size, seq_len]`, 1 where the episode terminated after the step.
    pub terminated: Vec<f32>,

    /// `[batch_size, seq_len]`, 1 for real steps and 0 for padding.
    pub mask: Vec<f32>,

    /// Stored extras.
    pub extras: BTreeMap<String, Column>,

    /// Recurrent state at the first step of each window.
    pub initial_state: Vec<RecurrentState>,

    /// Importance weights, `None` for uniform sampling.
    pub weight: Option<Vec<f32>>,

    /// Keys of the sampled windows.
    pub keys: Vec<SampleKey>,
}

impl SequenceBatch {
    /// Creates a batch of zeros with everything masked out.
    pub fn zeros(
        batch_size: usize,
        seq_len: usize,
        obs_dim: usize,
        obs_aux: &BTreeMap<String, usize>,
        extras: &BTreeMap<String, usize>,
    ) -> Self {
        let n = batch_size * seq_len;
        Self {
            batch_size,
            seq_len,
            obs_dim,
            obs: vec![0f32; n * obs_dim],
            obs_aux: obs_aux
                .iter()
                .map(|(k, &d)| (k.clone(), Column::zeros(batch_size, seq_len, d)))
                .collect(),
            action: vec![0; n],
            reward: vec![0f32; n],
            terminated: vec![0f32; n],
            mask: vec![0f32; n],
            extras: extras
                .iter()
                .map(|(k, &d)| (k.clone(), Column::zeros(batch_size, seq_len, d)))
                .collect(),
            initial_state: vec![],
            weight: None,
            keys: vec![],
        }
    }

    /// Flat index of `(b, t)`.
    pub fn ix(&self, b: usize, t: usize) -> usize {
        b * self.seq_len + t
    }

    /// Returns `true` if the step at `(b, t)` is a real step whose successor
    /// is either in the window or not needed because the episode ended.
    ///
    /// Learners bootstrapping from `t + 1` mask out the other steps.
    pub fn is_bootstrappable(&self, b: usize, t: usize) -> bool {
        let i = self.ix(b, t);
        if self.mask[i] == 0f32 {
            return false;
        }
        self.terminated[i] == 1f32 || (t + 1 < self.seq_len && self.mask[i + 1] == 1f32)
    }

    /// Number of real steps.
    pub fn n_valid(&self) -> usize {
        self.mask.iter().filter(|&&m| m == 1f32).count()
    }

    /// Extra column by name.
    pub fn extra(&self, key: &str) -> Option<&Column> {
        self.extras.get(key)
    }
}
