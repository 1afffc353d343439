//! Recurrent state carried by an actor between steps of one episode.
use serde::{Deserialize, Serialize};

/// Hidden state of a recurrent network for a single episode.
///
/// Stored host-side so it can be kept with each trajectory step and handed
/// back to any backend. An LSTM state has two parts, `h` and `c`, of equal
/// length.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RecurrentState {
    parts: Vec<Vec<f32>>,
}

impl RecurrentState {
    /// Creates a state from its parts.
    pub fn new(parts: Vec<Vec<f32>>) -> Self {
        Self { parts }
    }

    /// Zero state with `n_parts` parts of length `dim`.
    pub fn zeros(n_parts: usize, dim: usize) -> Self {
        Self {
            parts: vec![vec![0f32; dim]; n_parts],
        }
    }

    /// LSTM state from the hidden and the cell vectors.
    pub fn lstm(h: Vec<f32>, c: Vec<f32>) -> Self {
        Self { parts: vec![h, c] }
    }

    /// `[n_parts, dim]`; an empty state has shape `[0, 0]`.
    pub fn shape(&self) -> Vec<usize> {
        let dim = self.parts.first().map(|p| p.len()).unwrap_or(0);
        vec![self.parts.len(), dim]
    }

    /// Returns the parts.
    pub fn parts(&self) -> &[Vec<f32>] {
        &self.parts
    }

    /// Returns the `i`-th part.
    pub fn part(&self, i: usize) -> Option<&[f32]> {
        self.parts.get(i).map(|p| p.as_slice())
    }

    /// Flattens parts in order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.parts.iter().flatten().copied().collect()
    }
}
