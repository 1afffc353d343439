//! Scheduling the exponent of importance weight for PER.
use serde::{Deserialize, Serialize};

/// Linear schedule of the importance sampling exponent $\beta$.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IwScheduler {
    /// Initial value of $\beta$.
    pub beta_0: f32,

    /// Final value of $\beta$.
    pub beta_final: f32,

    /// Number of sampled batches after which $\beta$ stays at `beta_final`.
    pub n_opts_final: usize,

    /// Number of sampled batches so far.
    pub n_opts: usize,
}

impl IwScheduler {
    /// Creates a scheduler.
    pub fn new(beta_0: f32, beta_final: f32, n_opts_final: usize) -> Self {
        Self {
            beta_0,
            beta_final,
            n_opts_final,
            n_opts: 0,
        }
    }

    /// Current exponent.
    pub fn beta(&self) -> f32 {
        if self.n_opts >= self.n_opts_final {
            self.beta_final
        } else {
            let d = self.beta_final - self.beta_0;
            self.beta_0 + d * (self.n_opts as f32 / self.n_opts_final as f32)
        }
    }

    /// Advances the schedule by one batch.
    pub fn add_n_opts(&mut self) {
        self.n_opts += 1;
    }
}
