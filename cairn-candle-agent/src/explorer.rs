//! Exploration strategies over action values.
use crate::util::{argmax, softmax};
use rand::{distributions::WeightedIndex, Rng};
use serde::{Deserialize, Serialize};

/// Explorers used by the value-based actors.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum Explorer {
    /// Softmax action selection.
    Softmax(Softmax),

    /// Epsilon-greedy action selection.
    EpsilonGreedy(EpsilonGreedy),

    /// Always the best action.
    Greedy,
}

impl Default for Explorer {
    fn default() -> Self {
        Self::EpsilonGreedy(EpsilonGreedy::new())
    }
}

impl Explorer {
    /// Takes an action based on action values.
    pub fn action(&mut self, q: &[f32], rng: &mut impl Rng) -> usize {
        match self {
            Self::Softmax(e) => e.action(q, rng),
            Self::EpsilonGreedy(e) => e.action(q, rng),
            Self::Greedy => argmax(q),
        }
    }
}

/// Softmax explorer.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Softmax {
    /// Divides the action values before the softmax.
    pub temperature: f32,
}

#[allow(clippy::new_without_default)]
impl Softmax {
    /// Constructs softmax explorer with temperature 1.
    pub fn new() -> Self {
        Self { temperature: 1.0 }
    }

    /// Takes an action based on action values.
    pub fn action(&mut self, q: &[f32], rng: &mut impl Rng) -> usize {
        let t = self.temperature.max(1e-6);
        let probs = softmax(&q.iter().map(|x| x / t).collect::<Vec<_>>());
        match WeightedIndex::new(&probs) {
            Ok(dist) => rng.sample(dist),
            Err(_) => argmax(q),
        }
    }
}

/// Epsilon-greedy explorer with linearly decaying epsilon.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EpsilonGreedy {
    /// Number of actions taken so far.
    pub n_opts: usize,

    /// Epsilon at the first action.
    pub eps_start: f64,

    /// Epsilon from `final_step` on.
    pub eps_final: f64,

    /// Actions over which epsilon decays.
    pub final_step: usize,
}

#[allow(clippy::new_without_default)]
impl EpsilonGreedy {
    /// Constructs epsilon-greedy explorer.
    pub fn new() -> Self {
        Self {
            n_opts: 0,
            eps_start: 1.0,
            eps_final: 0.02,
            final_step: 100_000,
        }
    }

    /// Constructs epsilon-greedy explorer decaying over `final_step` actions.
    pub fn with_final_step(final_step: usize) -> Explorer {
        Explorer::EpsilonGreedy(Self {
            final_step,
            ..Self::new()
        })
    }

    /// Current epsilon.
    pub fn eps(&self) -> f64 {
        let d = (self.eps_start - self.eps_final) / (self.final_step.max(1) as f64);
        (self.eps_start - d * self.n_opts as f64).max(self.eps_final)
    }

    /// Takes an action based on action values.
    pub fn action(&mut self, q: &[f32], rng: &mut impl Rng) -> usize {
        let is_random = rng.gen::<f64>() < self.eps();
        self.n_opts += 1;

        if is_random {
            rng.gen_range(0..q.len().max(1))
        } else {
            argmax(q)
        }
    }

    /// Set the epsilon value at the final step.
    pub fn eps_final(self, v: f64) -> Self {
        let mut s = self;
        s.eps_final = v;
        s
    }

    /// Set the epsilon value at the start.
    pub fn eps_start(self, v: f64) -> Self {
        let mut s = self;
        s.eps_start = v;
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn test_epsilon_decays_linearly() {
        let mut e = EpsilonGreedy::new().eps_start(1.0).eps_final(0.1);
        e.final_step = 10;
        let mut rng = SmallRng::seed_from_u64(0);
        assert!((e.eps() - 1.0).abs() < 1e-9);
        for _ in 0..5 {
            e.action(&[0.0, 1.0], &mut rng);
        }
        assert!((e.eps() - 0.55).abs() < 1e-9);
        for _ in 0..10 {
            e.action(&[0.0, 1.0], &mut rng);
        }
        assert!((e.eps() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_greedy_when_epsilon_is_zero() {
        let mut e = Explorer::EpsilonGreedy(EpsilonGreedy::new().eps_start(0.0).eps_final(0.0));
        let mut rng = SmallRng::seed_from_u64(0);
        assert!((0..100).all(|_| e.action(&[0.1, 0.7, 0.3], &mut rng) == 1));
    }

    #[test]
    fn test_softmax_follows_values() {
        let mut e = Softmax { temperature: 0.1 };
        let mut rng = SmallRng::seed_from_u64(0);
        let n = (0..1000).filter(|_| e.action(&[0.0, 1.0], &mut rng) == 1).count();
        assert!(n > 990);
    }
}
