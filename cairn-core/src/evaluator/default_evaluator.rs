//! Runs a fixed number of episodes and reports the average return.
use super::Evaluator;
use crate::{
    record::{Record, RecordValue},
    Actor, Env,
};
use anyhow::Result;

/// Runs `n_episodes` episodes on its own environment instance.
///
/// Each episode starts from [`Actor::initial_state`] and threads the
/// recurrent state returned by the actor. The record contains
/// `eval_return` (mean episode return) and `eval_length` (mean length).
pub struct DefaultEvaluator<E: Env> {
    n_episodes: usize,
    max_episode_steps: usize,
    env: E,
}

impl<E: Env> DefaultEvaluator<E> {
    /// Constructs a new [`DefaultEvaluator`].
    pub fn new(config: &E::Config, seed: i64, n_episodes: usize) -> Result<Self> {
        Ok(Self {
            n_episodes,
            max_episode_steps: usize::MAX,
            env: E::build(config, seed)?,
        })
    }

    /// Cuts evaluation episodes after `v` steps.
    pub fn max_episode_steps(mut self, v: usize) -> Self {
        self.max_episode_steps = v;
        self
    }
}

impl<E: Env> Evaluator for DefaultEvaluator<E> {
    fn evaluate(&mut self, actor: &mut dyn Actor) -> Result<Record> {
        let mut r_total = 0f32;
        let mut n_steps = 0usize;

        for ix in 0..self.n_episodes {
            let mut obs = self.env.reset_with_index(ix)?;
            let mut state = actor.initial_state();
            for _ in 0..self.max_episode_steps {
                let out = actor.select_action(&obs, &state)?;
                let step = self.env.step(out.action)?;
                r_total += step.reward;
                n_steps += 1;
                if step.terminated {
                    break;
                }
                obs = step.observation;
                state = out.state;
            }
        }

        let n = self.n_episodes.max(1) as f32;
        Ok(Record::from_slice(&[
            ("eval_return", RecordValue::Scalar(r_total / n)),
            ("eval_length", RecordValue::Scalar(n_steps as f32 / n)),
        ]))
    }
}
