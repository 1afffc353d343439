//! Train an agent built by an [`AgentBuilder`](crate::AgentBuilder).
mod config;
mod stop;
use crate::{
    base::{AgentParts, Env, Observation, RecurrentState, Trajectory, TrajectoryStep},
    error::is_unrecoverable,
    params::ParamsSlot,
    record::{AggregateRecorder, Record, RecordValue::Scalar},
    Evaluator,
};
use anyhow::{anyhow, Result};
pub use config::TrainerConfig;
use log::{debug, error, info, warn};
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};
pub use stop::StopSignal;

/// State of the training loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainerState {
    /// Filling the replay buffer, no learner updates.
    Warmup,

    /// Taking environment steps with the current policy.
    Interact,

    /// Running learner updates.
    Learn,

    /// Budget exhausted, stop requested or failed.
    Terminated,
}

/// Counters at the end of [`Trainer::train`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSummary {
    /// Environment steps taken.
    pub env_steps: usize,

    /// Episodes started, including failed ones.
    pub episodes: usize,

    /// Episodes ended by an environment failure.
    pub failed_episodes: usize,

    /// Learner updates applied.
    pub learn_steps: usize,

    /// Version of the last published parameters.
    pub params_version: u64,
}

struct InFlight {
    trajectory: Trajectory,
    obs: Observation,
    state: RecurrentState,
    steps: usize,
    ret: f32,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the training loop.
///
/// # Training loop
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Warmup
///     Warmup --> Warmup: env step, buffer under-filled
///     Warmup --> Interact: min_replay_transitions stored
///     Interact --> Learn: env_steps % learn_interval == 0
///     Learn --> Interact: updates_per_learn done
///     Warmup --> Terminated
///     Interact --> Terminated
///     Learn --> Terminated
/// ```
///
/// 1. The learner's initial parameters are published into a [`ParamsSlot`]
///    and loaded by the actor.
/// 2. Each environment step asks the actor for an action with the current
///    observation and recurrent state, applies it, and appends the step to
///    the in-flight trajectory together with the state the action was taken
///    in. Actor extras and the step info are merged into the step's extras.
/// 3. When the episode terminates or reaches `max_episode_steps`, the
///    trajectory is committed to the replay buffer and a new episode starts
///    from [`Actor::initial_state`](crate::Actor::initial_state). Episodes
///    longer than `max_trajectory_length` are committed in chunks.
/// 4. Once the buffer holds `min_replay_transitions` steps, every
///    `learn_interval` environment steps the learner runs
///    `updates_per_learn` updates. Priorities are fed back to the buffer and
///    every `publish_interval` updates the new snapshot is published. The
///    actor picks up the latest snapshot at the end of the phase.
/// 5. The loop stops when a budget is exhausted or a [`StopSignal`] is raised,
///    commits the in-flight trajectory and enters
///    [`TrainerState::Terminated`].
///
/// A failing environment step ends the episode and the loop carries on;
/// unrecoverable environment errors and every learner error end training and
/// are returned to the caller.
pub struct Trainer {
    config: TrainerConfig,
    stop: StopSignal,
    state: TrainerState,
    episode: Option<InFlight>,
    env_steps: usize,
    episodes: usize,
    failed_episodes: usize,
    consecutive_env_failures: usize,
    learn_steps: usize,

    /// Updates for computing updates per second.
    opt_steps_for_ops: usize,

    /// Time spent in updates since the last report.
    timer_for_ops: Duration,
}

impl Trainer {
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig) -> Self {
        Self {
            config,
            stop: StopSignal::new(),
            state: TrainerState::Warmup,
            episode: None,
            env_steps: 0,
            episodes: 0,
            failed_episodes: 0,
            consecutive_env_failures: 0,
            learn_steps: 0,
            opt_steps_for_ops: 0,
            timer_for_ops: Duration::new(0, 0),
        }
    }

    /// A handle that stops [`Trainer::train`] from another thread or from
    /// inside an environment.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Current state of the loop.
    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Environment steps taken so far.
    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    /// Learner updates applied so far.
    pub fn learn_steps(&self) -> usize {
        self.learn_steps
    }

    fn set_state(&mut self, state: TrainerState) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
            if state == TrainerState::Interact && self.state == TrainerState::Warmup {
                info!(
                    "Warmup finished after {} environment steps",
                    self.env_steps
                );
            }
            self.state = state;
        }
    }

    fn budget_exhausted(&self) -> bool {
        self.env_steps >= self.config.max_env_steps
            || self.learn_steps >= self.config.max_learn_steps
            || (self.episodes >= self.config.max_episodes && self.episode.is_none())
    }

    /// Returns updates per second, then reset the internal counter.
    fn opt_steps_per_sec(&mut self) -> f32 {
        let ms = self.timer_for_ops.as_millis().max(1) as f32;
        let osps = 1000. * self.opt_steps_for_ops as f32 / ms;
        self.opt_steps_for_ops = 0;
        self.timer_for_ops = Duration::new(0, 0);
        osps
    }

    /// Trains the agent on `env` until a budget is exhausted or a stop is
    /// requested.
    ///
    /// The components stay owned by the caller; the replay buffer keeps every
    /// committed trajectory.
    pub fn train<E: Env>(
        &mut self,
        env: &mut E,
        agent: &mut AgentParts,
        recorder: &mut dyn AggregateRecorder,
        mut evaluator: Option<&mut dyn Evaluator>,
    ) -> Result<TrainingSummary> {
        self.config.check()?;
        agent.check_contracts()?;
        let slot = ParamsSlot::new(agent.learner.params()?);
        agent.actor.update_params(slot.latest())?;
        agent.actor.train();
        self.state = TrainerState::Warmup;
        info!("Starts training");

        let result = loop {
            match self.iteration(env, agent, &slot, recorder, &mut evaluator) {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        // Commit what the in-flight episode has collected so far
        if let Some(ep) = self.episode.take() {
            if !ep.trajectory.is_empty() {
                agent.replay_buffer.insert(ep.trajectory)?;
            }
        }
        self.set_state(TrainerState::Terminated);
        recorder.flush(self.learn_steps as _);

        match result {
            Ok(()) => {
                info!(
                    "Training finished: {} env steps, {} episodes, {} updates",
                    self.env_steps, self.episodes, self.learn_steps
                );
                Ok(TrainingSummary {
                    env_steps: self.env_steps,
                    episodes: self.episodes,
                    failed_episodes: self.failed_episodes,
                    learn_steps: self.learn_steps,
                    params_version: slot.version(),
                })
            }
            Err(e) => {
                error!("Training stopped: {}", e);
                Err(e)
            }
        }
    }

    /// One environment step, followed by a learning phase when due.
    ///
    /// Returns `false` when the loop should terminate.
    fn iteration<E: Env>(
        &mut self,
        env: &mut E,
        agent: &mut AgentParts,
        slot: &ParamsSlot,
        recorder: &mut dyn AggregateRecorder,
        evaluator: &mut Option<&mut dyn Evaluator>,
    ) -> Result<bool> {
        if self.stop.is_requested() {
            info!("Stop requested after {} environment steps", self.env_steps);
            return Ok(false);
        }
        if self.budget_exhausted() {
            return Ok(false);
        }

        if !self.interact(env, agent, recorder)? {
            return Ok(true);
        }

        if self.state == TrainerState::Warmup
            && agent.replay_buffer.num_transitions() >= self.config.min_replay_transitions
            && !agent.replay_buffer.is_empty()
        {
            self.set_state(TrainerState::Interact);
        }

        if self.state != TrainerState::Warmup && self.env_steps % self.config.learn_interval == 0
        {
            self.learn(agent, slot, recorder, evaluator)?;
        }

        Ok(true)
    }

    fn on_env_error(&mut self, err: anyhow::Error) -> Result<()> {
        self.failed_episodes += 1;
        self.consecutive_env_failures += 1;
        if is_unrecoverable(&err) {
            return Err(err);
        }
        warn!("Episode {} ended by environment failure: {}", self.episodes, err);
        if self.consecutive_env_failures > self.config.max_consecutive_env_failures {
            return Err(anyhow!(
                "{} consecutive environment failures, last: {}",
                self.consecutive_env_failures,
                err
            ));
        }
        Ok(())
    }

    /// Takes one environment step. Returns `false` if no step was taken.
    fn interact<E: Env>(
        &mut self,
        env: &mut E,
        agent: &mut AgentParts,
        recorder: &mut dyn AggregateRecorder,
    ) -> Result<bool> {
        let mut ep = match self.episode.take() {
            Some(ep) => ep,
            None => {
                let id = self.episodes as u64;
                self.episodes += 1;
                match env.reset() {
                    Ok(obs) => InFlight {
                        trajectory: Trajectory::new(id),
                        obs,
                        state: agent.actor.initial_state(),
                        steps: 0,
                        ret: 0f32,
                    },
                    Err(e) => {
                        self.on_env_error(e)?;
                        return Ok(false);
                    }
                }
            }
        };

        let out = agent.actor.select_action(&ep.obs, &ep.state)?;
        let step = match env.step(out.action) {
            Ok(step) => step,
            Err(e) => {
                if !ep.trajectory.is_empty() {
                    agent.replay_buffer.insert(ep.trajectory)?;
                }
                self.on_env_error(e)?;
                return Ok(false);
            }
        };
        self.env_steps += 1;
        self.consecutive_env_failures = 0;

        let mut extras = out.extras;
        extras.extend(step.info);
        let obs = std::mem::replace(&mut ep.obs, step.observation);
        let state = std::mem::replace(&mut ep.state, out.state);
        ep.trajectory.push(
            TrajectoryStep {
                observation: obs,
                action: out.action,
                reward: step.reward,
                terminated: step.terminated,
                extras,
            },
            state,
        );
        ep.steps += 1;
        ep.ret += step.reward;

        if step.terminated || ep.steps >= self.config.max_episode_steps {
            recorder.store(Record::from_slice(&[
                ("episode_return", Scalar(ep.ret)),
                ("episode_length", Scalar(ep.steps as f32)),
            ]));
            debug!(
                "Episode {} finished: return={}, length={}",
                ep.trajectory.episode_id, ep.ret, ep.steps
            );
            agent.replay_buffer.insert(ep.trajectory)?;
        } else {
            if ep.trajectory.len() >= self.config.max_trajectory_length {
                let id = ep.trajectory.episode_id;
                let chunk = std::mem::replace(&mut ep.trajectory, Trajectory::new(id));
                agent.replay_buffer.insert(chunk)?;
            }
            self.episode = Some(ep);
        }

        Ok(true)
    }

    fn learn(
        &mut self,
        agent: &mut AgentParts,
        slot: &ParamsSlot,
        recorder: &mut dyn AggregateRecorder,
        evaluator: &mut Option<&mut dyn Evaluator>,
    ) -> Result<()> {
        self.set_state(TrainerState::Learn);

        for _ in 0..self.config.updates_per_learn {
            if self.stop.is_requested() || self.learn_steps >= self.config.max_learn_steps {
                break;
            }

            let batch = agent.replay_buffer.sample(self.config.batch_size)?;
            let timer = SystemTime::now();
            let update = agent.learner.update(&batch)?;
            self.timer_for_ops += timer.elapsed()?;
            self.opt_steps_for_ops += 1;
            self.learn_steps += 1;

            if let Some(priorities) = &update.priorities {
                agent.replay_buffer.update_priority(&batch.keys, priorities);
            }
            if self.learn_steps % self.config.publish_interval == 0 {
                slot.publish(update.params);
            }

            let mut record = update.record;
            record.insert("env_steps", Scalar(self.env_steps as f32));
            record.insert(
                "replay_transitions",
                Scalar(agent.replay_buffer.num_transitions() as f32),
            );

            if self.learn_steps % self.config.eval_interval == 0 {
                if let Some(evaluator) = evaluator.as_mut() {
                    info!("Starts evaluation at update {}", self.learn_steps);
                    agent.actor.update_params(slot.latest())?;
                    agent.actor.eval();
                    let eval_record = evaluator.evaluate(agent.actor.as_mut());
                    agent.actor.train();
                    record.merge_inplace(eval_record?);
                }
            }

            if self.learn_steps % self.config.save_interval == 0 {
                self.save(agent)?;
            }

            if self.learn_steps % self.config.flush_record_interval == 0 {
                record.insert("opt_steps_per_sec", Scalar(self.opt_steps_per_sec()));
                recorder.store(record);
                recorder.flush(self.learn_steps as _);
            } else {
                recorder.store(record);
            }
        }

        let latest: Arc<_> = slot.latest();
        if latest.version() != agent.actor.params_version() {
            agent.actor.update_params(latest)?;
        }
        self.set_state(TrainerState::Interact);
        Ok(())
    }

    fn save(&self, agent: &AgentParts) -> Result<()> {
        let model_dir = match &self.config.model_dir {
            Some(dir) => PathBuf::from(dir).join(format!("{}", self.learn_steps)),
            None => return Ok(()),
        };
        std::fs::create_dir_all(&model_dir)?;
        agent.learner.save_params(&model_dir)?;
        agent
            .replay_buffer
            .occupancy()
            .save(model_dir.join("replay_occupancy.yaml"))?;
        info!("Saved the model in {:?}", &model_dir);
        Ok(())
    }
}
