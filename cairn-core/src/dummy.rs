//! Small environments and agent components for tests and examples.
use crate::{
    error::{CairnError, EnvError},
    params::{ParamSet, ParamTensor},
    record::Record,
    replay_buffer::{ReplayBufferConfig, SequenceBatch, SequenceReplayBuffer, SharedReplayBuffer},
    Action, Actor, ActorOutput, AgentParts, Env, EnvSpec, Learner, LearnerUpdate, ObsSpec,
    Observation, RecurrentState, Step, TemporalContract,
};
use anyhow::Result;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{collections::BTreeMap, path::Path, sync::Arc};

/// Configuration of [`BanditEnv`].
#[derive(Clone, Debug)]
pub struct BanditConfig {
    /// Number of arms.
    pub num_actions: usize,

    /// Reward of each arm.
    pub rewards: Vec<f32>,

    /// Steps per episode.
    pub episode_length: usize,
}

impl Default for BanditConfig {
    /// Two arms, `+1` for arm 0 and `0` for arm 1.
    fn default() -> Self {
        Self {
            num_actions: 2,
            rewards: vec![1.0, 0.0],
            episode_length: 4,
        }
    }
}

/// Deterministic single-state bandit.
///
/// The observation is always `[1.0]`.
pub struct BanditEnv {
    config: BanditConfig,
    t: usize,
}

impl Env for BanditEnv {
    type Config = BanditConfig;

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        if config.rewards.len() != config.num_actions {
            return Err(CairnError::config("one reward per arm is required").into());
        }
        Ok(Self {
            config: config.clone(),
            t: 0,
        })
    }

    fn spec(&self) -> EnvSpec {
        EnvSpec::discrete(ObsSpec::new(vec![1]), self.config.num_actions)
    }

    fn reset(&mut self) -> Result<Observation> {
        self.t = 0;
        Ok(Observation::new(vec![1.0]))
    }

    fn step(&mut self, a: Action) -> Result<Step> {
        let reward = *self
            .config
            .rewards
            .get(a)
            .ok_or_else(|| EnvError::Transient(format!("invalid action {}", a)))?;
        self.t += 1;
        Ok(Step::new(
            Observation::new(vec![1.0]),
            reward,
            self.t >= self.config.episode_length,
        ))
    }
}

/// Configuration of [`FeatureBanditEnv`].
#[derive(Clone, Debug)]
pub struct FeatureBanditConfig {
    /// Cumulant of each arm.
    pub features: Vec<Vec<f32>>,

    /// Tasks an episode draws its task vector from.
    pub tasks: Vec<Vec<f32>>,

    /// Steps per episode.
    pub episode_length: usize,
}

impl Default for FeatureBanditConfig {
    /// Three arms with features `e0`, `e1` and `(0.5, 0.5)` under tasks `e0`
    /// and `e1`.
    fn default() -> Self {
        Self {
            features: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]],
            tasks: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            episode_length: 4,
        }
    }
}

/// Single-state bandit with successor-feature annotations.
///
/// Observations carry the task vector of the episode as aux `task`; steps
/// carry the cumulant of the pulled arm as info `cumulant`, and the reward is
/// their dot product.
pub struct FeatureBanditEnv {
    config: FeatureBanditConfig,
    task: Vec<f32>,
    t: usize,
    rng: SmallRng,
}

impl FeatureBanditEnv {
    fn obs(&self) -> Observation {
        Observation::new(vec![1.0]).with_aux("task", self.task.clone())
    }

    fn cumulant_dim(&self) -> usize {
        self.config.tasks.first().map(|t| t.len()).unwrap_or(0)
    }
}

impl Env for FeatureBanditEnv {
    type Config = FeatureBanditConfig;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        let dim = match config.tasks.first() {
            Some(t) => t.len(),
            None => return Err(CairnError::config("at least one task is required").into()),
        };
        if config.tasks.iter().chain(config.features.iter()).any(|v| v.len() != dim) {
            return Err(CairnError::config("tasks and features must share one dimension").into());
        }
        Ok(Self {
            config: config.clone(),
            task: config.tasks[0].clone(),
            t: 0,
            rng: SmallRng::seed_from_u64(seed as u64),
        })
    }

    fn spec(&self) -> EnvSpec {
        let dim = self.cumulant_dim();
        EnvSpec::discrete(ObsSpec::new(vec![1]).aux("task", dim), self.config.features.len())
            .info("cumulant", dim)
    }

    fn reset(&mut self) -> Result<Observation> {
        self.t = 0;
        let i = self.rng.gen_range(0..self.config.tasks.len());
        self.task = self.config.tasks[i].clone();
        Ok(self.obs())
    }

    fn reset_with_index(&mut self, ix: usize) -> Result<Observation> {
        self.t = 0;
        self.task = self.config.tasks[ix % self.config.tasks.len()].clone();
        Ok(self.obs())
    }

    fn step(&mut self, a: Action) -> Result<Step> {
        let phi = self
            .config
            .features
            .get(a)
            .ok_or_else(|| EnvError::Transient(format!("invalid action {}", a)))?
            .clone();
        let reward = phi.iter().zip(self.task.iter()).map(|(x, w)| x * w).sum();
        self.t += 1;
        Ok(Step::new(self.obs(), reward, self.t >= self.config.episode_length)
            .with_info("cumulant", phi))
    }
}

/// Configuration of [`ChainEnv`].
#[derive(Clone, Debug)]
pub struct ChainConfig {
    /// Number of states.
    pub length: usize,

    /// Steps after which the episode is cut.
    pub max_steps: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            length: 4,
            max_steps: 12,
        }
    }
}

/// Walk on a chain: action 0 moves left, action 1 moves right.
///
/// Reaching the right end gives `+1` and ends the episode. The observation is
/// the one-hot encoding of the position.
pub struct ChainEnv {
    config: ChainConfig,
    pos: usize,
    t: usize,
}

impl ChainEnv {
    fn obs(&self) -> Observation {
        let mut v = vec![0f32; self.config.length];
        v[self.pos] = 1.0;
        Observation::new(v)
    }
}

impl Env for ChainEnv {
    type Config = ChainConfig;

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        if config.length < 2 {
            return Err(CairnError::config("chain needs at least two states").into());
        }
        Ok(Self {
            config: config.clone(),
            pos: 0,
            t: 0,
        })
    }

    fn spec(&self) -> EnvSpec {
        EnvSpec::discrete(ObsSpec::new(vec![self.config.length]), 2)
    }

    fn reset(&mut self) -> Result<Observation> {
        self.pos = 0;
        self.t = 0;
        Ok(self.obs())
    }

    fn step(&mut self, a: Action) -> Result<Step> {
        match a {
            0 => self.pos = self.pos.saturating_sub(1),
            1 => self.pos = (self.pos + 1).min(self.config.length - 1),
            _ => return Err(EnvError::Transient(format!("invalid action {}", a)).into()),
        }
        self.t += 1;
        let goal = self.pos + 1 == self.config.length;
        let reward = if goal { 1.0 } else { 0.0 };
        Ok(Step::new(
            self.obs(),
            reward,
            goal || self.t >= self.config.max_steps,
        ))
    }
}

/// Configuration of [`FlakyEnv`].
#[derive(Clone, Debug)]
pub struct FlakyConfig<C> {
    /// Configuration of the wrapped environment.
    pub inner: C,

    /// Step calls, counted from 1 over the lifetime of the environment, that
    /// fail.
    pub fail_at: Vec<usize>,

    /// Whether the failures are unrecoverable.
    pub unrecoverable: bool,
}

/// Wraps an environment and fails chosen step calls.
pub struct FlakyEnv<E: Env> {
    inner: E,
    fail_at: Vec<usize>,
    unrecoverable: bool,
    n_calls: usize,
}

impl<E: Env> Env for FlakyEnv<E> {
    type Config = FlakyConfig<E::Config>;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        Ok(Self {
            inner: E::build(&config.inner, seed)?,
            fail_at: config.fail_at.clone(),
            unrecoverable: config.unrecoverable,
            n_calls: 0,
        })
    }

    fn spec(&self) -> EnvSpec {
        self.inner.spec()
    }

    fn reset(&mut self) -> Result<Observation> {
        self.inner.reset()
    }

    fn step(&mut self, a: Action) -> Result<Step> {
        self.n_calls += 1;
        if self.fail_at.contains(&self.n_calls) {
            let msg = format!("injected failure at call {}", self.n_calls);
            return Err(if self.unrecoverable {
                EnvError::Unrecoverable(msg)
            } else {
                EnvError::Transient(msg)
            }
            .into());
        }
        self.inner.step(a)
    }
}

/// Shapes of the single parameter held by [`DummyLearner`].
fn dummy_params(version: u64) -> ParamSet {
    let tensors = BTreeMap::from([(
        "dummy/weight".to_string(),
        ParamTensor {
            shape: vec![1],
            data: vec![version as f32],
        },
    )]);
    ParamSet::new(version, tensors)
}

/// Learner that counts updates without training anything.
pub struct DummyLearner {
    contract: TemporalContract,
    n_updates: usize,
    diverge_at: Option<usize>,
}

impl DummyLearner {
    /// Creates a learner that fails with a divergence error at update
    /// `diverge_at` (counted from 1), if given.
    pub fn new(contract: TemporalContract, diverge_at: Option<usize>) -> Self {
        Self {
            contract,
            n_updates: 0,
            diverge_at,
        }
    }
}

impl Learner for DummyLearner {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn update(&mut self, batch: &SequenceBatch) -> Result<LearnerUpdate> {
        if Some(self.n_updates + 1) == self.diverge_at {
            return Err(CairnError::LearnerDivergence {
                update: self.n_updates + 1,
                reason: "loss is NaN".to_string(),
            }
            .into());
        }
        self.n_updates += 1;
        Ok(LearnerUpdate {
            params: Arc::new(dummy_params(self.n_updates as u64)),
            record: Record::from_scalar("loss", 0.0),
            priorities: Some(vec![1.0; batch.batch_size]),
        })
    }

    fn params(&self) -> Result<Arc<ParamSet>> {
        Ok(Arc::new(dummy_params(self.n_updates as u64)))
    }

    fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// Writes the update count to `dummy_learner.yaml` in `path`.
    fn save_params(&self, path: &Path) -> Result<()> {
        std::fs::write(
            path.join("dummy_learner.yaml"),
            serde_yaml::to_string(&self.n_updates)?,
        )?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let s = std::fs::read_to_string(path.join("dummy_learner.yaml"))?;
        self.n_updates = serde_yaml::from_str(&s)?;
        Ok(())
    }
}

/// Actor that picks uniformly random actions and counts its steps in the
/// recurrent state.
pub struct DummyActor {
    contract: TemporalContract,
    version: u64,
    train: bool,
    rng: SmallRng,
}

impl DummyActor {
    /// Creates the actor.
    pub fn new(contract: TemporalContract, seed: u64) -> Self {
        Self {
            contract,
            version: 0,
            train: true,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Actor for DummyActor {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn initial_state(&self) -> RecurrentState {
        RecurrentState::new(vec![vec![0f32]])
    }

    fn select_action(&mut self, _obs: &Observation, state: &RecurrentState) -> Result<ActorOutput> {
        let n = state.part(0).map(|p| p[0]).unwrap_or(0f32);
        Ok(ActorOutput {
            action: self.rng.gen_range(0..self.contract.num_actions),
            state: RecurrentState::new(vec![vec![n + 1.0]]),
            extras: Default::default(),
        })
    }

    fn update_params(&mut self, params: Arc<ParamSet>) -> Result<()> {
        self.version = params.version();
        Ok(())
    }

    fn params_version(&self) -> u64 {
        self.version
    }

    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }
}

/// Builds dummy components for an environment with discrete actions.
pub fn dummy_agent(
    spec: &EnvSpec,
    sequence_length: usize,
    replay_config: &ReplayBufferConfig,
    diverge_at: Option<usize>,
) -> Result<AgentParts> {
    let contract = TemporalContract {
        sequence_length,
        state_shape: vec![1, 1],
        num_actions: spec.num_actions()?,
        obs_dim: spec.obs_dim(),
        obs_aux: spec.observation.aux.clone(),
        extras: spec.info.clone(),
    };
    let replay = SequenceReplayBuffer::build(replay_config, contract.clone())?;
    Ok(AgentParts {
        learner: Box::new(DummyLearner::new(contract.clone(), diverge_at)),
        actor: Box::new(DummyActor::new(contract, replay_config.seed)),
        replay_buffer: SharedReplayBuffer::new(replay),
    })
}
