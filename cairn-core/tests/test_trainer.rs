use anyhow::Result;
use cairn_core::{
    dummy::{dummy_agent, BanditConfig, BanditEnv, FlakyConfig, FlakyEnv},
    error::{is_unrecoverable, CairnError},
    record::{BufferedRecorder, NullRecorder},
    replay_buffer::{ReplayBufferConfig, ReplayOccupancy},
    Action, DefaultEvaluator, Env, EnvSpec, Observation, Step, StopSignal, Trainer,
    TrainerConfig, TrainerState,
};

use tempdir::TempDir;
use test_log::test;

const SEQ_LEN: usize = 3;

fn replay_config() -> ReplayBufferConfig {
    ReplayBufferConfig::default().capacity(100).seed(42)
}

fn bandit(episode_length: usize) -> BanditConfig {
    BanditConfig {
        episode_length,
        ..Default::default()
    }
}

/// Raises a stop signal from inside `step` after a number of calls.
#[derive(Clone)]
struct StopConfig {
    inner: BanditConfig,
    stop: StopSignal,
    stop_after: usize,
}

struct StopEnv {
    inner: BanditEnv,
    stop: StopSignal,
    stop_after: usize,
    n_calls: usize,
}

impl Env for StopEnv {
    type Config = StopConfig;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        Ok(Self {
            inner: BanditEnv::build(&config.inner, seed)?,
            stop: config.stop.clone(),
            stop_after: config.stop_after,
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
        if self.n_calls == self.stop_after {
            self.stop.request();
        }
        self.inner.step(a)
    }
}

#[test]
fn test_warmup_learn_and_publish() -> Result<()> {
    let mut env = BanditEnv::build(&bandit(4), 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let config = TrainerConfig::default()
        .max_env_steps(40)
        .min_replay_transitions(8)
        .learn_interval(2)
        .batch_size(4)
        .eval_interval(5);
    let mut evaluator = DefaultEvaluator::<BanditEnv>::new(&bandit(4), 1, 2)?;
    let mut recorder = BufferedRecorder::new();
    let mut trainer = Trainer::build(config);
    let summary = trainer.train(&mut env, &mut agent, &mut recorder, Some(&mut evaluator))?;

    // learning starts at step 8 and runs on every even step after it
    assert_eq!(summary.env_steps, 40);
    assert_eq!(summary.episodes, 10);
    assert_eq!(summary.failed_episodes, 0);
    assert_eq!(summary.learn_steps, 17);
    assert_eq!(summary.params_version, 17);
    assert_eq!(agent.actor.params_version(), 17);
    assert!(agent.actor.is_train());
    assert_eq!(trainer.state(), TrainerState::Terminated);

    assert_eq!(agent.replay_buffer.len(), 10);
    assert_eq!(agent.replay_buffer.num_transitions(), 40);
    assert!(!recorder.flushed().is_empty());
    Ok(())
}

#[test]
fn test_transient_env_failure_ends_episode_only() -> Result<()> {
    let config = FlakyConfig {
        inner: bandit(4),
        fail_at: vec![3, 10],
        unrecoverable: false,
    };
    let mut env = FlakyEnv::<BanditEnv>::build(&config, 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let mut trainer = Trainer::build(TrainerConfig::default().max_env_steps(20));
    let summary = trainer.train(&mut env, &mut agent, &mut NullRecorder {}, None)?;

    assert_eq!(summary.env_steps, 20);
    assert_eq!(summary.episodes, 6);
    assert_eq!(summary.failed_episodes, 2);

    // the two failed episodes are kept as non-terminal partial trajectories
    let (n_partial, n_steps) = agent.replay_buffer.with(|b| {
        let partial = b.iter().filter(|t| !t.is_terminal()).count();
        let steps = b.iter().map(|t| t.len()).sum::<usize>();
        (partial, steps)
    });
    assert_eq!(n_partial, 2);
    assert_eq!(n_steps, 20);
    Ok(())
}

#[test]
fn test_unrecoverable_env_failure_is_returned() -> Result<()> {
    let config = FlakyConfig {
        inner: bandit(4),
        fail_at: vec![3],
        unrecoverable: true,
    };
    let mut env = FlakyEnv::<BanditEnv>::build(&config, 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let mut trainer = Trainer::build(TrainerConfig::default().max_env_steps(20));
    let err = trainer
        .train(&mut env, &mut agent, &mut NullRecorder {}, None)
        .unwrap_err();

    assert!(is_unrecoverable(&err));
    assert_eq!(trainer.state(), TrainerState::Terminated);
    assert_eq!(agent.replay_buffer.num_transitions(), 2);
    Ok(())
}

#[test]
fn test_too_many_consecutive_failures() -> Result<()> {
    let config = FlakyConfig {
        inner: bandit(4),
        fail_at: (1..=10).collect(),
        unrecoverable: false,
    };
    let mut env = FlakyEnv::<BanditEnv>::build(&config, 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let mut trainer = Trainer::build(
        TrainerConfig::default()
            .max_env_steps(20)
            .max_consecutive_env_failures(3),
    );
    assert!(trainer
        .train(&mut env, &mut agent, &mut NullRecorder {}, None)
        .is_err());
    assert_eq!(trainer.env_steps(), 0);
    assert!(agent.replay_buffer.is_empty());
    Ok(())
}

#[test]
fn test_stop_signal_commits_in_flight_episode() -> Result<()> {
    let mut trainer = Trainer::build(TrainerConfig::default().max_env_steps(1000));
    let config = StopConfig {
        inner: bandit(100),
        stop: trainer.stop_signal(),
        stop_after: 7,
    };
    let mut env = StopEnv::build(&config, 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let summary = trainer.train(&mut env, &mut agent, &mut NullRecorder {}, None)?;

    assert_eq!(summary.env_steps, 7);
    assert_eq!(trainer.state(), TrainerState::Terminated);
    assert_eq!(agent.replay_buffer.len(), 1);
    assert_eq!(agent.replay_buffer.num_transitions(), 7);
    let terminal = agent
        .replay_buffer
        .with(|b| b.iter().next().map(|t| t.is_terminal()));
    assert_eq!(terminal, Some(false));
    Ok(())
}

#[test]
fn test_learner_divergence_is_fatal() -> Result<()> {
    let mut env = BanditEnv::build(&bandit(4), 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), Some(3))?;
    let config = TrainerConfig::default()
        .max_env_steps(100)
        .min_replay_transitions(4);
    let mut trainer = Trainer::build(config);
    let err = trainer
        .train(&mut env, &mut agent, &mut NullRecorder {}, None)
        .unwrap_err();

    match err.downcast_ref::<CairnError>() {
        Some(e) => assert!(e.is_divergence()),
        None => panic!("unexpected error: {}", err),
    }
    assert_eq!(trainer.learn_steps(), 2);
    assert_eq!(trainer.state(), TrainerState::Terminated);
    Ok(())
}

#[test]
fn test_long_episodes_are_chunked() -> Result<()> {
    let mut env = BanditEnv::build(&bandit(8), 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let config = TrainerConfig::default()
        .max_env_steps(8)
        .max_trajectory_length(3);
    let mut trainer = Trainer::build(config);
    trainer.train(&mut env, &mut agent, &mut NullRecorder {}, None)?;

    let chunks = agent
        .replay_buffer
        .with(|b| b.iter().map(|t| (t.len(), t.is_terminal())).collect::<Vec<_>>());
    assert_eq!(chunks, vec![(3, false), (3, false), (2, true)]);

    // every chunk keeps the recurrent state the first action was taken in
    let first_states = agent
        .replay_buffer
        .with(|b| b.iter().map(|t| t.states[0].to_vec()).collect::<Vec<_>>());
    assert_eq!(first_states, vec![vec![0.0], vec![3.0], vec![6.0]]);
    Ok(())
}

#[test]
fn test_max_episode_steps_cuts_episodes() -> Result<()> {
    let mut env = BanditEnv::build(&bandit(100), 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let config = TrainerConfig::default()
        .max_env_steps(12)
        .max_episode_steps(5);
    let mut trainer = Trainer::build(config);
    let summary = trainer.train(&mut env, &mut agent, &mut NullRecorder {}, None)?;

    assert_eq!(summary.episodes, 3);
    let lens = agent
        .replay_buffer
        .with(|b| b.iter().map(|t| t.len()).collect::<Vec<_>>());
    assert_eq!(lens, vec![5, 5, 2]);
    Ok(())
}

#[test]
fn test_zero_intervals_are_configuration_errors() -> Result<()> {
    let base = TrainerConfig::default()
        .max_env_steps(20)
        .min_replay_transitions(4);
    for config in [
        base.clone().learn_interval(0),
        base.clone().publish_interval(0),
        base.clone().eval_interval(0),
        base.clone().flush_record_interval(0),
        base.clone().save_interval(0),
        base.clone().batch_size(0),
    ]
    .iter()
    {
        let mut env = BanditEnv::build(&bandit(4), 0)?;
        let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
        let mut trainer = Trainer::build(config.clone());
        let err = trainer
            .train(&mut env, &mut agent, &mut NullRecorder {}, None)
            .unwrap_err();

        match err.downcast_ref::<CairnError>() {
            Some(e) => assert!(e.is_configuration(), "{}", e),
            None => panic!("unexpected error: {}", err),
        }
        assert_eq!(trainer.env_steps(), 0);
        assert!(agent.replay_buffer.is_empty());
    }
    Ok(())
}

#[test]
fn test_periodic_checkpoints() -> Result<()> {
    let tmp = TempDir::new("trainer_checkpoints")?;
    let model_dir = tmp.path().join("model");
    let mut env = BanditEnv::build(&bandit(4), 0)?;
    let mut agent = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    let config = TrainerConfig::default()
        .max_env_steps(20)
        .min_replay_transitions(8)
        .learn_interval(2)
        .batch_size(4)
        .save_interval(3)
        .model_dir(model_dir.to_string_lossy());
    let mut trainer = Trainer::build(config);
    let summary = trainer.train(&mut env, &mut agent, &mut NullRecorder {}, None)?;
    assert_eq!(summary.learn_steps, 7);

    // updates 3 and 6 happen at env steps 12 and 18
    let occupancy = ReplayOccupancy::load(model_dir.join("3").join("replay_occupancy.yaml"))?;
    assert_eq!(occupancy.transitions, 12);
    assert_eq!(occupancy.trajectories, 3);
    let occupancy = ReplayOccupancy::load(model_dir.join("6").join("replay_occupancy.yaml"))?;
    assert_eq!(occupancy.transitions, 16);
    assert!(!model_dir.join("7").exists());

    assert!(model_dir.join("3").join("dummy_learner.yaml").exists());
    let mut restored = dummy_agent(&env.spec(), SEQ_LEN, &replay_config(), None)?;
    restored.learner.load_params(&model_dir.join("6"))?;
    assert_eq!(restored.learner.n_updates(), 6);
    Ok(())
}
