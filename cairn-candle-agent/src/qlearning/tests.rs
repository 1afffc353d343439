use super::*;
use crate::{
    lstm::LstmConfig,
    mlp::MlpConfig,
    network::{NetworkBundle, Networks, RoleSpec},
    CommonConfig,
};
use anyhow::Result;
use cairn_core::{
    error::CairnError,
    params::ParamsSlot,
    replay_buffer::{ReplayBufferConfig, SequenceBatch},
    ActionSpace, AgentBuilder, EnvSpec, Learner, NetworkFactory, ObsSpec, RecurrentState,
};
use candle_core::Device;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tempdir::TempDir;

const STATE_DIM: usize = 8;

fn config() -> QLearningConfig {
    QLearningConfig::default()
        .common(
            CommonConfig::default()
                .sequence_length(6)
                .burn_in_length(1)
                .state_dim(STATE_DIM),
        )
        .n_step(2)
        .value_units(vec![16])
}

fn spec() -> EnvSpec {
    EnvSpec::discrete(ObsSpec::new(vec![3]), 2)
}

fn learner() -> Result<QLearningLearner> {
    let config = config();
    let contract = config.common.contract(&spec(), BTreeMap::new())?;
    let bundle = QLearningNetworkFactory.build(&spec(), &config)?;
    QLearningLearner::build(config, contract, bundle)
}

/// Two windows of 6 steps; the first has 4 real steps and 2 of padding.
fn batch() -> SequenceBatch {
    let (b, t) = (2, 6);
    let mut batch = SequenceBatch::zeros(b, t, 3, &BTreeMap::new(), &BTreeMap::new());
    for i in 0..b * t {
        let real = i >= t || i % t < 4;
        if real {
            batch.mask[i] = 1.0;
            batch.obs[i * 3] = 1.0;
            batch.obs[i * 3 + 1] = (i % t) as f32 / 10.0;
            batch.reward[i] = (i % 3) as f32;
            batch.action[i] = (i % 2) as i64;
        }
    }
    batch.initial_state = vec![RecurrentState::zeros(2, STATE_DIM); b];
    batch
}

#[test]
fn test_build_contracts_agree() -> Result<()> {
    let agent = QLearningBuilder.build(
        &config(),
        &QLearningNetworkFactory,
        &spec(),
        &ReplayBufferConfig::default(),
    )?;
    agent.check_contracts()?;
    assert_eq!(agent.learner.contract().state_shape, vec![2, STATE_DIM]);
    assert_eq!(agent.actor.initial_state().shape(), vec![2, STATE_DIM]);
    assert_eq!(agent.actor.params_version(), 0);
    Ok(())
}

/// Builds the value head with a wrong number of outputs.
struct WrongValueHead;

impl NetworkFactory<QLearningConfig> for WrongValueHead {
    type Bundle = NetworkBundle;

    fn build(&self, spec: &EnvSpec, config: &QLearningConfig) -> Result<NetworkBundle> {
        let h = config.common.state_dim;
        NetworkBundle::new(Device::Cpu)
            .with_role("core", RoleSpec::Lstm(LstmConfig::new(spec.obs_dim(), h)))?
            .with_role("value", RoleSpec::Mlp(MlpConfig::new(h, vec![], 7, false)))
    }
}

fn is_config_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CairnError>(), Some(e) if e.is_configuration())
}

#[test]
fn test_role_mismatch_is_configuration_error() {
    let err = QLearningBuilder
        .build(&config(), &WrongValueHead, &spec(), &ReplayBufferConfig::default())
        .err()
        .unwrap();
    assert!(is_config_error(&err), "{}", err);
}

#[test]
fn test_rejects_continuous_actions_and_short_windows() {
    let continuous = EnvSpec {
        action: ActionSpace::Continuous { dim: 1 },
        ..spec()
    };
    let err = QLearningBuilder
        .build(&config(), &QLearningNetworkFactory, &continuous, &ReplayBufferConfig::default())
        .err()
        .unwrap();
    assert!(is_config_error(&err));

    // 6 <= 1 (burn-in) + 5 (n-step)
    let err = QLearningBuilder
        .build(
            &config().n_step(5),
            &QLearningNetworkFactory,
            &spec(),
            &ReplayBufferConfig::default(),
        )
        .err()
        .unwrap();
    assert!(is_config_error(&err));
}

#[test]
fn test_loss_is_invariant_to_padded_rewards() -> Result<()> {
    let learner = learner()?;
    let batch1 = batch();
    let mut batch2 = batch();
    batch2.reward[4] = 100.0;
    batch2.reward[5] = -100.0;

    let l1 = learner.loss(&batch1)?;
    let l2 = learner.loss(&batch2)?;
    assert_eq!(l1.loss.to_scalar::<f32>()?, l2.loss.to_scalar::<f32>()?);

    // burn-in, padding and steps without a 2-step successor are masked
    assert_eq!(l1.mask[..6].to_vec(), vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    assert_eq!(l1.mask[6..].to_vec(), vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn test_update_publishes_snapshot_and_priorities() -> Result<()> {
    let mut learner = learner()?;
    let before = learner.params()?;
    let update = learner.update(&batch())?;
    assert_eq!(update.params.version(), 1);
    assert_eq!(learner.n_updates(), 1);
    assert_ne!(update.params.iter().collect::<Vec<_>>(), before.iter().collect::<Vec<_>>());
    assert_eq!(update.priorities.map(|p| p.len()), Some(2));
    assert!(update.record.get_scalar("loss")?.is_finite());
    Ok(())
}

#[test]
fn test_non_finite_loss_is_divergence() -> Result<()> {
    let mut learner = learner()?;
    let mut batch = batch();
    batch.reward[7] = f32::NAN;
    let err = learner.update(&batch).err().unwrap();
    match err.downcast_ref::<CairnError>() {
        Some(e) => assert!(e.is_divergence()),
        None => panic!("unexpected error: {}", err),
    }
    assert_eq!(learner.n_updates(), 0);
    Ok(())
}

#[test]
fn test_concurrent_snapshot_reads_during_updates() -> Result<()> {
    let mut learner = learner()?;
    let roles = QLearningNetworkFactory.build(&spec(), &config())?.roles().clone();
    let initial = learner.params()?;
    let shapes = initial.shapes();
    let slot = Arc::new(ParamsSlot::new(initial));
    let done = Arc::new(AtomicBool::new(false));

    let readers = (0..3)
        .map(|_| {
            let slot = slot.clone();
            let done = done.clone();
            let roles = roles.clone();
            let shapes = shapes.clone();
            thread::spawn(move || -> Result<usize> {
                let mut n = 0;
                while !done.load(Ordering::SeqCst) {
                    let params = slot.latest();
                    params.check_shapes(&shapes)?;
                    Networks::from_params(&roles, &params, &Device::Cpu)?;
                    n += 1;
                }
                Ok(n)
            })
        })
        .collect::<Vec<_>>();

    for _ in 0..10 {
        let update = learner.update(&batch())?;
        slot.publish(update.params);
    }
    done.store(true, Ordering::SeqCst);

    for r in readers {
        r.join().unwrap()?;
    }
    assert_eq!(slot.version(), 10);
    Ok(())
}

#[test]
fn test_save_and_load_params() -> Result<()> {
    let tmp = TempDir::new("qlearning")?;
    let mut learner1 = learner()?;
    learner1.update(&batch())?;
    learner1.save_params(tmp.path())?;

    let mut learner2 = learner()?;
    learner2.load_params(tmp.path())?;
    let p1 = learner1.params()?;
    let p2 = learner2.params()?;
    assert_eq!(p1.iter().collect::<Vec<_>>(), p2.iter().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_config_yaml() -> Result<()> {
    let tmp = TempDir::new("qlearning_config")?;
    let path = tmp.path().join("qlearning.yaml");
    let config = config().double_q(false);
    config.save(&path)?;
    assert_eq!(QLearningConfig::load(&path)?, config);
    Ok(())
}
