use super::*;
use crate::CommonConfig;
use anyhow::Result;
use cairn_core::{
    error::CairnError,
    replay_buffer::{ReplayBufferConfig, SequenceBatch},
    Actor, AgentBuilder, EnvSpec, Learner, NetworkFactory, ObsSpec, Observation, RecurrentState,
};
use std::collections::BTreeMap;
use tempdir::TempDir;

const STATE_DIM: usize = 8;
const TASK_DIM: usize = 2;

fn config() -> UsfaConfig {
    UsfaConfig::default()
        .common(
            CommonConfig::default()
                .sequence_length(6)
                .burn_in_length(1)
                .state_dim(STATE_DIM),
        )
        .n_step(2)
        .nsamples(0)
        .sf_units(vec![16])
}

fn spec() -> EnvSpec {
    EnvSpec::discrete(ObsSpec::new(vec![3]).aux("task", TASK_DIM), 2).info("cumulant", TASK_DIM)
}

fn learner(config: UsfaConfig) -> Result<UsfaLearner> {
    let extras = BTreeMap::from([
        ("cumulant".to_string(), TASK_DIM),
        ("task".to_string(), TASK_DIM),
    ]);
    let contract = config.common.contract(&spec(), extras)?;
    let bundle = UsfaNetworkFactory.build(&spec(), &config)?;
    UsfaLearner::build(config, contract, bundle, TASK_DIM)
}

/// Two windows of 6 steps; the first has 4 real steps and 2 of padding.
fn batch() -> SequenceBatch {
    let (b, t) = (2, 6);
    let dims = BTreeMap::from([("task".to_string(), TASK_DIM)]);
    let extras = BTreeMap::from([
        ("cumulant".to_string(), TASK_DIM),
        ("task".to_string(), TASK_DIM),
    ]);
    let mut batch = SequenceBatch::zeros(b, t, 3, &dims, &extras);
    for i in 0..b * t {
        if i >= t || i % t < 4 {
            batch.mask[i] = 1.0;
            batch.obs[i * 3] = 1.0;
            batch.obs[i * 3 + 2] = (i % t) as f32 / 10.0;
            batch.action[i] = (i % 2) as i64;
            let phi = [(i % 2) as f32, 1.0 - (i % 2) as f32];
            let w = [1.0, 0.5];
            batch.reward[i] = phi[0] * w[0] + phi[1] * w[1];
            for k in 0..TASK_DIM {
                batch.extras.get_mut("cumulant").unwrap().data[i * TASK_DIM + k] = phi[k];
                batch.extras.get_mut("task").unwrap().data[i * TASK_DIM + k] = w[k];
                batch.obs_aux.get_mut("task").unwrap().data[i * TASK_DIM + k] = w[k];
            }
        }
    }
    batch.initial_state = vec![RecurrentState::zeros(2, STATE_DIM); b];
    batch
}

fn is_config_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CairnError>(), Some(e) if e.is_configuration())
}

#[test]
fn test_build_contracts_agree() -> Result<()> {
    let agent = UsfaBuilder.build(
        &config(),
        &UsfaNetworkFactory,
        &spec(),
        &ReplayBufferConfig::default(),
    )?;
    agent.check_contracts()?;
    let contract = agent.learner.contract();
    assert_eq!(contract.extras.get("cumulant"), Some(&TASK_DIM));
    assert_eq!(contract.extras.get("task"), Some(&TASK_DIM));
    Ok(())
}

#[test]
fn test_requires_task_and_cumulant() {
    let no_cumulant = EnvSpec::discrete(ObsSpec::new(vec![3]).aux("task", TASK_DIM), 2);
    let err = UsfaBuilder
        .build(&config(), &UsfaNetworkFactory, &no_cumulant, &ReplayBufferConfig::default())
        .err()
        .unwrap();
    assert!(is_config_error(&err), "{}", err);

    let no_task = EnvSpec::discrete(ObsSpec::new(vec![3]), 2).info("cumulant", TASK_DIM);
    let err = UsfaBuilder
        .build(&config(), &UsfaNetworkFactory, &no_task, &ReplayBufferConfig::default())
        .err()
        .unwrap();
    assert!(is_config_error(&err), "{}", err);

    let wrong_dim =
        EnvSpec::discrete(ObsSpec::new(vec![3]).aux("task", TASK_DIM), 2).info("cumulant", 3);
    assert!(task_dim(&wrong_dim).unwrap_err().is_configuration());
}

#[test]
fn test_eval_support_needs_train_tasks() {
    let config = config().eval_task_support(TaskSupport::TrainEval);
    let err = UsfaBuilder
        .build(&config, &UsfaNetworkFactory, &spec(), &ReplayBufferConfig::default())
        .err()
        .unwrap();
    assert!(is_config_error(&err));

    let config = config.train_tasks(vec![vec![1.0, 0.0, 0.0]]);
    assert!(config.check_tasks(TASK_DIM).is_err());
    let config = config.train_tasks(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    assert!(config.check_tasks(TASK_DIM).is_ok());
}

#[test]
fn test_loss_is_invariant_to_padded_cumulants() -> Result<()> {
    let learner = learner(config().q_coeff(0.5))?;
    let batch1 = batch();
    let mut batch2 = batch();
    for k in 0..TASK_DIM {
        batch2.extras.get_mut("cumulant").unwrap().data[4 * TASK_DIM + k] = 50.0;
    }
    batch2.reward[5] = -100.0;

    let policies = vec![1.0, 0.5].repeat(12);
    let l1 = learner.loss(&batch1, &policies)?;
    let l2 = learner.loss(&batch2, &policies)?;
    assert_eq!(l1.loss.to_scalar::<f32>()?, l2.loss.to_scalar::<f32>()?);
    assert_eq!(l1.mask[..6].to_vec(), vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    assert!(l1.reward_error < 1e-6);
    Ok(())
}

#[test]
fn test_sampled_policies_start_with_the_task() -> Result<()> {
    let mut learner = learner(config().nsamples(3).variance(0.25))?;
    let batch = batch();
    let policies = learner.sample_policies(&batch)?;
    assert_eq!(policies.len(), 2 * 6 * 4 * TASK_DIM);
    // every step of window 1 starts with the task
    for ti in 0..6 {
        let k = ((6 + ti) * 4) * TASK_DIM;
        assert_eq!(&policies[k..k + TASK_DIM], &[1.0, 0.5]);
    }
    // perturbations are shared along a window
    let (k0, k1) = ((6 * 4 + 1) * TASK_DIM, ((7 * 4) + 1) * TASK_DIM);
    assert_eq!(policies[k0..k0 + TASK_DIM], policies[k1..k1 + TASK_DIM]);
    Ok(())
}

#[test]
fn test_update_and_divergence() -> Result<()> {
    let mut learner = learner(config().nsamples(2))?;
    let update = learner.update(&batch())?;
    assert_eq!(update.params.version(), 1);
    assert_eq!(update.priorities.map(|p| p.len()), Some(2));
    for key in ["loss", "grad_norm", "sf_loss", "reward_error"].iter() {
        assert!(update.record.get_scalar(key)?.is_finite(), "{}", key);
    }

    let mut bad = batch();
    bad.extras.get_mut("cumulant").unwrap().data[7 * TASK_DIM] = f32::NAN;
    let err = learner.update(&bad).err().unwrap();
    assert!(matches!(err.downcast_ref::<CairnError>(), Some(e) if e.is_divergence()));
    assert_eq!(learner.n_updates(), 1);
    Ok(())
}

#[test]
fn test_actor_stores_task_and_uses_eval_support() -> Result<()> {
    let config = config()
        .eval_task_support(TaskSupport::TrainEval)
        .train_tasks(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    let mut agent = UsfaBuilder.build(
        &config,
        &UsfaNetworkFactory,
        &spec(),
        &ReplayBufferConfig::default(),
    )?;
    let obs = Observation::new(vec![1.0, 0.0, 0.0]).with_aux("task", vec![0.3, 0.7]);

    let state = agent.actor.initial_state();
    let out = agent.actor.select_action(&obs, &state)?;
    assert_eq!(out.extras.get("task"), Some(&vec![0.3, 0.7]));
    assert_eq!(out.state.shape(), vec![2, STATE_DIM]);

    agent.actor.eval();
    let a1 = agent.actor.select_action(&obs, &state)?.action;
    let a2 = agent.actor.select_action(&obs, &state)?.action;
    assert_eq!(a1, a2);

    let no_task = Observation::new(vec![1.0, 0.0, 0.0]);
    assert!(agent.actor.select_action(&no_task, &state).is_err());
    Ok(())
}

#[test]
fn test_gpi_takes_the_max_over_policies() -> Result<()> {
    let agent = UsfaActor::build(
        &config(),
        config().common.contract(&spec(), BTreeMap::new())?,
        UsfaNetworkFactory.build(&spec(), &config())?.roles().clone(),
        &learner(config())?.params()?,
        candle_core::Device::Cpu,
        TASK_DIM,
    )?;
    let h = candle_core::Tensor::ones(
        (1, STATE_DIM),
        candle_core::DType::F32,
        &candle_core::Device::Cpu,
    )?;
    let task = [1.0, -1.0];
    let p1 = [1.0, 0.0];
    let p2 = [0.0, 1.0];
    let q1 = agent.gpi_q_values(&h, &p1, &task)?;
    let q2 = agent.gpi_q_values(&h, &p2, &task)?;
    let q12 = agent.gpi_q_values(&h, &[p1, p2].concat(), &task)?;
    for a in 0..2 {
        assert!((q12[a] - q1[a].max(q2[a])).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn test_config_yaml() -> Result<()> {
    let tmp = TempDir::new("usfa_config")?;
    let path = tmp.path().join("usfa.yaml");
    let config = config()
        .eval_task_support(TaskSupport::Train)
        .train_tasks(vec![vec![1.0, 0.0]])
        .q_coeff(0.1);
    config.save(&path)?;
    assert_eq!(UsfaConfig::load(&path)?, config);
    Ok(())
}
