use super::*;
use crate::{network::NetworkBundle, util::argmax, CommonConfig};
use anyhow::Result;
use cairn_core::{
    error::CairnError,
    replay_buffer::{ReplayBufferConfig, SequenceBatch},
    Actor, AgentBuilder, EnvSpec, Learner, NetworkFactory, ObsSpec, Observation, RecurrentState,
};
use std::collections::BTreeMap;
use tempdir::TempDir;

const STATE_DIM: usize = 8;

fn config() -> MuZeroConfig {
    MuZeroConfig::default()
        .common(
            CommonConfig::default()
                .sequence_length(6)
                .burn_in_length(1)
                .state_dim(STATE_DIM),
        )
        .num_simulations(4)
        .max_sim_depth(2)
        .simulation_steps(2)
        .td_steps(2)
        .num_bins(11)
        .max_scalar_value(5.0)
        .latent_dim(8)
        .model_units(vec![16])
}

fn spec() -> EnvSpec {
    EnvSpec::discrete(ObsSpec::new(vec![3]), 2)
}

fn extras() -> BTreeMap<String, usize> {
    BTreeMap::from([("policy".to_string(), 2), ("value".to_string(), 1)])
}

fn learner() -> Result<MuZeroLearner> {
    let config = config();
    let contract = config.common.contract(&spec(), extras())?;
    let bundle = MuZeroNetworkFactory.build(&spec(), &config)?;
    MuZeroLearner::build(config, contract, bundle)
}

/// Two windows of 6 steps; the first has 4 real steps and 2 of padding.
fn batch() -> SequenceBatch {
    let (b, t) = (2, 6);
    let mut batch = SequenceBatch::zeros(b, t, 3, &BTreeMap::new(), &extras());
    for i in 0..b * t {
        if i >= t || i % t < 4 {
            batch.mask[i] = 1.0;
            batch.obs[i * 3] = 1.0;
            batch.obs[i * 3 + 1] = (i % t) as f32 / 10.0;
            batch.reward[i] = (i % 3) as f32;
            batch.action[i] = (i % 2) as i64;
            let policy = &mut batch.extras.get_mut("policy").unwrap().data;
            policy[i * 2] = 0.75;
            policy[i * 2 + 1] = 0.25;
            batch.extras.get_mut("value").unwrap().data[i] = 1.5;
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
    let agent = MuZeroBuilder.build(
        &config(),
        &MuZeroNetworkFactory,
        &spec(),
        &ReplayBufferConfig::default(),
    )?;
    agent.check_contracts()?;
    let contract = agent.actor.contract();
    assert_eq!(contract.extras, extras());
    assert_eq!(contract.state_shape, vec![2, STATE_DIM]);
    Ok(())
}

/// Builds the dynamics for a latent state one wider than configured.
struct WrongLatent;

impl NetworkFactory<MuZeroConfig> for WrongLatent {
    type Bundle = NetworkBundle;

    fn build(&self, spec: &EnvSpec, config: &MuZeroConfig) -> Result<NetworkBundle> {
        MuZeroNetworkFactory.build(spec, &config.clone().latent_dim(config.latent_dim + 1))
    }
}

#[test]
fn test_role_mismatch_is_configuration_error() {
    let err = MuZeroBuilder
        .build(&config(), &WrongLatent, &spec(), &ReplayBufferConfig::default())
        .err()
        .unwrap();
    assert!(is_config_error(&err), "{}", err);
}

#[test]
fn test_rejects_invalid_search_parameters() {
    for config in [
        config().max_sim_depth(0),
        config().num_bins(1),
        config().temperature(-1.0),
        // 6 <= 1 (burn-in) + 5 (unrolled steps)
        config().simulation_steps(5),
    ]
    .iter()
    {
        let err = MuZeroBuilder
            .build(config, &MuZeroNetworkFactory, &spec(), &ReplayBufferConfig::default())
            .err()
            .unwrap();
        assert!(is_config_error(&err), "{}", err);
    }
}

#[test]
fn test_zero_simulations_act_on_the_prior() -> Result<()> {
    let config = config().num_simulations(0);
    let mut agent = MuZeroBuilder.build(
        &config,
        &MuZeroNetworkFactory,
        &spec(),
        &ReplayBufferConfig::default(),
    )?;
    let actor = MuZeroActor::build(
        &config,
        agent.actor.contract().clone(),
        MuZeroNetworkFactory.build(&spec(), &config)?.roles().clone(),
        &agent.learner.params()?,
        candle_core::Device::Cpu,
    )?;

    let obs = Observation::new(vec![1.0, 0.5, 0.0]);
    let state = agent.actor.initial_state();
    let (result, _) = actor.plan(&obs, &state)?;
    assert_eq!(result.visits, vec![0, 0]);
    let greedy = argmax(&result.prior_logits);

    for _ in 0..5 {
        let out = agent.actor.select_action(&obs, &state)?;
        assert_eq!(out.action, greedy);
        assert_eq!(out.extras.get("policy").map(|p| p.len()), Some(2));
        assert_eq!(out.extras.get("value").map(|v| v.len()), Some(1));
    }
    agent.actor.eval();
    assert_eq!(agent.actor.select_action(&obs, &state)?.action, greedy);
    Ok(())
}

#[test]
fn test_search_policy_is_a_distribution() -> Result<()> {
    let mut agent = MuZeroBuilder.build(
        &config(),
        &MuZeroNetworkFactory,
        &spec(),
        &ReplayBufferConfig::default(),
    )?;
    let obs = Observation::new(vec![0.0, 1.0, 0.0]);
    let state = agent.actor.initial_state();
    let out = agent.actor.select_action(&obs, &state)?;
    let policy = &out.extras["policy"];
    assert!((policy.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    assert!(out.extras["value"][0].is_finite());
    assert_eq!(out.state.shape(), vec![2, STATE_DIM]);
    Ok(())
}

#[test]
fn test_loss_is_invariant_to_padded_rewards() -> Result<()> {
    let learner = learner()?;
    let batch1 = batch();
    let mut batch2 = batch();
    batch2.reward[4] = 100.0;
    batch2.reward[5] = -100.0;
    batch2.extras.get_mut("value").unwrap().data[5] = 7.0;

    let l1 = learner.loss(&batch1)?;
    let l2 = learner.loss(&batch2)?;
    assert_eq!(l1.loss.to_scalar::<f32>()?, l2.loss.to_scalar::<f32>()?);
    assert_eq!(l1.mask[..6].to_vec(), vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn test_update_publishes_snapshot_and_priorities() -> Result<()> {
    let mut learner = learner()?;
    let update = learner.update(&batch())?;
    assert_eq!(update.params.version(), 1);
    assert_eq!(learner.n_updates(), 1);
    assert_eq!(update.priorities.map(|p| p.len()), Some(2));
    for key in ["loss", "grad_norm", "policy_loss", "value_loss", "reward_loss"].iter() {
        assert!(update.record.get_scalar(key)?.is_finite(), "{}", key);
    }

    let mut bad = batch();
    bad.obs[7 * 3] = f32::NAN;
    let err = learner.update(&bad).err().unwrap();
    assert!(matches!(err.downcast_ref::<CairnError>(), Some(e) if e.is_divergence()));
    assert_eq!(learner.n_updates(), 1);
    Ok(())
}

#[test]
fn test_config_yaml() -> Result<()> {
    let tmp = TempDir::new("muzero_config")?;
    let path = tmp.path().join("muzero.yaml");
    let config = config().loss_coeffs(1.0, 0.5, 2.0).scale_grad(0.25);
    config.save(&path)?;
    assert_eq!(MuZeroConfig::load(&path)?, config);
    Ok(())
}
