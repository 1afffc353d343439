use anyhow::Result;
use cairn::{run, ConfiguredExperiment, Experiment, ExperimentConfig};
use cairn_candle_agent::{
    muzero::MuZeroConfig, qlearning::QLearningConfig, usfa::UsfaConfig, AgentEntry, AlgorithmConfig,
    CommonConfig, Registry,
};
use cairn_core::{
    dummy::{BanditConfig, BanditEnv, FeatureBanditConfig, FeatureBanditEnv},
    error::CairnError,
    record::NullRecorder,
    Env, TrainerConfig,
};
use tempdir::TempDir;
use test_log::test;

fn common() -> CommonConfig {
    CommonConfig::default()
        .sequence_length(5)
        .burn_in_length(1)
        .state_dim(8)
}

fn configs() -> Vec<AlgorithmConfig> {
    vec![
        AlgorithmConfig::QLearning(QLearningConfig::default().common(common()).n_step(2)),
        AlgorithmConfig::Usfa(UsfaConfig::default().common(common()).n_step(2)),
        AlgorithmConfig::MuZero(
            MuZeroConfig::default()
                .common(common())
                .simulation_steps(2)
                .num_simulations(2)
                .latent_dim(8),
        ),
    ]
}

fn is_config_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CairnError>(), Some(e) if e.is_configuration())
}

#[test]
fn test_every_variant_builds_with_agreeing_contracts() -> Result<()> {
    let registry = Registry::default();
    let spec = FeatureBanditEnv::build(&FeatureBanditConfig::default(), 0)?.spec();
    for config in configs() {
        let id = config.algorithm();
        let entry = ExperimentConfig::new(config).resolve(&registry)?;
        assert_eq!(entry.algorithm(), id);
        let agent = entry.build(&spec, &Default::default())?;
        agent.check_contracts()?;
        let contract = agent.learner.contract();
        assert_eq!(contract.sequence_length, 5);
        assert_eq!(contract.state_shape, vec![2, 8]);
        assert_eq!(contract.num_actions, 3);
        assert_eq!(agent.actor.initial_state().shape(), contract.state_shape);
    }
    Ok(())
}

#[test]
fn test_registry_variant_mismatch_is_configuration_error() {
    let config = ExperimentConfig::new(AlgorithmConfig::QLearning(QLearningConfig::default()))
        .algorithm("usfa");
    let experiment = ConfiguredExperiment::<BanditEnv>::new(config, BanditConfig::default());
    let err = run(&experiment, &mut NullRecorder::new()).err().unwrap();
    assert!(is_config_error(&err), "{}", err);

    let config = ExperimentConfig::new(AlgorithmConfig::QLearning(QLearningConfig::default()))
        .algorithm("r2d2");
    let err = ConfiguredExperiment::<BanditEnv>::new(config, BanditConfig::default())
        .make_agent()
        .err()
        .unwrap();
    assert!(is_config_error(&err), "{}", err);
}

#[test]
fn test_usfa_on_plain_bandit_is_configuration_error() {
    let config = ExperimentConfig::new(AlgorithmConfig::Usfa(UsfaConfig::default()))
        .trainer_config(TrainerConfig::default().max_env_steps(10));
    let experiment = ConfiguredExperiment::<BanditEnv>::new(config, BanditConfig::default());
    let err = run(&experiment, &mut NullRecorder::new()).err().unwrap();
    assert!(is_config_error(&err), "{}", err);
}

#[test]
fn test_custom_registry_entry() -> Result<()> {
    let mut registry = Registry::empty();
    registry.register("greedy_qlearning", |config| match config {
        AlgorithmConfig::QLearning(c) => Ok(AgentEntry::new(AlgorithmConfig::QLearning(
            c.explorer(cairn_candle_agent::explorer::Explorer::Greedy),
        ))),
        other => Err(CairnError::config(format!("{} is not Q-learning", other.algorithm()))),
    });
    let config = ExperimentConfig::new(configs().remove(0)).algorithm("greedy_qlearning");
    match config.resolve(&registry)? {
        AgentEntry::QLearning { config, .. } => {
            assert_eq!(config.explorer, cairn_candle_agent::explorer::Explorer::Greedy)
        }
        _ => panic!("expected a Q-learning entry"),
    }
    assert!(registry.resolve("qlearning", configs().remove(0)).is_err());
    Ok(())
}

#[test]
fn test_experiment_config_yaml() -> Result<()> {
    let tmp = TempDir::new("experiment_config")?;
    for (i, agent) in configs().into_iter().enumerate() {
        let path = tmp.path().join(format!("experiment_{}.yaml", i));
        let config = ExperimentConfig::new(agent)
            .seed(3)
            .trainer_config(TrainerConfig::default().max_env_steps(100).batch_size(8));
        config.save(&path)?;
        assert_eq!(ExperimentConfig::load(&path)?, config);
    }
    Ok(())
}
