use super::QLearningConfig;
use crate::{
    lstm::LstmConfig,
    mlp::MlpConfig,
    network::{NetworkBundle, RoleSignature, RoleSpec},
};
use anyhow::Result;
use cairn_core::{EnvSpec, NetworkFactory};
use std::{collections::BTreeMap, convert::TryInto};

/// Roles a Q-learning agent requires: an LSTM `core` over observations and
/// an MLP `value` from hidden vectors to action values.
pub fn expected_roles(
    spec: &EnvSpec,
    config: &QLearningConfig,
) -> Result<BTreeMap<String, RoleSignature>> {
    let h = config.common.state_dim;
    Ok(BTreeMap::from([
        ("core".to_string(), RoleSignature::lstm(spec.obs_dim(), h)),
        ("value".to_string(), RoleSignature::mlp(h, spec.num_actions()?)),
    ]))
}

/// Builds the networks of a Q-learning agent on the configured device.
#[derive(Clone, Debug, Default)]
pub struct QLearningNetworkFactory;

impl NetworkFactory<QLearningConfig> for QLearningNetworkFactory {
    type Bundle = NetworkBundle;

    fn build(&self, spec: &EnvSpec, config: &QLearningConfig) -> Result<NetworkBundle> {
        let h = config.common.state_dim;
        let core = LstmConfig::new(spec.obs_dim(), h);
        let value = MlpConfig::new(h, config.value_units.clone(), spec.num_actions()?, false);
        NetworkBundle::new(config.device.try_into()?)
            .with_role("core", RoleSpec::Lstm(core))?
            .with_role("value", RoleSpec::Mlp(value))
    }
}
