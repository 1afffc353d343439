use super::UsfaConfig;
use crate::{
    lstm::LstmConfig,
    mlp::MlpConfig,
    network::{NetworkBundle, RoleSignature, RoleSpec},
};
use anyhow::Result;
use cairn_core::{error::CairnError, EnvSpec, NetworkFactory};
use std::{collections::BTreeMap, convert::TryInto};

/// Dimension of the task vector, which the cumulant shares.
///
/// Fails unless observations carry the aux vector `task` and steps the info
/// vector `cumulant` of the same length.
pub fn task_dim(spec: &EnvSpec) -> Result<usize, CairnError> {
    let c = match spec.observation.aux.get("task") {
        Some(&c) if c > 0 => c,
        Some(_) => return Err(CairnError::config("observation aux 'task' is empty")),
        None => {
            return Err(CairnError::config(
                "environment does not provide observation aux 'task'",
            ))
        }
    };
    spec.require_info("cumulant", c)?;
    Ok(c)
}

/// Roles a USFA agent requires: an LSTM `core` over observations and an MLP
/// `successor_features` from a hidden vector and a policy vector to
/// `num_actions * task_dim` features.
pub fn expected_roles(
    spec: &EnvSpec,
    config: &UsfaConfig,
) -> Result<BTreeMap<String, RoleSignature>> {
    let h = config.common.state_dim;
    let c = task_dim(spec)?;
    Ok(BTreeMap::from([
        ("core".to_string(), RoleSignature::lstm(spec.obs_dim(), h)),
        (
            "successor_features".to_string(),
            RoleSignature::mlp(h + c, spec.num_actions()? * c),
        ),
    ]))
}

/// Builds the networks of a USFA agent.
#[derive(Clone, Debug, Default)]
pub struct UsfaNetworkFactory;

impl NetworkFactory<UsfaConfig> for UsfaNetworkFactory {
    type Bundle = NetworkBundle;

    fn build(&self, spec: &EnvSpec, config: &UsfaConfig) -> Result<NetworkBundle> {
        let h = config.common.state_dim;
        let c = task_dim(spec)?;
        let core = LstmConfig::new(spec.obs_dim(), h);
        let sf = MlpConfig::new(h + c, config.sf_units.clone(), spec.num_actions()? * c, false);
        NetworkBundle::new(config.device.try_into()?)
            .with_role("core", RoleSpec::Lstm(core))?
            .with_role("successor_features", RoleSpec::Mlp(sf))
    }
}
