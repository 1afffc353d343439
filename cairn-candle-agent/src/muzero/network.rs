use super::{mcts::SearchModel, MuZeroConfig};
use crate::{
    discretizer::Discretizer,
    lstm::LstmConfig,
    mlp::MlpConfig,
    network::{NetworkBundle, Networks, RoleSignature, RoleSpec},
    util::to_host,
};
use anyhow::Result;
use cairn_core::{EnvSpec, NetworkFactory};
use candle_core::{Device, Tensor, D};
use std::{collections::BTreeMap, convert::TryInto};

/// Roles of a MuZero agent.
///
/// `core` summarizes the observations into a hidden vector, `representation`
/// maps it to a latent state, `dynamics` maps a latent state and a one-hot
/// action to the next latent state, and the heads `reward`, `value` and
/// `policy` read latent states.
pub fn expected_roles(
    spec: &EnvSpec,
    config: &MuZeroConfig,
) -> Result<BTreeMap<String, RoleSignature>> {
    let (h, l, a, bins) = (
        config.common.state_dim,
        config.latent_dim,
        spec.num_actions()?,
        config.num_bins,
    );
    Ok(BTreeMap::from([
        ("core".to_string(), RoleSignature::lstm(spec.obs_dim(), h)),
        ("representation".to_string(), RoleSignature::mlp(h, l)),
        ("dynamics".to_string(), RoleSignature::mlp(l + a, l)),
        ("reward".to_string(), RoleSignature::mlp(l, bins)),
        ("value".to_string(), RoleSignature::mlp(l, bins)),
        ("policy".to_string(), RoleSignature::mlp(l, a)),
    ]))
}

/// Builds the networks of a MuZero agent.
#[derive(Clone, Debug, Default)]
pub struct MuZeroNetworkFactory;

impl NetworkFactory<MuZeroConfig> for MuZeroNetworkFactory {
    type Bundle = NetworkBundle;

    fn build(&self, spec: &EnvSpec, config: &MuZeroConfig) -> Result<NetworkBundle> {
        let (h, l, a, bins) = (
            config.common.state_dim,
            config.latent_dim,
            spec.num_actions()?,
            config.num_bins,
        );
        let units = config.model_units.clone();
        NetworkBundle::new(config.device.try_into()?)
            .with_role("core", RoleSpec::Lstm(LstmConfig::new(spec.obs_dim(), h)))?
            .with_role("representation", RoleSpec::Mlp(MlpConfig::new(h, units.clone(), l, true)))?
            .with_role("dynamics", RoleSpec::Mlp(MlpConfig::new(l + a, units.clone(), l, true)))?
            .with_role("reward", RoleSpec::Mlp(MlpConfig::new(l, units.clone(), bins, false)))?
            .with_role("value", RoleSpec::Mlp(MlpConfig::new(l, units.clone(), bins, false)))?
            .with_role("policy", RoleSpec::Mlp(MlpConfig::new(l, units, a, false)))
    }
}

/// One-hot actions `[n, num_actions]`.
pub(super) fn one_hot(actions: &[usize], num_actions: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; actions.len() * num_actions];
    for (i, &a) in actions.iter().enumerate() {
        data[i * num_actions + a] = 1.0;
    }
    Ok(Tensor::from_vec(data, (actions.len(), num_actions), device)?)
}

/// Next latent states from latent states `[.., latent]` and one-hot actions
/// `[.., num_actions]`.
pub(super) fn dynamics(nets: &Networks, latent: &Tensor, action: &Tensor) -> Result<Tensor> {
    let x = Tensor::cat(&[latent, action], D::Minus1)?;
    nets.mlp("dynamics")?.forward(&x)
}

/// The learned model of a single latent state `[1, latent]`, as searched by
/// the actor.
pub(super) struct LearnedModel<'a> {
    pub nets: &'a Networks,
    pub discretizer: &'a Discretizer,
    pub num_actions: usize,
    pub device: &'a Device,
}

impl<'a> SearchModel for LearnedModel<'a> {
    type Latent = Tensor;

    fn num_actions(&self) -> usize {
        self.num_actions
    }

    fn predict(&self, latent: &Tensor) -> Result<(Vec<f32>, f32)> {
        let logits = to_host(&self.nets.mlp("policy")?.forward(latent)?)?;
        let value = self
            .discretizer
            .logits_to_scalar(&self.nets.mlp("value")?.forward(latent)?, self.device)?;
        Ok((logits, to_host(&value)?[0]))
    }

    fn step(&self, latent: &Tensor, action: usize) -> Result<(Tensor, f32)> {
        let a = one_hot(&[action], self.num_actions, self.device)?;
        let next = dynamics(self.nets, latent, &a)?;
        let reward = self
            .discretizer
            .logits_to_scalar(&self.nets.mlp("reward")?.forward(&next)?, self.device)?;
        Ok((next, to_host(&reward)?[0]))
    }
}
