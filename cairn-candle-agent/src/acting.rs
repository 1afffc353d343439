//! Read-only networks an actor rebuilds from published snapshots.
use crate::{
    network::{Networks, RoleSpec},
    util::{stack_states, unstack_state},
};
use anyhow::Result;
use cairn_core::{params::ParamSet, Observation, RecurrentState};
use candle_core::{Device, Tensor};
use log::trace;
use std::{collections::BTreeMap, sync::Arc};

/// Networks instantiated from the latest snapshot loaded by an actor.
pub struct ActingNetworks {
    roles: BTreeMap<String, RoleSpec>,
    shapes: BTreeMap<String, Vec<usize>>,
    device: Device,
    nets: Networks,
    version: u64,
}

impl ActingNetworks {
    /// Instantiates the roles from the initial snapshot.
    pub fn build(
        roles: BTreeMap<String, RoleSpec>,
        params: &ParamSet,
        device: Device,
    ) -> Result<Self> {
        let nets = Networks::from_params(&roles, params, &device)?;
        Ok(Self {
            shapes: params.shapes(),
            version: params.version(),
            roles,
            device,
            nets,
        })
    }

    /// Replaces the networks with ones built from `params`.
    ///
    /// The snapshot must have the names and shapes of the initial one.
    pub fn update(&mut self, params: Arc<ParamSet>) -> Result<()> {
        params.check_shapes(&self.shapes)?;
        self.nets = Networks::from_params(&self.roles, &params, &self.device)?;
        self.version = params.version();
        trace!("Actor loaded parameters of version {}", self.version);
        Ok(())
    }

    /// Current networks.
    pub fn nets(&self) -> &Networks {
        &self.nets
    }

    /// Version of the loaded snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Device the networks run on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Runs the recurrent core `role` for one observation.
    ///
    /// Returns the hidden vector `[1, hidden]` and the next state.
    pub fn core_step(
        &self,
        role: &str,
        obs: &Observation,
        state: &RecurrentState,
    ) -> Result<(Tensor, RecurrentState)> {
        let lstm = self.nets.lstm(role)?;
        let dim = lstm.config().hidden_dim;
        let (h, c) = stack_states(std::slice::from_ref(state), dim, &self.device)?;
        let x = Tensor::from_slice(&obs.data, (1, obs.data.len()), &self.device)?;
        let (h, c) = lstm.step(&x, &h, &c)?;
        let next = unstack_state(&h, &c)?;
        Ok((h, next))
    }
}
