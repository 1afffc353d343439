//! Networks owned by a learner: online parameters, optimizer and target copy.
use crate::{
    network::{NetworkBundle, Networks},
    opt::{Optimizer, OptimizerConfig},
    util::{check_finite, clip_grad_norm, track},
    CommonConfig,
};
use anyhow::Result;
use cairn_core::params::ParamSet;
use candle_core::{Device, Tensor};
use log::{debug, info};
use std::{path::Path, sync::Arc};

const PARAMS_FILE: &str = "params.safetensors";
const TARGET_PARAMS_FILE: &str = "target_params.safetensors";

/// Online networks trained by one optimizer, with target networks copied from
/// them every `target_update_period` updates.
pub struct TrainableNetworks {
    bundle: NetworkBundle,
    nets: Networks,
    target: NetworkBundle,
    target_nets: Networks,
    opt: Optimizer,
    max_grad_norm: f64,
    target_update_period: usize,
    n_updates: usize,
}

impl TrainableNetworks {
    /// Takes ownership of a bundle and builds the optimizer over all of its
    /// variables.
    pub fn build(
        bundle: NetworkBundle,
        opt_config: &OptimizerConfig,
        common: &CommonConfig,
    ) -> Result<Self> {
        let nets = bundle.networks()?;
        let target = bundle.duplicate()?;
        let target_nets = target.networks()?;
        let opt = opt_config
            .clone()
            .learning_rate(common.learning_rate)
            .build(bundle.varmap().all_vars())?;
        Ok(Self {
            bundle,
            nets,
            target,
            target_nets,
            opt,
            max_grad_norm: common.max_grad_norm,
            target_update_period: common.target_update_period.max(1),
            n_updates: 0,
        })
    }

    /// Online networks.
    pub fn nets(&self) -> &Networks {
        &self.nets
    }

    /// Target networks.
    pub fn target_nets(&self) -> &Networks {
        &self.target_nets
    }

    /// Device of the parameters.
    pub fn device(&self) -> &Device {
        self.bundle.device()
    }

    /// The owned bundle.
    pub fn bundle(&self) -> &NetworkBundle {
        &self.bundle
    }

    /// Number of applied updates.
    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    /// One optimizer step on `loss`. Returns the loss value and the gradient
    /// norm before clipping.
    ///
    /// Fails with a divergence error, leaving the parameters untouched, if
    /// either is non-finite.
    pub fn step(&mut self, loss: &Tensor) -> Result<(f32, f32)> {
        let loss_v = loss.to_scalar::<f32>()?;
        let mut grads = loss.backward()?;
        let vars = self.bundle.varmap().all_vars();
        let grad_norm = clip_grad_norm(&mut grads, &vars, self.max_grad_norm)?;
        check_finite(self.n_updates + 1, loss_v, grad_norm)?;
        self.opt.step(&grads)?;
        self.n_updates += 1;

        if self.n_updates % self.target_update_period == 0 {
            track(self.target.varmap(), self.bundle.varmap(), 1.0)?;
            debug!("Updated target networks at update {}", self.n_updates);
        }
        Ok((loss_v, grad_norm))
    }

    /// Snapshot of the online parameters, versioned by the update count.
    pub fn snapshot(&self) -> Result<Arc<ParamSet>> {
        Ok(Arc::new(self.bundle.snapshot(self.n_updates as u64)?))
    }

    /// Saves online and target parameters into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.bundle.save(dir.join(PARAMS_FILE))?;
        self.target.save(dir.join(TARGET_PARAMS_FILE))?;
        Ok(())
    }

    /// Loads parameters saved by [`TrainableNetworks::save`].
    ///
    /// The optimizer state is not part of the files and starts afresh.
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        self.bundle.load(dir.join(PARAMS_FILE))?;
        let target = dir.join(TARGET_PARAMS_FILE);
        if target.exists() {
            self.target.load(target)?;
        } else {
            info!("No target parameters in {:?}, copying the online ones", dir);
            track(self.target.varmap(), self.bundle.varmap(), 1.0)?;
        }
        Ok(())
    }
}
