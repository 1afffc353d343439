//! USFA actor.
use super::{dot, policies_around, TaskSupport, UsfaConfig};
use crate::{
    acting::ActingNetworks,
    explorer::Explorer,
    network::RoleSpec,
    util::{argmax, to_host},
};
use anyhow::{anyhow, Result};
use cairn_core::{
    params::ParamSet, Actor, ActorOutput, Extras, Observation, RecurrentState, TemporalContract,
};
use candle_core::{Device, Tensor};
use rand::{rngs::SmallRng, SeedableRng};
use std::{collections::BTreeMap, sync::Arc};

/// Acts greedily, or with the explorer in training mode, on the generalized
/// policy improvement of the successor features.
///
/// The task vector is read from the observation aux `task` and stored in the
/// extras of the step.
pub struct UsfaActor {
    contract: TemporalContract,
    explorer: Explorer,
    nets: ActingNetworks,
    state_dim: usize,
    task_dim: usize,
    nsamples: usize,
    variance: f32,
    eval_task_support: TaskSupport,
    train_tasks: Vec<Vec<f32>>,
    train: bool,
    rng: SmallRng,
}

impl UsfaActor {
    /// Builds the actor from the initial snapshot of the learner.
    pub fn build(
        config: &UsfaConfig,
        contract: TemporalContract,
        roles: BTreeMap<String, RoleSpec>,
        params: &ParamSet,
        device: Device,
        task_dim: usize,
    ) -> Result<Self> {
        Ok(Self {
            contract,
            explorer: config.explorer.clone(),
            nets: ActingNetworks::build(roles, params, device)?,
            state_dim: config.common.state_dim,
            task_dim,
            nsamples: config.nsamples,
            variance: config.variance,
            eval_task_support: config.eval_task_support,
            train_tasks: config.train_tasks.clone(),
            train: true,
            rng: SmallRng::seed_from_u64(config.common.seed),
        })
    }

    /// Policies to maximize over for `task`, flattened to `[n, task_dim]`.
    fn policies(&mut self, task: &[f32]) -> Vec<f32> {
        if self.train {
            return policies_around(task, self.nsamples, self.variance, &mut self.rng);
        }
        let train_tasks = self.train_tasks.iter().flatten().copied();
        match self.eval_task_support {
            TaskSupport::Train => train_tasks.collect(),
            TaskSupport::Eval => task.to_vec(),
            TaskSupport::TrainEval => train_tasks.chain(task.iter().copied()).collect(),
        }
    }

    /// `max_z psi(s, a, z) . task` over the given policies for every action.
    pub fn gpi_q_values(&self, h: &Tensor, policies: &[f32], task: &[f32]) -> Result<Vec<f32>> {
        let (c, a) = (self.task_dim, self.contract.num_actions);
        let n = policies.len() / c;
        let hs = h.broadcast_as((n, self.state_dim))?.contiguous()?;
        let z = Tensor::from_slice(policies, (n, c), self.nets.device())?;
        let x = Tensor::cat(&[&hs, &z], 1)?;
        let sf = to_host(&self.nets.nets().mlp("successor_features")?.forward(&x)?)?;

        let mut q = vec![f32::NEG_INFINITY; a];
        for psi in sf.chunks(a * c) {
            for (ai, q) in q.iter_mut().enumerate() {
                *q = q.max(dot(&psi[ai * c..(ai + 1) * c], task));
            }
        }
        Ok(q)
    }
}

impl Actor for UsfaActor {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn initial_state(&self) -> RecurrentState {
        RecurrentState::zeros(2, self.state_dim)
    }

    fn select_action(&mut self, obs: &Observation, state: &RecurrentState) -> Result<ActorOutput> {
        self.contract.check_state(state)?;
        let task = match obs.aux.get("task") {
            Some(w) if w.len() == self.task_dim => w.clone(),
            _ => return Err(anyhow!("observation has no task vector of length {}", self.task_dim)),
        };

        let (h, state) = self.nets.core_step("core", obs, state)?;
        let policies = self.policies(&task);
        let q = self.gpi_q_values(&h, &policies, &task)?;
        let action = match self.train {
            true => self.explorer.action(&q, &mut self.rng),
            false => argmax(&q),
        };

        let mut extras = Extras::new();
        extras.insert("task".to_string(), task);
        Ok(ActorOutput { action, state, extras })
    }

    fn update_params(&mut self, params: Arc<ParamSet>) -> Result<()> {
        self.nets.update(params)
    }

    fn params_version(&self) -> u64 {
        self.nets.version()
    }

    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }
}
