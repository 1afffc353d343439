//! Q-learning learner.
use super::QLearningConfig;
use crate::{
    network::{NetworkBundle, Networks},
    trainable::TrainableNetworks,
    util::{argmax, masked_mean, mixed_priorities, stack_states, td_targets, to_host},
};
use anyhow::Result;
use cairn_core::{
    params::ParamSet,
    record::{Record, RecordValue},
    replay_buffer::SequenceBatch,
    Learner, LearnerUpdate, TemporalContract,
};
use candle_core::{Tensor, D};
use std::{path::Path, sync::Arc};

/// Loss of one batch with what is needed besides the gradient.
pub(super) struct QLoss {
    pub loss: Tensor,
    pub abs_td: Vec<f32>,
    pub mask: Vec<f32>,
    pub q_mean: f32,
}

/// Trains the `core` and `value` roles with n-step double-Q targets.
pub struct QLearningLearner {
    config: QLearningConfig,
    contract: TemporalContract,
    nets: TrainableNetworks,
}

impl QLearningLearner {
    /// Takes ownership of the networks.
    pub fn build(
        config: QLearningConfig,
        contract: TemporalContract,
        bundle: NetworkBundle,
    ) -> Result<Self> {
        let nets = TrainableNetworks::build(bundle, &config.opt_config, &config.common)?;
        Ok(Self {
            config,
            contract,
            nets,
        })
    }

    /// Action values `[batch, seq_len, num_actions]` along the windows.
    fn q_values(&self, nets: &Networks, batch: &SequenceBatch) -> Result<Tensor> {
        let dev = self.nets.device();
        let (b, t, d) = (batch.batch_size, batch.seq_len, batch.obs_dim);
        let obs = Tensor::from_slice(&batch.obs, (b, t, d), dev)?;
        let (h, c) = stack_states(&batch.initial_state, self.config.common.state_dim, dev)?;
        let hs = nets
            .lstm("core")?
            .unroll(&obs, &h, &c, self.config.common.burn_in_length)?;
        nets.mlp("value")?.forward(&hs)
    }

    pub(super) fn loss(&self, batch: &SequenceBatch) -> Result<QLoss> {
        let dev = self.nets.device();
        let (b, t) = (batch.batch_size, batch.seq_len);
        let n_actions = self.contract.num_actions;
        let discount = self.config.common.discount;

        let q = self.q_values(self.nets.nets(), batch)?;
        let q_online = to_host(&q)?;
        let q_target = to_host(&self.q_values(self.nets.target_nets(), batch)?)?;

        let bootstrap = |bi: usize, j: usize| {
            let k = (bi * t + j) * n_actions;
            let a = match self.config.double_q {
                true => argmax(&q_online[k..k + n_actions]),
                false => argmax(&q_target[k..k + n_actions]),
            };
            q_target[k + a]
        };

        let mut target = vec![0f32; b * t];
        let mut mask = vec![0f32; b * t];
        let targets = td_targets(
            batch,
            self.config.common.burn_in_length,
            self.config.n_step,
            discount,
        );
        for (i, nt) in targets.into_iter().enumerate() {
            if let Some(nt) = nt {
                let bi = i / t;
                let mut g: f32 = nt.terms.iter().map(|&(s, w)| w * batch.reward[bi * t + s]).sum();
                if let Some((j, w)) = nt.bootstrap {
                    g += w * bootstrap(bi, j);
                }
                target[i] = g;
                mask[i] = 1.0;
            }
        }

        let action = Tensor::from_slice(&batch.action, (b, t, 1), dev)?;
        let pred = q.gather(&action, D::Minus1)?.squeeze(D::Minus1)?;
        let pred_host = to_host(&pred)?;
        let target_t = Tensor::from_slice(&target, (b, t), dev)?;
        let mask_t = Tensor::from_slice(&mask, (b, t), dev)?;

        let mut elem = self.config.critic_loss.elementwise(&pred, &target_t)?;
        if let Some(w) = &batch.weight {
            elem = elem.broadcast_mul(&Tensor::from_slice(w, (b, 1), dev)?)?;
        }
        let loss = masked_mean(&elem, &mask_t)?;

        let abs_td = pred_host
            .iter()
            .zip(target.iter())
            .map(|(p, g)| (p - g).abs())
            .collect::<Vec<_>>();
        let n_valid = mask.iter().sum::<f32>().max(1.0);
        let q_mean = pred_host.iter().zip(mask.iter()).map(|(p, m)| p * m).sum::<f32>() / n_valid;

        Ok(QLoss {
            loss,
            abs_td,
            mask,
            q_mean,
        })
    }
}

impl Learner for QLearningLearner {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn update(&mut self, batch: &SequenceBatch) -> Result<LearnerUpdate> {
        let QLoss {
            loss,
            abs_td,
            mask,
            q_mean,
        } = self.loss(batch)?;
        let (loss, grad_norm) = self.nets.step(&loss)?;
        let priorities = mixed_priorities(
            &abs_td,
            &mask,
            batch.seq_len,
            self.config.max_priority_weight,
        );

        let record = Record::from_slice(&[
            ("loss", RecordValue::Scalar(loss)),
            ("grad_norm", RecordValue::Scalar(grad_norm)),
            ("q_mean", RecordValue::Scalar(q_mean)),
            ("n_valid", RecordValue::Scalar(mask.iter().sum::<f32>())),
        ]);

        Ok(LearnerUpdate {
            params: self.nets.snapshot()?,
            record,
            priorities: Some(priorities),
        })
    }

    fn params(&self) -> Result<Arc<ParamSet>> {
        self.nets.snapshot()
    }

    fn n_updates(&self) -> usize {
        self.nets.n_updates()
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        self.nets.save(path)
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.nets.load(path)
    }
}
