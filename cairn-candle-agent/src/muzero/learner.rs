//! MuZero learner.
use super::{
    network::{dynamics, one_hot},
    MuZeroConfig,
};
use crate::{
    discretizer::Discretizer,
    network::NetworkBundle,
    trainable::TrainableNetworks,
    util::{masked_mean, mixed_priorities, scale_gradient, stack_states, to_host},
};
use anyhow::{anyhow, Result};
use cairn_core::{
    params::ParamSet,
    record::{Record, RecordValue},
    replay_buffer::{Column, SequenceBatch},
    Learner, LearnerUpdate, TemporalContract,
};
use candle_core::{Tensor, D};
use candle_nn::ops::log_softmax;
use std::{path::Path, sync::Arc};

/// Loss of one batch with the diagnostics of its parts.
pub(super) struct MzLoss {
    pub loss: Tensor,
    pub abs_td: Vec<f32>,
    pub mask: Vec<f32>,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub reward_loss: f32,
}

/// Trains the model by unrolling the dynamics along the stored actions.
///
/// From each step of a window the latent state is unrolled
/// `simulation_steps` times. Every unrolled state predicts the stored search
/// policy and the value target of the step it lands on, and every state
/// reached through the dynamics predicts the reward of the action taken.
pub struct MuZeroLearner {
    config: MuZeroConfig,
    contract: TemporalContract,
    nets: TrainableNetworks,
    discretizer: Discretizer,
}

fn column<'a>(batch: &'a SequenceBatch, key: &str) -> Result<&'a Column> {
    batch
        .extra(key)
        .ok_or_else(|| anyhow!("batch has no extra '{}'", key))
}

/// Value targets of all steps in `[batch_size, seq_len]` order.
///
/// `td_steps` rewards are summed and the stored search value of the step
/// after them is added. The sum stops at a terminal step. When the real
/// steps of the window end first, the return bootstraps from the stored value
/// of the last real step instead. Padding has no target.
pub(super) fn value_targets(
    batch: &SequenceBatch,
    td_steps: usize,
    discount: f32,
) -> Result<Vec<Option<f32>>> {
    let value = column(batch, "value")?;
    let t_len = batch.seq_len;
    let visible = |b: usize, i: usize| i < t_len && batch.mask[batch.ix(b, i)] == 1f32;

    let mut out = Vec::with_capacity(batch.batch_size * t_len);
    for b in 0..batch.batch_size {
        for u in 0..t_len {
            if !visible(b, u) {
                out.push(None);
                continue;
            }
            let (mut g, mut disc) = (0f32, 1f32);
            let mut target = None;
            for k in 0..td_steps {
                let i = u + k;
                let ix = batch.ix(b, i);
                if batch.terminated[ix] == 1f32 {
                    target = Some(g + disc * batch.reward[ix]);
                    break;
                }
                if !visible(b, i + 1) {
                    target = Some(g + disc * value.at(t_len, b, i)[0]);
                    break;
                }
                g += disc * batch.reward[ix];
                disc *= discount;
            }
            out.push(Some(match target {
                Some(z) => z,
                None => g + disc * value.at(t_len, b, u + td_steps)[0],
            }));
        }
    }
    Ok(out)
}

/// Data of the step `k` steps after every step of the batch, `dim` values
/// each and zero past the window.
fn shifted(
    batch: &SequenceBatch,
    k: usize,
    dim: usize,
    f: impl Fn(usize, usize) -> Vec<f32>,
) -> Vec<f32> {
    let (b, t) = (batch.batch_size, batch.seq_len);
    let mut out = vec![0f32; b * t * dim];
    for i in 0..b * t {
        let (bi, ti) = (i / t, i % t);
        if ti + k < t {
            out[i * dim..(i + 1) * dim].copy_from_slice(&f(bi, ti + k));
        }
    }
    out
}

/// Cross entropy of logits `[.., n]` against target distributions.
fn cross_entropy(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    Ok((target * log_softmax(logits, D::Minus1)?)?.sum(D::Minus1)?.neg()?)
}

impl MuZeroLearner {
    /// Takes ownership of the networks.
    pub fn build(
        config: MuZeroConfig,
        contract: TemporalContract,
        bundle: NetworkBundle,
    ) -> Result<Self> {
        let nets = TrainableNetworks::build(bundle, &config.opt_config, &config.common)?;
        let discretizer = config.discretizer();
        Ok(Self {
            config,
            contract,
            nets,
            discretizer,
        })
    }

    pub(super) fn loss(&self, batch: &SequenceBatch) -> Result<MzLoss> {
        let dev = self.nets.device();
        let nets = self.nets.nets();
        let (b, t, d) = (batch.batch_size, batch.seq_len, batch.obs_dim);
        let (a, bins) = (self.contract.num_actions, self.discretizer.num_bins());
        let burn_in = self.config.common.burn_in_length;
        let policy = column(batch, "policy")?;
        let values = value_targets(batch, self.config.td_steps, self.config.common.discount)?;

        // steps the unrolls start from
        let start = (0..b * t)
            .map(|i| i % t >= burn_in && batch.mask[i] == 1f32)
            .collect::<Vec<_>>();
        // mask of the step reached after k actions from each start
        let reached = |k: usize| -> Vec<f32> {
            (0..b * t)
                .map(|i| {
                    let (bi, ti) = (i / t, i % t);
                    let ok = start[i] && ti + k < t && batch.mask[batch.ix(bi, ti + k)] == 1f32;
                    if ok {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect()
        };
        let weight = match &batch.weight {
            Some(w) => Some(Tensor::from_slice(w, (b, 1), dev)?),
            None => None,
        };
        let masked = |x: Tensor, mask: &[f32]| -> Result<Tensor> {
            let x = match &weight {
                Some(w) => x.broadcast_mul(w)?,
                None => x,
            };
            masked_mean(&x, &Tensor::from_slice(mask, (b, t), dev)?)
        };
        let obs = Tensor::from_slice(&batch.obs, (b, t, d), dev)?;
        let (h, c) = stack_states(&batch.initial_state, self.config.common.state_dim, dev)?;
        let hs = nets.lstm("core")?.unroll(&obs, &h, &c, burn_in)?;
        let mut latent = nets.mlp("representation")?.forward(&hs)?;

        let k_max = self.config.simulation_steps;
        let (mut policy_loss, mut value_loss, mut reward_loss) = (None, None, None);
        let mut abs_td = vec![0f32; b * t];
        let mask0 = reached(0);
        let add = |acc: Option<Tensor>, x: Tensor| -> Result<Option<Tensor>> {
            match acc {
                Some(acc) => Ok(Some((acc + x)?)),
                None => Ok(Some(x)),
            }
        };

        for k in 0..=k_max {
            let mask_k = reached(k);
            if k > 0 {
                let actions = (0..b * t)
                    .map(|i| match i % t + k - 1 < t {
                        true => batch.action[i + k - 1] as usize,
                        false => 0,
                    })
                    .collect::<Vec<_>>();
                let action = one_hot(&actions, a, dev)?.reshape((b, t, a))?;
                latent =
                    scale_gradient(&dynamics(nets, &latent, &action)?, self.config.scale_grad)?;

                let rewards =
                    shifted(batch, k - 1, 1, |bi, ti| vec![batch.reward[batch.ix(bi, ti)]]);
                let target =
                    Tensor::from_vec(self.discretizer.two_hot(&rewards), (b, t, bins), dev)?;
                let logits = nets.mlp("reward")?.forward(&latent)?;
                let step_loss = masked(cross_entropy(&logits, &target)?, &reached(k - 1))?;
                reward_loss = add(reward_loss, step_loss)?;
            }

            let target = shifted(batch, k, a, |bi, ti| policy.at(t, bi, ti).to_vec());
            let target = Tensor::from_vec(target, (b, t, a), dev)?;
            let logits = nets.mlp("policy")?.forward(&latent)?;
            policy_loss = add(policy_loss, masked(cross_entropy(&logits, &target)?, &mask_k)?)?;

            let z = shifted(batch, k, 1, |bi, ti| vec![values[batch.ix(bi, ti)].unwrap_or(0.0)]);
            let target = Tensor::from_vec(self.discretizer.two_hot(&z), (b, t, bins), dev)?;
            let logits = nets.mlp("value")?.forward(&latent)?;
            value_loss = add(value_loss, masked(cross_entropy(&logits, &target)?, &mask_k)?)?;

            if k == 0 {
                let v = to_host(&self.discretizer.logits_to_scalar(&logits, dev)?)?;
                for (e, (v, z)) in abs_td.iter_mut().zip(v.iter().zip(z.iter())) {
                    *e = (v - z).abs();
                }
            }
        }

        let scale = 1.0 / (k_max + 1) as f64;
        let zero = || Tensor::new(0f32, dev);
        let policy_loss = policy_loss.map_or_else(zero, Ok)?.affine(scale, 0.0)?;
        let value_loss = value_loss.map_or_else(zero, Ok)?.affine(scale, 0.0)?;
        let reward_loss = reward_loss.map_or_else(zero, Ok)?.affine(scale, 0.0)?;
        let loss = ((policy_loss.affine(self.config.policy_coeff as f64, 0.0)?
            + value_loss.affine(self.config.value_coeff as f64, 0.0)?)?
            + reward_loss.affine(self.config.reward_coeff as f64, 0.0)?)?;

        Ok(MzLoss {
            loss,
            abs_td,
            mask: mask0,
            policy_loss: policy_loss.to_scalar::<f32>()?,
            value_loss: value_loss.to_scalar::<f32>()?,
            reward_loss: reward_loss.to_scalar::<f32>()?,
        })
    }
}

impl Learner for MuZeroLearner {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn update(&mut self, batch: &SequenceBatch) -> Result<LearnerUpdate> {
        let MzLoss {
            loss,
            abs_td,
            mask,
            policy_loss,
            value_loss,
            reward_loss,
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
            ("policy_loss", RecordValue::Scalar(policy_loss)),
            ("value_loss", RecordValue::Scalar(value_loss)),
            ("reward_loss", RecordValue::Scalar(reward_loss)),
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
