//! USFA learner.
use super::{dot, policies_around, UsfaConfig};
use crate::{
    network::{NetworkBundle, Networks},
    trainable::TrainableNetworks,
    util::{argmax, masked_mean, mixed_priorities, stack_states, td_targets, to_host},
};
use anyhow::{anyhow, Result};
use cairn_core::{
    params::ParamSet,
    record::{Record, RecordValue},
    replay_buffer::{Column, SequenceBatch},
    Learner, LearnerUpdate, TemporalContract,
};
use candle_core::{Tensor, D};
use rand::{rngs::SmallRng, SeedableRng};
use std::{path::Path, sync::Arc};

/// Loss of one batch with the diagnostics of its parts.
pub(super) struct SfLoss {
    pub loss: Tensor,
    pub abs_td: Vec<f32>,
    pub mask: Vec<f32>,
    pub sf_loss: f32,
    pub q_loss: f32,
    pub reward_error: f32,
    pub sf_mean: f32,
}

/// Trains the `core` and `successor_features` roles.
pub struct UsfaLearner {
    config: UsfaConfig,
    contract: TemporalContract,
    nets: TrainableNetworks,
    task_dim: usize,
    rng: SmallRng,
}

fn column<'a>(batch: &'a SequenceBatch, key: &str) -> Result<&'a Column> {
    batch
        .extra(key)
        .ok_or_else(|| anyhow!("batch has no extra '{}'", key))
}

impl UsfaLearner {
    /// Takes ownership of the networks.
    pub fn build(
        config: UsfaConfig,
        contract: TemporalContract,
        bundle: NetworkBundle,
        task_dim: usize,
    ) -> Result<Self> {
        let nets = TrainableNetworks::build(bundle, &config.opt_config, &config.common)?;
        let rng = SmallRng::seed_from_u64(config.common.seed.wrapping_add(1));
        Ok(Self {
            config,
            contract,
            nets,
            task_dim,
            rng,
        })
    }

    /// Policy vectors `[batch, seq_len, n_policies, task_dim]`.
    ///
    /// The perturbations are drawn once per window, so a step and the step
    /// it bootstraps from share the policies.
    pub(super) fn sample_policies(&mut self, batch: &SequenceBatch) -> Result<Vec<f32>> {
        let (b, t, c) = (batch.batch_size, batch.seq_len, self.task_dim);
        let n = self.config.num_train_policies();
        let task = column(batch, "task")?;
        let mut out = Vec::with_capacity(b * t * n * c);
        for bi in 0..b {
            let noise = policies_around(
                &vec![0f32; c],
                self.config.nsamples,
                self.config.variance,
                &mut self.rng,
            );
            for ti in 0..t {
                let w = task.at(t, bi, ti);
                out.extend(noise.chunks(c).map(|e| shifted(w, e)).flatten());
            }
        }
        Ok(out)
    }

    /// Successor features `[batch, seq_len, n_policies, num_actions, task_dim]`.
    fn successor_features(
        &self,
        nets: &Networks,
        batch: &SequenceBatch,
        policies: &Tensor,
    ) -> Result<Tensor> {
        let dev = self.nets.device();
        let (b, t, d) = (batch.batch_size, batch.seq_len, batch.obs_dim);
        let (n, h_dim) = (policies.dim(2)?, self.config.common.state_dim);
        let obs = Tensor::from_slice(&batch.obs, (b, t, d), dev)?;
        let (h, c) = stack_states(&batch.initial_state, h_dim, dev)?;
        let hs = nets
            .lstm("core")?
            .unroll(&obs, &h, &c, self.config.common.burn_in_length)?
            .unsqueeze(2)?
            .broadcast_as((b, t, n, h_dim))?
            .contiguous()?;
        let x = Tensor::cat(&[&hs, policies], 3)?;
        let sf = nets.mlp("successor_features")?.forward(&x)?;
        Ok(sf.reshape((b, t, n, self.contract.num_actions, self.task_dim))?)
    }

    pub(super) fn loss(&self, batch: &SequenceBatch, policies: &[f32]) -> Result<SfLoss> {
        let dev = self.nets.device();
        let (b, t) = (batch.batch_size, batch.seq_len);
        let (a, c) = (self.contract.num_actions, self.task_dim);
        let n = policies.len() / (b * t * c);
        let cumulant = column(batch, "cumulant")?;
        let task = column(batch, "task")?;

        let z = Tensor::from_slice(policies, (b, t, n, c), dev)?;
        let sf = self.successor_features(self.nets.nets(), batch, &z)?;
        let sf_online = to_host(&sf)?;
        let sf_target = to_host(&self.successor_features(self.nets.target_nets(), batch, &z)?)?;

        let sf_ix =
            |bi: usize, j: usize, ni: usize, ai: usize| ((((bi * t + j) * n + ni) * a) + ai) * c;
        // double-Q: the online features pick the bootstrap action of policy z
        let selector = |bi: usize, j: usize, ni: usize| {
            let k = ((bi * t + j) * n + ni) * c;
            let zz = &policies[k..k + c];
            let q = (0..a)
                .map(|ai| {
                    let k = sf_ix(bi, j, ni, ai);
                    dot(&sf_online[k..k + c], zz)
                })
                .collect::<Vec<_>>();
            argmax(&q)
        };

        let mut target = vec![0f32; b * t * n * c];
        let mut q_target = vec![0f32; b * t];
        let mut mask = vec![0f32; b * t];
        let targets = td_targets(
            batch,
            self.config.common.burn_in_length,
            self.config.n_step,
            self.config.common.discount,
        );
        for (i, nt) in targets.into_iter().enumerate() {
            let nt = match nt {
                Some(nt) => nt,
                None => continue,
            };
            let bi = i / t;
            mask[i] = 1.0;
            for ni in 0..n {
                let row = &mut target[(i * n + ni) * c..(i * n + ni + 1) * c];
                for &(s, w) in nt.terms.iter() {
                    for (y, phi) in row.iter_mut().zip(cumulant.at(t, bi, s)) {
                        *y += w * phi;
                    }
                }
                if let Some((j, w)) = nt.bootstrap {
                    let k = sf_ix(bi, j, ni, selector(bi, j, ni));
                    for (y, psi) in row.iter_mut().zip(&sf_target[k..k + c]) {
                        *y += w * psi;
                    }
                }
            }
            let mut g: f32 = nt.terms.iter().map(|&(s, w)| w * batch.reward[bi * t + s]).sum();
            if let Some((j, w)) = nt.bootstrap {
                let k = sf_ix(bi, j, 0, selector(bi, j, 0));
                g += w * dot(&sf_target[k..k + c], task.at(t, bi, j));
            }
            q_target[i] = g;
        }

        // features of the taken actions, [B, T, N, C]
        let action = Tensor::from_slice(&batch.action, (b, t, 1, 1, 1), dev)?
            .broadcast_as((b, t, n, 1, c))?
            .contiguous()?;
        let pred = sf.gather(&action, 3)?.squeeze(3)?;
        let pred_host = to_host(&pred)?;
        let abs_td = pred_host
            .chunks(n * c)
            .zip(target.chunks(n * c))
            .map(|(p, y)| {
                p.iter().zip(y.iter()).map(|(p, y)| (p - y).abs()).sum::<f32>() / (n * c) as f32
            })
            .collect::<Vec<_>>();

        let target_t = Tensor::from_vec(target, (b, t, n, c), dev)?;
        let mask_t = Tensor::from_slice(&mask, (b, t), dev)?;
        let weight = match &batch.weight {
            Some(w) => Some(Tensor::from_slice(w, (b, 1), dev)?),
            None => None,
        };
        let weighted = |x: Tensor| -> Result<Tensor> {
            match &weight {
                Some(w) => Ok(x.broadcast_mul(w)?),
                None => Ok(x),
            }
        };

        let sf_elem = (&pred - &target_t)?
            .sqr()?
            .mean(D::Minus1)?
            .mean(D::Minus1)?
            .affine(0.5, 0.0)?;
        let sf_loss = masked_mean(&weighted(sf_elem)?, &mask_t)?;

        let (loss, q_loss) = if self.config.q_coeff > 0.0 {
            let w_t = Tensor::from_slice(&task.data, (b, t, c), dev)?;
            let q_pred = (pred.narrow(2, 0, 1)?.squeeze(2)? * w_t)?.sum(D::Minus1)?;
            let q_target_t = Tensor::from_slice(&q_target, (b, t), dev)?;
            let q_elem = (q_pred - q_target_t)?.sqr()?.affine(0.5, 0.0)?;
            let q_loss = masked_mean(&weighted(q_elem)?, &mask_t)?;
            let loss = (&sf_loss + q_loss.affine(self.config.q_coeff as f64, 0.0)?)?;
            (loss, q_loss.to_scalar::<f32>()?)
        } else {
            (sf_loss.clone(), 0.0)
        };

        // how far the reward is from cumulant . task on real steps
        let n_real = batch.mask.iter().sum::<f32>().max(1.0);
        let reward_error = (0..b * t)
            .filter(|&i| batch.mask[i] > 0.0)
            .map(|i| {
                let (bi, ti) = (i / t, i % t);
                (batch.reward[i] - dot(cumulant.at(t, bi, ti), task.at(t, bi, ti))).abs()
            })
            .sum::<f32>()
            / n_real;
        let sf_mean = sf_online.iter().sum::<f32>() / sf_online.len().max(1) as f32;

        Ok(SfLoss {
            sf_loss: sf_loss.to_scalar::<f32>()?,
            loss,
            abs_td,
            mask,
            q_loss,
            reward_error,
            sf_mean,
        })
    }
}

fn shifted(w: &[f32], e: &[f32]) -> Vec<f32> {
    w.iter().zip(e.iter()).map(|(w, e)| w + e).collect()
}

impl Learner for UsfaLearner {
    fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    fn update(&mut self, batch: &SequenceBatch) -> Result<LearnerUpdate> {
        let policies = self.sample_policies(batch)?;
        let SfLoss {
            loss,
            abs_td,
            mask,
            sf_loss,
            q_loss,
            reward_error,
            sf_mean,
        } = self.loss(batch, &policies)?;
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
            ("sf_loss", RecordValue::Scalar(sf_loss)),
            ("q_loss", RecordValue::Scalar(q_loss)),
            ("reward_error", RecordValue::Scalar(reward_error)),
            ("sf_mean", RecordValue::Scalar(sf_mean)),
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
