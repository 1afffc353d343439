//! Utilities.
use anyhow::{anyhow, Result};
use cairn_core::{error::CairnError, replay_buffer::SequenceBatch, RecurrentState};
use candle_core::{backprop::GradStore, DType, Device, Tensor, Var};
use candle_nn::VarMap;
use log::trace;
use ordered_float::OrderedFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Critic loss type.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum CriticLoss {
    /// Mean squared error.
    Mse,

    /// Smooth L1 loss.
    SmoothL1,
}

impl CriticLoss {
    /// Elementwise loss, reduced by the caller with a mask.
    pub fn elementwise(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        let d = (pred - target)?;
        match self {
            Self::Mse => Ok(d.sqr()?),
            Self::SmoothL1 => Ok(smooth_l1(&d)?),
        }
    }
}

/// See <https://pytorch.org/docs/stable/generated/torch.nn.SmoothL1Loss.html>.
fn smooth_l1(d: &Tensor) -> Result<Tensor, candle_core::Error> {
    let d = d.abs()?;
    let m1 = d.lt(1.0)?.to_dtype(DType::F32)?;
    let m2 = m1.affine(-1.0, 1.0)?;
    (m1.affine(0.5, 0.0)? * d.sqr()?)? + (m2 * d.affine(1.0, -0.5)?)?
}

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("dest");
    let dest = dest.data().lock().map_err(|e| anyhow!("{}", e))?;
    trace!("src");
    let src = src.data().lock().map_err(|e| anyhow!("{}", e))?;

    for (k_dest, v_dest) in dest.iter() {
        let v_src = src
            .get(k_dest)
            .ok_or_else(|| anyhow!("variable '{}' is missing in the source", k_dest))?;
        let t_dest =
            (v_src.as_tensor().affine(tau, 0.0)? + v_dest.as_tensor().affine(1.0 - tau, 0.0)?)?;
        v_dest.set(&t_dest)?;
    }

    Ok(())
}

/// Sum of `x * mask` divided by the number of unmasked elements.
///
/// Masked elements are excluded from the denominator; an all-zero mask gives
/// zero.
pub fn masked_mean(x: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let n = mask.sum_all()?.to_scalar::<f32>()?;
    let s = (x * mask)?.sum_all()?;
    Ok(s.affine(1.0 / n.max(1.0) as f64, 0.0)?)
}

/// Returns the global norm of the gradients of `vars` and rescales them in
/// place when it exceeds `max_norm`.
///
/// A non-positive `max_norm` disables rescaling.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f32> {
    let mut sq = 0f32;
    for v in vars.iter() {
        if let Some(g) = grads.get(v.as_tensor()) {
            sq += g.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let norm = sq.sqrt();

    if max_norm > 0.0 && norm.is_finite() && norm as f64 > max_norm {
        let s = max_norm / (norm as f64 + 1e-6);
        for v in vars.iter() {
            if let Some(g) = grads.remove(v.as_tensor()) {
                grads.insert(v.as_tensor(), g.affine(s, 0.0)?);
            }
        }
    }
    Ok(norm)
}

/// Scales the gradient flowing through `x` by `s` and keeps its value.
pub fn scale_gradient(x: &Tensor, s: f64) -> Result<Tensor> {
    Ok((x.affine(s, 0.0)? + x.detach().affine(1.0 - s, 0.0)?)?)
}

/// Fails with [`CairnError::LearnerDivergence`] unless the loss and the
/// gradient norm are finite.
pub fn check_finite(update: usize, loss: f32, grad_norm: f32) -> Result<(), CairnError> {
    if loss.is_finite() && grad_norm.is_finite() {
        return Ok(());
    }
    Err(CairnError::LearnerDivergence {
        update,
        reason: format!("loss={}, grad_norm={}", loss, grad_norm),
    })
}

/// Index of the first maximum; `0` for an empty slice.
pub fn argmax(xs: &[f32]) -> usize {
    xs.iter()
        .enumerate()
        .max_by_key(|(i, &x)| (OrderedFloat(x), Reverse(*i)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Softmax of a host vector.
pub fn softmax(xs: &[f32]) -> Vec<f32> {
    let m = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let e = xs.iter().map(|x| (x - m).exp()).collect::<Vec<_>>();
    let z: f32 = e.iter().sum();
    e.into_iter().map(|x| x / z).collect()
}

/// Standard normal sample by the Box-Muller transform.
pub fn randn(rng: &mut impl Rng) -> f32 {
    let u1 = rng.gen::<f32>() + 1e-10;
    let u2 = rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

/// Priority of each window from absolute TD errors of shape
/// `[batch_size, seq_len]`: `eta * max + (1 - eta) * mean` over unmasked
/// steps.
pub fn mixed_priorities(abs_td: &[f32], mask: &[f32], seq_len: usize, eta: f32) -> Vec<f32> {
    abs_td
        .chunks(seq_len)
        .zip(mask.chunks(seq_len))
        .map(|(td, m)| {
            let valid = td
                .iter()
                .zip(m.iter())
                .filter(|(_, &m)| m > 0f32)
                .map(|(&d, _)| d)
                .collect::<Vec<_>>();
            if valid.is_empty() {
                return 0f32;
            }
            let max = valid.iter().copied().fold(0f32, f32::max);
            let mean = valid.iter().sum::<f32>() / valid.len() as f32;
            eta * max + (1f32 - eta) * mean
        })
        .collect()
}

/// Terms of an n-step return starting at step `t` of window `b`.
#[derive(Clone, Debug, PartialEq)]
pub struct NStepTarget {
    /// Steps whose reward (or cumulant) enters the return, with their
    /// discount.
    pub terms: Vec<(usize, f32)>,

    /// Step whose value is bootstrapped from, with its discount. `None` when
    /// the episode terminated within the n steps.
    pub bootstrap: Option<(usize, f32)>,
}

/// Computes the terms of the n-step return at `(b, t)`.
///
/// Returns `None` when the return cannot be formed inside the window: `t`
/// is padding, or a step needed for the return or the bootstrap lies past the
/// window or in its padding.
pub fn n_step_target(
    batch: &SequenceBatch,
    b: usize,
    t: usize,
    n: usize,
    discount: f32,
) -> Option<NStepTarget> {
    let mut terms = Vec::with_capacity(n);
    let mut disc = 1f32;
    for k in 0..n {
        let i = t + k;
        if i >= batch.seq_len || batch.mask[batch.ix(b, i)] == 0f32 {
            return None;
        }
        terms.push((i, disc));
        disc *= discount;
        if batch.terminated[batch.ix(b, i)] == 1f32 {
            return Some(NStepTarget {
                terms,
                bootstrap: None,
            });
        }
    }
    let j = t + n;
    if j >= batch.seq_len || batch.mask[batch.ix(b, j)] == 0f32 {
        return None;
    }
    Some(NStepTarget {
        terms,
        bootstrap: Some((j, disc)),
    })
}

/// n-step returns of all steps in `[batch_size, seq_len]` order.
///
/// `None` marks steps excluded from a TD loss: padding, burn-in and steps
/// without a complete return.
pub fn td_targets(
    batch: &SequenceBatch,
    burn_in: usize,
    n: usize,
    discount: f32,
) -> Vec<Option<NStepTarget>> {
    let mut out = Vec::with_capacity(batch.batch_size * batch.seq_len);
    for b in 0..batch.batch_size {
        for t in 0..batch.seq_len {
            if t < burn_in {
                out.push(None);
            } else {
                out.push(n_step_target(batch, b, t, n, discount));
            }
        }
    }
    out
}

/// Stacks the recurrent states of a batch into `(h, c)` of shape
/// `[batch_size, dim]`.
pub fn stack_states(
    states: &[RecurrentState],
    dim: usize,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let n = states.len();
    let mut h = Vec::with_capacity(n * dim);
    let mut c = Vec::with_capacity(n * dim);
    for s in states.iter() {
        match (s.part(0), s.part(1)) {
            (Some(hs), Some(cs)) if hs.len() == dim && cs.len() == dim => {
                h.extend_from_slice(hs);
                c.extend_from_slice(cs);
            }
            _ => {
                return Err(anyhow!(
                    "recurrent state of shape {:?} is not an LSTM state of size {}",
                    s.shape(),
                    dim
                ))
            }
        }
    }
    Ok((
        Tensor::from_vec(h, (n, dim), device)?,
        Tensor::from_vec(c, (n, dim), device)?,
    ))
}

/// Host copy of an LSTM state of batch size 1.
pub fn unstack_state(h: &Tensor, c: &Tensor) -> Result<RecurrentState> {
    Ok(RecurrentState::lstm(
        h.flatten_all()?.to_vec1::<f32>()?,
        c.flatten_all()?.to_vec1::<f32>()?,
    ))
}

/// Flattened host copy of a tensor.
pub fn to_host(t: &Tensor) -> Result<Vec<f32>> {
    Ok(t.detach().flatten_all()?.to_vec1::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::Init;
    use std::collections::BTreeMap;

    fn varmap_with(t: &Tensor) -> Result<VarMap> {
        let vm = VarMap::new();
        let init = Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        };
        vm.get((3,), "var1", init, DType::F32, &Device::Cpu)?;
        vm.data().lock().unwrap().get("var1").unwrap().set(t)?;
        Ok(vm)
    }

    #[test]
    fn test_track() -> Result<()> {
        let tau = 0.7;
        let t_src = Tensor::from_slice(&[1.0f32, 2.0, 3.0], (3,), &Device::Cpu)?;
        let t_dest = Tensor::from_slice(&[4.0f32, 5.0, 6.0], (3,), &Device::Cpu)?;
        let t = ((tau * &t_src)? + (1.0 - tau) * &t_dest)?;

        let vm_src = varmap_with(&t_src)?;
        let vm_dest = varmap_with(&t_dest)?;
        track(&vm_dest, &vm_src, tau)?;

        let t_ = vm_dest
            .data()
            .lock()
            .unwrap()
            .get("var1")
            .unwrap()
            .as_tensor()
            .clone();
        assert!((t - t_)?.abs()?.sum(0)?.to_scalar::<f32>()? < 1e-6);
        Ok(())
    }

    #[test]
    fn test_masked_mean_ignores_masked_elements() -> Result<()> {
        let x = Tensor::from_slice(&[1f32, 3.0, 100.0, -7.0], (2, 2), &Device::Cpu)?;
        let m = Tensor::from_slice(&[1f32, 1.0, 0.0, 0.0], (2, 2), &Device::Cpu)?;
        assert_eq!(masked_mean(&x, &m)?.to_scalar::<f32>()?, 2.0);
        let zero = Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?;
        assert_eq!(masked_mean(&x, &zero)?.to_scalar::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn test_argmax_takes_first_maximum() {
        assert_eq!(argmax(&[0.5, 2.0, 2.0, -1.0]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_mixed_priorities() {
        let td = [1f32, 3.0, 9.0, 2.0, 2.0, 2.0];
        let mask = [1f32, 1.0, 0.0, 1.0, 1.0, 1.0];
        let p = mixed_priorities(&td, &mask, 3, 0.9);
        assert!((p[0] - (0.9 * 3.0 + 0.1 * 2.0)).abs() < 1e-6);
        assert!((p[1] - 2.0).abs() < 1e-6);
    }

    fn batch(seq_len: usize, terminated_at: Option<usize>, valid: usize) -> SequenceBatch {
        let mut batch = SequenceBatch::zeros(1, seq_len, 1, &BTreeMap::new(), &BTreeMap::new());
        for t in 0..valid {
            batch.mask[t] = 1.0;
        }
        if let Some(t) = terminated_at {
            batch.terminated[t] = 1.0;
        }
        batch
    }

    #[test]
    fn test_n_step_target() {
        let b = batch(6, None, 6);
        let target = n_step_target(&b, 0, 1, 3, 0.5).unwrap();
        assert_eq!(target.terms, vec![(1, 1.0), (2, 0.5), (3, 0.25)]);
        assert_eq!(target.bootstrap, Some((4, 0.125)));

        // no successor inside the window
        assert!(n_step_target(&b, 0, 3, 3, 0.5).is_none());

        // episode ends before the bootstrap step
        let b = batch(6, Some(2), 3);
        let target = n_step_target(&b, 0, 1, 3, 0.5).unwrap();
        assert_eq!(target.terms, vec![(1, 1.0), (2, 0.5)]);
        assert_eq!(target.bootstrap, None);

        // truncated trajectory: padding after step 2
        let b = batch(6, None, 3);
        assert!(n_step_target(&b, 0, 1, 3, 0.5).is_none());
        assert!(n_step_target(&b, 0, 4, 1, 0.5).is_none());
    }

    #[test]
    fn test_randn_moments() {
        use rand::{rngs::SmallRng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(0);
        let xs = (0..20000).map(|_| randn(&mut rng)).collect::<Vec<_>>();
        let mean = xs.iter().sum::<f32>() / xs.len() as f32;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / xs.len() as f32;
        assert!(mean.abs() < 0.05, "{}", mean);
        assert!((var - 1.0).abs() < 0.05, "{}", var);
    }

    #[test]
    fn test_scale_gradient_keeps_value() -> Result<()> {
        let x = Tensor::from_slice(&[1f32, -2.0], (2,), &Device::Cpu)?;
        let y = scale_gradient(&x, 0.5)?;
        assert_eq!(y.to_vec1::<f32>()?, vec![1.0, -2.0]);
        Ok(())
    }
}
