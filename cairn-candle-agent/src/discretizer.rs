//! Two-hot encoding of scalars over a fixed support.
use anyhow::Result;
use candle_core::{Device, Tensor, D};
use candle_nn::ops::softmax;
use serde::{Deserialize, Serialize};

/// Evenly spaced support of `num_bins` points on
/// `[-max_value, max_value]`.
///
/// A scalar is represented by weights on the two nearest points whose
/// expectation is the scalar; values outside the support are clipped.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Discretizer {
    num_bins: usize,
    max_value: f32,
}

impl Discretizer {
    /// Creates the support. `num_bins` must be at least 2.
    pub fn new(num_bins: usize, max_value: f32) -> Self {
        Self {
            num_bins: num_bins.max(2),
            max_value,
        }
    }

    /// Number of bins.
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    fn step(&self) -> f32 {
        2.0 * self.max_value / (self.num_bins - 1) as f32
    }

    /// Support points.
    pub fn support(&self) -> Vec<f32> {
        (0..self.num_bins)
            .map(|i| -self.max_value + i as f32 * self.step())
            .collect()
    }

    /// Two-hot encodings of `xs`, `num_bins` values per scalar.
    pub fn two_hot(&self, xs: &[f32]) -> Vec<f32> {
        let mut out = vec![0f32; xs.len() * self.num_bins];
        for (i, &x) in xs.iter().enumerate() {
            let x = x.max(-self.max_value).min(self.max_value);
            let pos = (x + self.max_value) / self.step();
            let lo = (pos.floor() as usize).min(self.num_bins - 1);
            let hi = (lo + 1).min(self.num_bins - 1);
            let w_hi = pos - lo as f32;
            let row = &mut out[i * self.num_bins..(i + 1) * self.num_bins];
            row[lo] += 1.0 - w_hi;
            if hi != lo {
                row[hi] += w_hi;
            }
        }
        out
    }

    /// Expected value of a probability vector over the support.
    pub fn expectation(&self, probs: &[f32]) -> f32 {
        probs
            .iter()
            .zip(self.support().iter())
            .map(|(p, v)| p * v)
            .sum()
    }

    /// Expected values of logits of shape `[.., num_bins]`, keeping the
    /// leading dimensions.
    pub fn logits_to_scalar(&self, logits: &Tensor, device: &Device) -> Result<Tensor> {
        let probs = softmax(logits, D::Minus1)?;
        let support = Tensor::from_vec(self.support(), (self.num_bins,), device)?;
        Ok(probs.broadcast_mul(&support)?.sum(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_hot_inverts() {
        let d = Discretizer::new(21, 5.0);
        for &x in [-5.0f32, -3.3, 0.0, 0.25, 4.99, 5.0].iter() {
            let enc = d.two_hot(&[x]);
            assert!((enc.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(enc.iter().filter(|&&w| w > 0.0).count() <= 2);
            assert!((d.expectation(&enc) - x).abs() < 1e-4, "{}", x);
        }
        // clipped outside the support
        assert!((d.expectation(&d.two_hot(&[12.0])) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_logits_to_scalar() -> Result<()> {
        let d = Discretizer::new(3, 1.0);
        let logits =
            Tensor::from_slice(&[0f32, 0.0, 0.0, -50.0, -50.0, 50.0], (2, 3), &Device::Cpu)?;
        let v = d.logits_to_scalar(&logits, &Device::Cpu)?.to_vec1::<f32>()?;
        assert!(v[0].abs() < 1e-5);
        assert!((v[1] - 1.0).abs() < 1e-5);
        Ok(())
    }
}
