//! LSTM core carrying the recurrent state of the agents.
use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{linear, ops::sigmoid, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Lstm`].
pub struct LstmConfig {
    /// Input dimension.
    pub in_dim: usize,

    /// Size of the hidden and the cell vector.
    pub hidden_dim: usize,
}

impl LstmConfig {
    /// Creates configuration of LSTM.
    pub fn new(in_dim: usize, hidden_dim: usize) -> Self {
        Self { in_dim, hidden_dim }
    }
}

/// Single-layer LSTM.
///
/// Gates are ordered input, forget, cell, output in the stacked weights.
pub struct Lstm {
    config: LstmConfig,
    ih: Linear,
    hh: Linear,
}

impl Lstm {
    /// Builds the cell, creating or reading its variables through `vs`.
    pub fn build(vs: VarBuilder, config: LstmConfig) -> Result<Self> {
        let h4 = 4 * config.hidden_dim;
        let ih = linear(config.in_dim, h4, vs.pp("ih"))?;
        let hh = linear(config.hidden_dim, h4, vs.pp("hh"))?;
        Ok(Self { config, ih, hh })
    }

    /// One step. `x` is `[batch, in_dim]`, `h` and `c` are `[batch, hidden]`.
    pub fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> Result<(Tensor, Tensor)> {
        let n = self.config.hidden_dim;
        let gates = (self.ih.forward(x)? + self.hh.forward(h)?)?;
        let i = sigmoid(&gates.narrow(D::Minus1, 0, n)?)?;
        let f = sigmoid(&gates.narrow(D::Minus1, n, n)?)?;
        let g = gates.narrow(D::Minus1, 2 * n, n)?.tanh()?;
        let o = sigmoid(&gates.narrow(D::Minus1, 3 * n, n)?)?;
        let c = ((f * c)? + (i * g)?)?;
        let h = (o * c.tanh()?)?;
        Ok((h, c))
    }

    /// Runs the cell over `xs` of shape `[batch, seq_len, in_dim]` from the
    /// state `(h, c)`.
    ///
    /// Returns the hidden vectors `[batch, seq_len, hidden]`. The state is
    /// detached after `detach_after` steps, so the leading steps only warm it
    /// up.
    pub fn unroll(
        &self,
        xs: &Tensor,
        h: &Tensor,
        c: &Tensor,
        detach_after: usize,
    ) -> Result<Tensor> {
        let (_, seq_len, _) = xs.dims3()?;
        let mut h = h.clone();
        let mut c = c.clone();
        let mut hs = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            if t == detach_after && t > 0 {
                h = h.detach();
                c = c.detach();
            }
            let x = xs.narrow(1, t, 1)?.squeeze(1)?;
            let (h_, c_) = self.step(&x, &h, &c)?;
            hs.push(h_.clone());
            h = h_;
            c = c_;
        }

        Ok(Tensor::stack(&hs, 1)?)
    }

    /// Configuration of the cell.
    pub fn config(&self) -> &LstmConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_unroll_matches_steps() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let lstm = Lstm::build(vb.pp("core"), LstmConfig::new(3, 4))?;

        let xs = Tensor::randn(0f32, 1f32, (2, 5, 3), &dev)?;
        let h = Tensor::zeros((2, 4), DType::F32, &dev)?;
        let c = Tensor::zeros((2, 4), DType::F32, &dev)?;
        let hs = lstm.unroll(&xs, &h, &c, 2)?;
        assert_eq!(hs.dims(), &[2, 5, 4]);

        let (mut h_, mut c_) = (h, c);
        for t in 0..5 {
            let x = xs.narrow(1, t, 1)?.squeeze(1)?;
            let (h2, c2) = lstm.step(&x, &h_, &c_)?;
            h_ = h2;
            c_ = c2;
        }
        let last = hs.narrow(1, 4, 1)?.squeeze(1)?;
        let diff = (last - h_)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }
}
