//! Recurrent agents for [cairn_core] implemented with
//! [candle](https://crates.io/crates/candle-core).
//!
//! Three algorithms share one composition protocol: each has a config, a
//! [`NetworkFactory`](cairn_core::NetworkFactory) producing a
//! [`NetworkBundle`], and an [`AgentBuilder`](cairn_core::AgentBuilder)
//! assembling learner, actor and replay buffer.
//!
//! * [`qlearning`]: recurrent Q-learning with n-step double-Q targets.
//! * [`usfa`]: universal successor features with generalized policy
//!   improvement.
//! * [`muzero`]: a learned model with visit-count tree search.
pub mod acting;
pub mod config;
pub mod discretizer;
pub mod explorer;
pub mod lstm;
pub mod mlp;
pub mod muzero;
pub mod network;
pub mod opt;
pub mod qlearning;
pub mod registry;
pub mod trainable;
pub mod usfa;
pub mod util;
pub use config::CommonConfig;
pub use network::{NetworkBundle, RoleKind, RoleSignature, RoleSpec};
pub use registry::{AgentEntry, AlgorithmConfig, Registry};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The GPU device of the given ordinal.
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl TryFrom<Device> for candle_core::Device {
    type Error = candle_core::Error;

    fn try_from(device: Device) -> Result<Self, Self::Error> {
        match device {
            Device::Cpu => Ok(candle_core::Device::Cpu),
            Device::Cuda(n) => candle_core::Device::new_cuda(n),
        }
    }
}
