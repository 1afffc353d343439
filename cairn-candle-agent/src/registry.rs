//! Explicit registry of the algorithms of this crate.
//!
//! An experiment names its algorithm with an id and carries the matching
//! [`AlgorithmConfig`]. The [`Registry`] resolves the pair once into an
//! [`AgentEntry`], which builds the agent for an environment spec.
use crate::{
    muzero::{MuZeroBuilder, MuZeroConfig, MuZeroNetworkFactory},
    network::NetworkBundle,
    qlearning::{QLearningBuilder, QLearningConfig, QLearningNetworkFactory},
    usfa::{UsfaBuilder, UsfaConfig, UsfaNetworkFactory},
};
use anyhow::Result;
use cairn_core::{
    error::CairnError, replay_buffer::ReplayBufferConfig, AgentBuilder, AgentParts, EnvSpec,
    NetworkFactory,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration of one of the algorithms, tagged by variant in YAML.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum AlgorithmConfig {
    /// Recurrent Q-learning.
    QLearning(QLearningConfig),

    /// Universal successor features.
    Usfa(UsfaConfig),

    /// MuZero.
    MuZero(MuZeroConfig),
}

impl AlgorithmConfig {
    /// Id of the algorithm the config belongs to.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::QLearning(_) => "qlearning",
            Self::Usfa(_) => "usfa",
            Self::MuZero(_) => "muzero",
        }
    }
}

/// Factory of the networks of algorithm config `C`.
pub type BoxedFactory<C> = Box<dyn NetworkFactory<C, Bundle = NetworkBundle>>;

/// An algorithm ready to be built: its config, builder and network factory.
pub enum AgentEntry {
    /// Recurrent Q-learning.
    QLearning {
        /// Configuration.
        config: QLearningConfig,
        /// Builder.
        builder: QLearningBuilder,
        /// Network factory.
        factory: BoxedFactory<QLearningConfig>,
    },

    /// Universal successor features.
    Usfa {
        /// Configuration.
        config: UsfaConfig,
        /// Builder.
        builder: UsfaBuilder,
        /// Network factory.
        factory: BoxedFactory<UsfaConfig>,
    },

    /// MuZero.
    MuZero {
        /// Configuration.
        config: MuZeroConfig,
        /// Builder.
        builder: MuZeroBuilder,
        /// Network factory.
        factory: BoxedFactory<MuZeroConfig>,
    },
}

impl AgentEntry {
    /// Entry with the default network factory of the algorithm of `config`.
    pub fn new(config: AlgorithmConfig) -> Self {
        match config {
            AlgorithmConfig::QLearning(config) => Self::QLearning {
                config,
                builder: QLearningBuilder,
                factory: Box::new(QLearningNetworkFactory),
            },
            AlgorithmConfig::Usfa(config) => Self::Usfa {
                config,
                builder: UsfaBuilder,
                factory: Box::new(UsfaNetworkFactory),
            },
            AlgorithmConfig::MuZero(config) => Self::MuZero {
                config,
                builder: MuZeroBuilder,
                factory: Box::new(MuZeroNetworkFactory),
            },
        }
    }

    /// Id of the algorithm.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::QLearning { .. } => "qlearning",
            Self::Usfa { .. } => "usfa",
            Self::MuZero { .. } => "muzero",
        }
    }

    /// Builds learner, actor and replay buffer for an environment.
    pub fn build(&self, spec: &EnvSpec, replay_config: &ReplayBufferConfig) -> Result<AgentParts> {
        let parts = match self {
            Self::QLearning {
                config,
                builder,
                factory,
            } => builder.build(config, factory.as_ref(), spec, replay_config)?,
            Self::Usfa {
                config,
                builder,
                factory,
            } => builder.build(config, factory.as_ref(), spec, replay_config)?,
            Self::MuZero {
                config,
                builder,
                factory,
            } => builder.build(config, factory.as_ref(), spec, replay_config)?,
        };
        parts.check_contracts()?;
        Ok(parts)
    }
}

type Constructor = Box<dyn Fn(AlgorithmConfig) -> Result<AgentEntry, CairnError>>;

/// Maps algorithm ids to constructors of [`AgentEntry`].
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Default for Registry {
    /// Registry of `qlearning`, `usfa` and `muzero`.
    fn default() -> Self {
        let mut registry = Self::empty();
        for &id in ["qlearning", "usfa", "muzero"].iter() {
            registry.register(id, move |config| match config.algorithm() == id {
                true => Ok(AgentEntry::new(config)),
                false => Err(CairnError::config(format!(
                    "algorithm '{}' got the config of '{}'",
                    id,
                    config.algorithm()
                ))),
            });
        }
        registry
    }
}

impl Registry {
    /// Registry without algorithms.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registers a constructor under `id`, replacing any previous one.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        constructor: impl Fn(AlgorithmConfig) -> Result<AgentEntry, CairnError> + 'static,
    ) {
        self.constructors.insert(id.into(), Box::new(constructor));
    }

    /// Registered ids in order.
    pub fn ids(&self) -> Vec<&str> {
        self.constructors.keys().map(|k| k.as_str()).collect()
    }

    /// Resolves `id` with its config.
    ///
    /// An unknown id or a config of another algorithm is a
    /// [`CairnError::Configuration`].
    pub fn resolve(&self, id: &str, config: AlgorithmConfig) -> Result<AgentEntry, CairnError> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| {
                CairnError::config(format!(
                    "unknown algorithm '{}', known: {:?}",
                    id,
                    self.ids()
                ))
            })?;
        let entry = constructor(config)?;
        info!("Resolved algorithm '{}'", id);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_ids() {
        let registry = Registry::default();
        assert_eq!(registry.ids(), vec!["muzero", "qlearning", "usfa"]);
        let entry = registry
            .resolve("usfa", AlgorithmConfig::Usfa(UsfaConfig::default()))
            .unwrap();
        assert_eq!(entry.algorithm(), "usfa");
    }

    #[test]
    fn test_mismatch_and_unknown_id_are_configuration_errors() {
        let registry = Registry::default();
        let err = registry
            .resolve("muzero", AlgorithmConfig::QLearning(QLearningConfig::default()))
            .err()
            .unwrap();
        assert!(err.is_configuration());
        let err = registry
            .resolve("dqn", AlgorithmConfig::QLearning(QLearningConfig::default()))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_algorithm_config_yaml_is_tagged() {
        let config = AlgorithmConfig::MuZero(MuZeroConfig::default().num_simulations(3));
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("MuZero"));
        let back: AlgorithmConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
