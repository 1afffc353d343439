//! Network bundles: named roles, their parameters and snapshots of them.
//!
//! A [`NetworkBundle`] is what a [`NetworkFactory`](cairn_core::NetworkFactory)
//! produces. Each role is an MLP or an LSTM whose variables live in the
//! bundle's [`VarMap`] under the role name. The learner trains the bundle in
//! place; actors instantiate the same roles from a [`ParamSet`] snapshot.
use crate::{
    lstm::{Lstm, LstmConfig},
    mlp::{Mlp, MlpConfig},
    util::track,
};
use anyhow::{anyhow, Result};
use cairn_core::{
    error::CairnError,
    params::{ParamSet, ParamTensor},
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

/// Kind of network filling a role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum RoleKind {
    /// Feed-forward network.
    Mlp,

    /// Recurrent core.
    Lstm,
}

/// What a builder checks about a role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleSignature {
    /// Kind of network.
    pub kind: RoleKind,

    /// Input dimension.
    pub in_dim: usize,

    /// Output dimension; the hidden size for an LSTM.
    pub out_dim: usize,
}

impl RoleSignature {
    /// Signature of an MLP role.
    pub fn mlp(in_dim: usize, out_dim: usize) -> Self {
        Self {
            kind: RoleKind::Mlp,
            in_dim,
            out_dim,
        }
    }

    /// Signature of an LSTM role.
    pub fn lstm(in_dim: usize, hidden_dim: usize) -> Self {
        Self {
            kind: RoleKind::Lstm,
            in_dim,
            out_dim: hidden_dim,
        }
    }
}

/// Network filling a role.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum RoleSpec {
    /// Feed-forward network.
    Mlp(MlpConfig),

    /// Recurrent core.
    Lstm(LstmConfig),
}

impl RoleSpec {
    /// Kind and dimensions of the role.
    pub fn signature(&self) -> RoleSignature {
        match self {
            Self::Mlp(c) => RoleSignature::mlp(c.in_dim, c.out_dim),
            Self::Lstm(c) => RoleSignature::lstm(c.in_dim, c.hidden_dim),
        }
    }
}

enum RoleModule {
    Mlp(Mlp),
    Lstm(Lstm),
}

/// Instantiated networks of a bundle, by role.
pub struct Networks {
    modules: BTreeMap<String, RoleModule>,
}

impl Networks {
    /// Instantiates every role, reading or creating variables through `vb`.
    pub fn build(roles: &BTreeMap<String, RoleSpec>, vb: VarBuilder) -> Result<Self> {
        let mut modules = BTreeMap::new();
        for (name, spec) in roles.iter() {
            let module = match spec {
                RoleSpec::Mlp(c) => RoleModule::Mlp(Mlp::build(vb.pp(name), c.clone())?),
                RoleSpec::Lstm(c) => RoleModule::Lstm(Lstm::build(vb.pp(name), c.clone())?),
            };
            modules.insert(name.clone(), module);
        }
        Ok(Self { modules })
    }

    /// Instantiates read-only networks from a snapshot.
    ///
    /// Fails if a tensor is missing or has another shape than the role
    /// requires.
    pub fn from_params(
        roles: &BTreeMap<String, RoleSpec>,
        params: &ParamSet,
        device: &Device,
    ) -> Result<Self> {
        let mut ts = HashMap::new();
        for (name, p) in params.iter() {
            let t = Tensor::from_slice(&p.data, p.shape.as_slice(), device)?;
            ts.insert(name.clone(), t);
        }
        let vb = VarBuilder::from_tensors(ts, DType::F32, device);
        Self::build(roles, vb)
    }

    /// MLP of the given role.
    pub fn mlp(&self, role: &str) -> Result<&Mlp> {
        match self.modules.get(role) {
            Some(RoleModule::Mlp(m)) => Ok(m),
            _ => Err(anyhow!("no MLP for role '{}'", role)),
        }
    }

    /// LSTM of the given role.
    pub fn lstm(&self, role: &str) -> Result<&Lstm> {
        match self.modules.get(role) {
            Some(RoleModule::Lstm(m)) => Ok(m),
            _ => Err(anyhow!("no LSTM for role '{}'", role)),
        }
    }
}

/// Roles and parameters produced by a network factory.
pub struct NetworkBundle {
    device: Device,
    roles: BTreeMap<String, RoleSpec>,
    varmap: VarMap,
}

impl NetworkBundle {
    /// Creates an empty bundle on `device`.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            roles: BTreeMap::new(),
            varmap: VarMap::new(),
        }
    }

    /// Adds a role and initializes its parameters.
    pub fn with_role(mut self, name: impl Into<String>, spec: RoleSpec) -> Result<Self> {
        let name = name.into();
        if self.roles.contains_key(&name) {
            return Err(CairnError::config(format!("role '{}' is declared twice", name)).into());
        }
        let roles = BTreeMap::from([(name.clone(), spec.clone())]);
        let vb = VarBuilder::from_varmap(&self.varmap, DType::F32, &self.device);
        Networks::build(&roles, vb)?;
        self.roles.insert(name, spec);
        Ok(self)
    }

    /// Declared roles.
    pub fn roles(&self) -> &BTreeMap<String, RoleSpec> {
        &self.roles
    }

    /// Device the parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Parameter store.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Checks that the bundle declares exactly the expected roles, with the
    /// expected kinds and dimensions.
    pub fn check_roles(
        &self,
        expected: &BTreeMap<String, RoleSignature>,
    ) -> Result<(), CairnError> {
        for name in self.roles.keys() {
            if !expected.contains_key(name) {
                return Err(CairnError::config(format!("unexpected network role '{}'", name)));
            }
        }
        for (name, sig) in expected.iter() {
            match self.roles.get(name) {
                None => {
                    return Err(CairnError::config(format!("network role '{}' is missing", name)))
                }
                Some(spec) if spec.signature() != *sig => {
                    return Err(CairnError::config(format!(
                        "network role '{}' is {:?}, expected {:?}",
                        name,
                        spec.signature(),
                        sig
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Networks sharing the variables of the bundle, for training.
    pub fn networks(&self) -> Result<Networks> {
        let vb = VarBuilder::from_varmap(&self.varmap, DType::F32, &self.device);
        Networks::build(&self.roles, vb)
    }

    /// Copy of the bundle with its own variables, e.g. a target network.
    pub fn duplicate(&self) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        Networks::build(&self.roles, vb)?;
        track(&varmap, &self.varmap, 1.0)?;
        Ok(Self {
            device: self.device.clone(),
            roles: self.roles.clone(),
            varmap,
        })
    }

    /// Host copy of the parameters.
    pub fn snapshot(&self, version: u64) -> Result<ParamSet> {
        let data = self.varmap.data().lock().map_err(|e| anyhow!("{}", e))?;
        let mut tensors = BTreeMap::new();
        for (name, var) in data.iter() {
            let t = var.as_tensor();
            let p = ParamTensor::new(t.dims().to_vec(), t.flatten_all()?.to_vec1::<f32>()?)?;
            tensors.insert(name.clone(), p);
        }
        Ok(ParamSet::new(version, tensors))
    }

    /// Names and shapes of the parameters.
    pub fn shapes(&self) -> Result<BTreeMap<String, Vec<usize>>> {
        let data = self.varmap.data().lock().map_err(|e| anyhow!("{}", e))?;
        Ok(data
            .iter()
            .map(|(k, v)| (k.clone(), v.as_tensor().dims().to_vec()))
            .collect())
    }

    /// Saves the parameters as a safetensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save network parameters to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads the parameters from a safetensors file.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load network parameters from {:?}", path.as_ref());
        Ok(())
    }
}
