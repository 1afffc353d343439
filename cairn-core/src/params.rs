//! Parameter snapshots and their publication from the learner to actors.
//!
//! The learner is the only writer of its parameters. After every update it
//! copies them into an immutable [`ParamSet`] and publishes it through a
//! [`ParamsSlot`]. Readers clone the `Arc` of whatever snapshot is current, so
//! they observe either the previous or the new snapshot as a whole.
use crate::error::CairnError;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

/// Host copy of one named parameter tensor.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ParamTensor {
    /// Shape of the tensor.
    pub shape: Vec<usize>,

    /// Elements in row-major order.
    pub data: Vec<f32>,
}

impl ParamTensor {
    /// Creates a tensor, checking that `data` fits `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, CairnError> {
        let n: usize = shape.iter().product();
        if n != data.len() {
            return Err(CairnError::config(format!(
                "parameter of shape {:?} needs {} elements, got {}",
                shape,
                n,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }
}

/// Immutable snapshot of the parameters of a network bundle.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ParamSet {
    version: u64,
    tensors: BTreeMap<String, ParamTensor>,
}

impl ParamSet {
    /// Creates a snapshot.
    pub fn new(version: u64, tensors: BTreeMap<String, ParamTensor>) -> Self {
        Self { version, tensors }
    }

    /// Number of updates applied before the snapshot was taken.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the tensor of the given name.
    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.tensors.get(name)
    }

    /// Iterates over tensors ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamTensor)> {
        self.tensors.iter()
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Returns `true` if there is no tensor.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_elements(&self) -> usize {
        self.tensors.values().map(|t| t.data.len()).sum()
    }

    /// Name to shape mapping.
    pub fn shapes(&self) -> BTreeMap<String, Vec<usize>> {
        self.tensors
            .iter()
            .map(|(k, v)| (k.clone(), v.shape.clone()))
            .collect()
    }

    /// Checks that names and shapes equal `expected`.
    pub fn check_shapes(&self, expected: &BTreeMap<String, Vec<usize>>) -> Result<(), CairnError> {
        if self.tensors.len() != expected.len() {
            return Err(CairnError::config(format!(
                "snapshot has {} tensors, expected {}",
                self.tensors.len(),
                expected.len()
            )));
        }
        for (name, shape) in expected.iter() {
            match self.tensors.get(name) {
                Some(t) if &t.shape == shape && t.data.len() == shape.iter().product() => {}
                Some(t) => {
                    return Err(CairnError::config(format!(
                        "tensor '{}' has shape {:?}, expected {:?}",
                        name, t.shape, shape
                    )))
                }
                None => return Err(CairnError::config(format!("tensor '{}' is missing", name))),
            }
        }
        Ok(())
    }

    /// Returns `true` if every element is finite.
    pub fn is_finite(&self) -> bool {
        self.tensors
            .values()
            .all(|t| t.data.iter().all(|v| v.is_finite()))
    }
}

/// Single-writer publication point for parameter snapshots.
///
/// `publish` swaps the current `Arc` under a write lock; `latest` clones it
/// under a read lock. Neither holds the lock while copying tensors.
pub struct ParamsSlot {
    current: RwLock<Arc<ParamSet>>,
    n_published: AtomicUsize,
}

impl ParamsSlot {
    /// Creates a slot holding the initial parameters.
    pub fn new(initial: Arc<ParamSet>) -> Self {
        Self {
            current: RwLock::new(initial),
            n_published: AtomicUsize::new(0),
        }
    }

    /// Makes `params` the current snapshot and returns the previous one.
    pub fn publish(&self, params: Arc<ParamSet>) -> Arc<ParamSet> {
        // A poisoned lock still holds a whole snapshot.
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let prev = std::mem::replace(&mut *guard, params);
        self.n_published.fetch_add(1, Ordering::Release);
        prev
    }

    /// Current snapshot.
    pub fn latest(&self) -> Arc<ParamSet> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Version of the current snapshot.
    pub fn version(&self) -> u64 {
        self.latest().version()
    }

    /// Number of snapshots published since construction.
    pub fn n_published(&self) -> usize {
        self.n_published.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot(version: u64) -> ParamSet {
        let v = version as f32;
        let tensors = BTreeMap::from([
            (
                "core/weight".to_string(),
                ParamTensor::new(vec![4, 3], vec![v; 12]).unwrap(),
            ),
            (
                "head/bias".to_string(),
                ParamTensor::new(vec![2], vec![v; 2]).unwrap(),
            ),
        ]);
        ParamSet::new(version, tensors)
    }

    #[test]
    fn test_param_tensor_shape_check() {
        assert!(ParamTensor::new(vec![2, 2], vec![0.0; 3]).is_err());
        assert!(ParamTensor::new(vec![2, 2], vec![0.0; 4]).is_ok());
    }

    #[test]
    fn test_check_shapes() {
        let p = snapshot(0);
        let mut expected = p.shapes();
        assert!(p.check_shapes(&expected).is_ok());
        expected.insert("head/bias".into(), vec![3]);
        assert!(p.check_shapes(&expected).is_err());
    }

    #[test]
    fn test_concurrent_reads_are_never_torn() {
        let slot = Arc::new(ParamsSlot::new(Arc::new(snapshot(0))));
        let expected = snapshot(0).shapes();
        let n_updates = 500u64;

        let readers = (0..4)
            .map(|_| {
                let slot = slot.clone();
                let expected = expected.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    loop {
                        let p = slot.latest();
                        p.check_shapes(&expected).unwrap();
                        // every element of a snapshot was written with its version
                        let v = p.version() as f32;
                        assert!(p.iter().all(|(_, t)| t.data.iter().all(|&x| x == v)));
                        assert!(p.version() >= last);
                        last = p.version();
                        if last == n_updates {
                            break;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for version in 1..=n_updates {
            slot.publish(Arc::new(snapshot(version)));
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(slot.n_published(), n_updates as usize);
        assert_eq!(slot.version(), n_updates);
    }
}
