//! Sequence replay buffer.
use super::{
    IwScheduler, ReplayBufferConfig, SampleKey, SequenceBatch, SumTree, WeightNormalizer,
};
use crate::{
    base::{TemporalContract, Trajectory},
    error::CairnError,
};
use anyhow::{anyhow, Result};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Occupancy metadata written with checkpoints.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ReplayOccupancy {
    /// Maximum number of trajectories.
    pub capacity: usize,

    /// Stored trajectories.
    pub trajectories: usize,

    /// Stored steps.
    pub transitions: usize,

    /// Trajectories inserted since construction.
    pub inserted: u64,

    /// Trajectories evicted since construction.
    pub evicted: u64,
}

impl ReplayOccupancy {
    /// Loads the metadata from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the metadata as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

struct Slot {
    trajectory: Trajectory,
    generation: u64,
    n_windows: usize,
    priority: f32,
}

/// Stores trajectories in a FIFO ring and samples windows from them.
pub struct SequenceReplayBuffer {
    contract: TemporalContract,
    capacity: usize,
    period: usize,
    slots: Vec<Option<Slot>>,
    next: usize,
    n_stored: usize,
    n_transitions: usize,
    n_inserted: u64,
    n_evicted: u64,
    tree: SumTree,
    per: Option<(f32, WeightNormalizer, IwScheduler)>,
    max_priority: f32,
    rng: fastrand::Rng,
}

impl SequenceReplayBuffer {
    /// Builds a buffer sampling windows of `contract.sequence_length`.
    pub fn build(config: &ReplayBufferConfig, contract: TemporalContract) -> Result<Self> {
        if config.capacity == 0 {
            return Err(CairnError::config("replay capacity must be positive").into());
        }
        if contract.sequence_length == 0 {
            return Err(CairnError::config("sequence length must be positive").into());
        }
        let period = config.period.unwrap_or(contract.sequence_length);
        if period == 0 {
            return Err(CairnError::config("replay period must be positive").into());
        }
        let per = config.per_config.as_ref().map(|c| {
            (
                c.alpha,
                c.normalize,
                IwScheduler::new(c.beta_0, c.beta_final, c.n_opts_final),
            )
        });

        Ok(Self {
            contract,
            capacity: config.capacity,
            period,
            slots: (0..config.capacity).map(|_| None).collect(),
            next: 0,
            n_stored: 0,
            n_transitions: 0,
            n_inserted: 0,
            n_evicted: 0,
            tree: SumTree::new(config.capacity),
            per,
            max_priority: 1f32,
            rng: fastrand::Rng::with_seed(config.seed),
        })
    }

    /// The contract trajectories are validated against.
    pub fn contract(&self) -> &TemporalContract {
        &self.contract
    }

    /// Number of stored trajectories.
    pub fn len(&self) -> usize {
        self.n_stored
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.n_stored == 0
    }

    /// Number of stored steps.
    pub fn num_transitions(&self) -> usize {
        self.n_transitions
    }

    /// Maximum number of stored trajectories.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy metadata.
    pub fn occupancy(&self) -> ReplayOccupancy {
        ReplayOccupancy {
            capacity: self.capacity,
            trajectories: self.n_stored,
            transitions: self.n_transitions,
            inserted: self.n_inserted,
            evicted: self.n_evicted,
        }
    }

    /// Stored trajectories from the oldest to the newest.
    pub fn iter(&self) -> impl Iterator<Item = &Trajectory> {
        let start = if self.n_stored < self.capacity { 0 } else { self.next };
        (0..self.capacity)
            .map(move |i| (start + i) % self.capacity)
            .filter_map(move |i| self.slots[i].as_ref().map(|s| &s.trajectory))
    }

    /// Number of windows of a trajectory of length `len`.
    pub fn n_windows(&self, len: usize) -> usize {
        let t = self.contract.sequence_length;
        if len <= t {
            1
        } else {
            let span = len - t;
            let n = span / self.period + 1;
            if span % self.period == 0 {
                n
            } else {
                n + 1
            }
        }
    }

    /// Start step of the `w`-th window of a trajectory of length `len`.
    fn window_start(&self, len: usize, w: usize) -> usize {
        let t = self.contract.sequence_length;
        if len <= t {
            0
        } else {
            (w * self.period).min(len - t)
        }
    }

    fn tree_value(&self, slot: &Slot) -> f32 {
        match &self.per {
            Some((alpha, ..)) => slot.priority.powf(*alpha),
            None => slot.n_windows as f32,
        }
    }

    /// Stores a trajectory, evicting the oldest one when full.
    pub fn insert(&mut self, trajectory: Trajectory) -> Result<()> {
        self.contract.check_trajectory(&trajectory)?;

        let ix = self.next;
        if let Some(old) = self.slots[ix].take() {
            self.n_transitions -= old.trajectory.len();
            self.n_stored -= 1;
            self.n_evicted += 1;
            debug!(
                "Evicted trajectory of episode {} ({} steps)",
                old.trajectory.episode_id,
                old.trajectory.len()
            );
        }

        let len = trajectory.len();
        let slot = Slot {
            n_windows: self.n_windows(len),
            trajectory,
            generation: self.n_inserted,
            priority: self.max_priority,
        };
        let v = self.tree_value(&slot);
        self.tree.set(ix, v);
        self.slots[ix] = Some(slot);
        self.n_stored += 1;
        self.n_transitions += len;
        self.n_inserted += 1;
        self.next = (self.next + 1) % self.capacity;
        trace!("Inserted trajectory into slot {} ({} steps)", ix, len);
        Ok(())
    }

    fn draw_slot(&mut self) -> Result<usize> {
        for _ in 0..64 {
            let ix = self.tree.sample(&mut self.rng);
            if ix < self.capacity && self.slots[ix].is_some() {
                return Ok(ix);
            }
        }
        Err(anyhow!("failed to draw an occupied replay slot"))
    }

    /// Samples `batch_size` windows.
    ///
    /// Must not be called on an empty buffer; the training loop waits in its
    /// warmup state until enough data is stored.
    pub fn sample(&mut self, batch_size: usize) -> Result<SequenceBatch> {
        if self.is_empty() {
            return Err(anyhow!("sampling from an empty replay buffer"));
        }

        let seq_len = self.contract.sequence_length;
        let mut batch = SequenceBatch::zeros(
            batch_size,
            seq_len,
            self.contract.obs_dim,
            &self.contract.obs_aux,
            &self.contract.extras,
        );
        let mut probs = Vec::with_capacity(batch_size);
        let total = self.tree.total();

        for b in 0..batch_size {
            let ix = self.draw_slot()?;
            let slot = match &self.slots[ix] {
                Some(slot) => slot,
                None => return Err(anyhow!("replay slot {} is empty", ix)),
            };
            let w = self.rng.usize(0..slot.n_windows);
            let start = self.window_start(slot.trajectory.len(), w);
            probs.push(self.tree.value(ix) / total);
            fill_window(&mut batch, b, &slot.trajectory, start);
            batch.keys.push(SampleKey {
                slot: ix,
                generation: slot.generation,
                start,
            });
        }

        if let Some((_, normalize, scheduler)) = &mut self.per {
            let beta = scheduler.beta();
            scheduler.add_n_opts();
            let n = self.n_stored as f32;
            let ws = probs
                .iter()
                .map(|p| (n * p).powf(-beta))
                .collect::<Vec<_>>();
            let w_max = match normalize {
                WeightNormalizer::Batch => ws.iter().fold(f32::MIN, |m, &w| m.max(w)),
                WeightNormalizer::All => match self.tree.min_positive() {
                    Some(p_min) => (n * p_min / total).powf(-beta),
                    None => 1f32,
                },
            };
            batch.weight = Some(ws.iter().map(|w| w / w_max).collect());
        }

        Ok(batch)
    }

    /// Updates priorities of sampled windows.
    ///
    /// Windows of one trajectory share its priority, which becomes the max
    /// over those windows in `keys`. Priorities of trajectories evicted since
    /// sampling are dropped, as are non-finite values. Without prioritized
    /// sampling this is a no-op.
    pub fn update_priority(&mut self, keys: &[SampleKey], priorities: &[f32]) {
        let alpha = match &self.per {
            Some((alpha, ..)) => *alpha,
            None => return,
        };
        let mut per_slot: BTreeMap<(usize, u64), f32> = BTreeMap::new();
        for (key, &p) in keys.iter().zip(priorities.iter()) {
            if !p.is_finite() || p < 0f32 {
                continue;
            }
            let entry = per_slot.entry((key.slot, key.generation)).or_insert(p);
            *entry = entry.max(p);
        }
        for ((ix, generation), p) in per_slot {
            let p = p.max(1e-6);
            match self.slots.get_mut(ix) {
                Some(Some(slot)) if slot.generation == generation => {
                    slot.priority = p;
                    self.max_priority = self.max_priority.max(p);
                }
                _ => continue,
            }
            self.tree.set(ix, p.powf(alpha));
        }
    }

    /// Stored priority of the trajectory in `slot`.
    pub fn priority(&self, slot: usize) -> Option<f32> {
        self.slots.get(slot)?.as_ref().map(|s| s.priority)
    }
}

/// Copies the window `[start, start + seq_len)` of `trajectory` into row `b`.
fn fill_window(batch: &mut SequenceBatch, b: usize, trajectory: &Trajectory, start: usize) {
    let seq_len = batch.seq_len;
    let obs_dim = batch.obs_dim;
    batch.initial_state.push(trajectory.states[start].clone());

    for t in 0..seq_len {
        let step = match trajectory.steps.get(start + t) {
            Some(step) => step,
            None => break,
        };
        let i = b * seq_len + t;
        batch.obs[i * obs_dim..(i + 1) * obs_dim].copy_from_slice(&step.observation.data);
        batch.action[i] = step.action as i64;
        batch.reward[i] = step.reward;
        batch.terminated[i] = if step.terminated { 1f32 } else { 0f32 };
        batch.mask[i] = 1f32;
        for (k, col) in batch.obs_aux.iter_mut() {
            if let Some(v) = step.observation.aux.get(k) {
                col.data[i * col.dim..(i + 1) * col.dim].copy_from_slice(v);
            }
        }
        for (k, col) in batch.extras.iter_mut() {
            if let Some(v) = step.extras.get(k) {
                col.data[i * col.dim..(i + 1) * col.dim].copy_from_slice(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{Extras, Observation, RecurrentState, TrajectoryStep},
        replay_buffer::PerConfig,
    };
    use std::collections::BTreeMap;

    fn contract(seq_len: usize) -> TemporalContract {
        TemporalContract {
            sequence_length: seq_len,
            state_shape: vec![2, 1],
            num_actions: 100,
            obs_dim: 1,
            obs_aux: BTreeMap::new(),
            extras: BTreeMap::from([("value".to_string(), 1)]),
        }
    }

    /// Steps carry their index in the observation, action, reward and state.
    fn trajectory(episode_id: u64, len: usize, terminal: bool) -> Trajectory {
        let mut tr = Trajectory::new(episode_id);
        for t in 0..len {
            let extras = Extras::from([("value".to_string(), vec![t as f32 * 10.0])]);
            tr.push(
                TrajectoryStep {
                    observation: Observation::new(vec![t as f32]),
                    action: t % 100,
                    reward: t as f32 + 0.5,
                    terminated: terminal && t + 1 == len,
                    extras,
                },
                RecurrentState::lstm(vec![t as f32], vec![-(t as f32)]),
            );
        }
        tr
    }

    #[test]
    fn test_window_counts() -> Result<()> {
        let config = ReplayBufferConfig::default().period(2);
        let buffer = SequenceReplayBuffer::build(&config, contract(4))?;
        assert_eq!(buffer.n_windows(3), 1);
        assert_eq!(buffer.n_windows(4), 1);
        assert_eq!(buffer.n_windows(6), 2);
        // starts 0, 2 and a trailing window at 3
        assert_eq!(buffer.n_windows(7), 3);
        assert_eq!(buffer.window_start(7, 2), 3);
        Ok(())
    }

    #[test]
    fn test_sample_is_contiguous_sub_slice() -> Result<()> {
        let config = ReplayBufferConfig::default().period(1).seed(3);
        let mut buffer = SequenceReplayBuffer::build(&config, contract(4))?;
        let len = 11;
        buffer.insert(trajectory(0, len, true))?;

        for _ in 0..100 {
            let batch = buffer.sample(1)?;
            let start = batch.keys[0].start;
            assert!(start + 4 <= len);
            for t in 0..4 {
                let k = (start + t) as f32;
                assert_eq!(batch.obs[t], k);
                assert_eq!(batch.action[t], (start + t) as i64);
                assert_eq!(batch.reward[t], k + 0.5);
                assert_eq!(batch.extras["value"].data[t], k * 10.0);
                assert_eq!(batch.mask[t], 1.0);
            }
            // the state travels with the window start, not the trajectory start
            assert_eq!(batch.initial_state[0].part(0).unwrap(), &[start as f32]);
        }
        Ok(())
    }

    #[test]
    fn test_fifo_eviction() -> Result<()> {
        let capacity = 5;
        let config = ReplayBufferConfig::default().capacity(capacity);
        let mut buffer = SequenceReplayBuffer::build(&config, contract(2))?;
        for id in 0..=capacity as u64 {
            buffer.insert(trajectory(id, 3, true))?;
        }
        assert_eq!(buffer.len(), capacity);
        assert_eq!(buffer.num_transitions(), 3 * capacity);
        let ids = buffer.iter().map(|t| t.episode_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(buffer.occupancy().evicted, 1);
        Ok(())
    }

    #[test]
    fn test_short_trajectory_is_padded_with_mask() -> Result<()> {
        let config = ReplayBufferConfig::default();
        let mut buffer = SequenceReplayBuffer::build(&config, contract(6))?;
        buffer.insert(trajectory(0, 4, true))?;
        let batch = buffer.sample(2)?;
        for b in 0..2 {
            let mask = &batch.mask[b * 6..(b + 1) * 6];
            assert_eq!(mask, &[1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
            assert_eq!(&batch.reward[b * 6 + 4..(b + 1) * 6], &[0.0, 0.0]);
            assert_eq!(batch.terminated[b * 6 + 3], 1.0);
        }
        assert!(batch.is_bootstrappable(0, 2));
        assert!(batch.is_bootstrappable(0, 3));
        assert!(!batch.is_bootstrappable(0, 4));
        Ok(())
    }

    #[test]
    fn test_invalid_trajectory_is_rejected() -> Result<()> {
        let mut buffer =
            SequenceReplayBuffer::build(&ReplayBufferConfig::default(), contract(2))?;
        let mut tr = trajectory(0, 3, false);
        tr.steps[1].extras.clear();
        let err = buffer.insert(tr).unwrap_err();
        assert!(err.downcast_ref::<CairnError>().unwrap().is_configuration());
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_prioritized_sampling() -> Result<()> {
        let per = PerConfig::default()
            .alpha(1.0)
            .beta_0(1.0)
            .normalize(WeightNormalizer::Batch);
        let config = ReplayBufferConfig::default().per_config(Some(per)).seed(1);
        let mut buffer = SequenceReplayBuffer::build(&config, contract(2))?;
        buffer.insert(trajectory(0, 2, true))?;
        buffer.insert(trajectory(1, 2, true))?;

        let batch = buffer.sample(2)?;
        assert_eq!(batch.weight.as_ref().unwrap().len(), 2);

        // push almost all mass onto slot 1
        let keys = [
            SampleKey { slot: 0, generation: 0, start: 0 },
            SampleKey { slot: 1, generation: 1, start: 0 },
        ];
        buffer.update_priority(&keys, &[0.01, 10.0]);
        let batch = buffer.sample(200)?;
        let n1 = batch.keys.iter().filter(|k| k.slot == 1).count();
        assert!(n1 > 190, "n1 = {}", n1);
        // rarely sampled windows carry the largest weight
        let ws = batch.weight.unwrap();
        assert!(ws.iter().all(|&w| w > 0.0 && w <= 1.0));

        // stale keys are ignored
        let stale = [SampleKey { slot: 0, generation: 99, start: 0 }];
        buffer.update_priority(&stale, &[5.0]);
        assert_eq!(buffer.priority(0), Some(0.01));
        Ok(())
    }

    #[test]
    fn test_windows_of_one_trajectory_keep_the_max_priority() -> Result<()> {
        let per = PerConfig::default().alpha(1.0);
        let config = ReplayBufferConfig::default()
            .period(2)
            .per_config(Some(per))
            .seed(1);
        let mut buffer = SequenceReplayBuffer::build(&config, contract(2))?;
        buffer.insert(trajectory(0, 6, true))?;

        let key = |start| SampleKey { slot: 0, generation: 0, start };
        buffer.update_priority(&[key(0), key(2), key(4)], &[0.5, 3.0, 1.0]);
        assert_eq!(buffer.priority(0), Some(3.0));

        // a non-finite value does not hide the finite ones
        buffer.update_priority(&[key(2), key(0)], &[f32::NAN, 0.25]);
        assert_eq!(buffer.priority(0), Some(0.25));
        Ok(())
    }
}
