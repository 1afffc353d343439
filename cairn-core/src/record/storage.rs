//! Aggregation of stored records.
use super::{Record, RecordValue};
use std::collections::HashSet;
use xxhash_rust::xxh3::Xxh3Builder;

/// Stores records and aggregates them per key.
///
/// Scalars stored more than once become `{key}_min`, `{key}_max`,
/// `{key}_mean` and `{key}_median`; other values keep their most recent
/// occurrence.
#[derive(Default)]
pub struct RecordStorage {
    data: Vec<Record>,
}

fn summarize(key: &str, mut vs: Vec<f32>) -> Record {
    if vs.len() == 1 {
        return Record::from_scalar(key, vs[0]);
    }
    let n = vs.len() as f32;
    let mean = vs.iter().sum::<f32>() / n;
    vs.sort_by(|x, y| x.total_cmp(y));
    Record::from_slice(&[
        (format!("{}_min", key), RecordValue::Scalar(vs[0])),
        (format!("{}_max", key), RecordValue::Scalar(vs[vs.len() - 1])),
        (format!("{}_mean", key), RecordValue::Scalar(mean)),
        (format!("{}_median", key), RecordValue::Scalar(vs[vs.len() / 2])),
    ])
}

impl RecordStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn keys(&self) -> HashSet<String, Xxh3Builder> {
        let mut keys = HashSet::<String, Xxh3Builder>::default();
        for record in self.data.iter() {
            keys.extend(record.keys().cloned());
        }
        keys
    }

    /// Aggregates the stored records and clears the storage.
    pub fn aggregate(&mut self) -> Record {
        let mut out = Record::empty();

        for key in self.keys().iter() {
            let scalars = self
                .data
                .iter()
                .filter_map(|r| match r.get(key) {
                    Some(RecordValue::Scalar(v)) => Some(*v),
                    _ => None,
                })
                .collect::<Vec<_>>();

            if !scalars.is_empty() {
                out.merge_inplace(summarize(key, scalars));
            } else if let Some(v) = self.data.iter().rev().find_map(|r| r.get(key)) {
                out.insert(key.clone(), v.clone());
            }
        }

        self.data.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_scalars() {
        let mut storage = RecordStorage::new();
        for v in [3.0f32, 1.0, 2.0] {
            storage.store(Record::from_scalar("loss", v));
        }
        storage.store(Record::from_slice(&[(
            "algorithm",
            RecordValue::String("qlearning".into()),
        )]));
        let r = storage.aggregate();

        assert_eq!(r.get_scalar("loss_min").unwrap(), 1.0);
        assert_eq!(r.get_scalar("loss_max").unwrap(), 3.0);
        assert_eq!(r.get_scalar("loss_mean").unwrap(), 2.0);
        assert_eq!(r.get_scalar("loss_median").unwrap(), 2.0);
        assert_eq!(r.get_string("algorithm").unwrap(), "qlearning");
        assert!(storage.is_empty());
    }

    #[test]
    fn test_single_scalar_is_kept() {
        let mut storage = RecordStorage::new();
        storage.store(Record::from_scalar("eval_return", 0.5));
        let r = storage.aggregate();
        assert_eq!(r.get_scalar("eval_return").unwrap(), 0.5);
    }
}
