//! Sum tree for proportional sampling over replay slots.
//!
//! Adapted from <https://github.com/jaromiru/AI-blog/blob/master/SumTree.py>.
//! Values are stored as given; exponents are applied by the caller.
use segment_tree::{
    ops::{MaxIgnoreNaN, MinIgnoreNaN},
    SegmentPoint,
};

/// Binary tree of partial sums with min/max segment trees alongside.
#[derive(Debug)]
pub struct SumTree {
    capacity: usize,
    tree: Vec<f32>,
    min_tree: SegmentPoint<f32, MinIgnoreNaN>,
    max_tree: SegmentPoint<f32, MaxIgnoreNaN>,
}

impl SumTree {
    /// Creates a tree of `capacity` zero-valued leaves.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tree: vec![0f32; 2 * capacity - 1],
            min_tree: SegmentPoint::build(vec![f32::MAX; capacity], MinIgnoreNaN),
            max_tree: SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN),
        }
    }

    fn propagate(&mut self, mut ix: usize, change: f32) {
        while ix != 0 {
            ix = (ix - 1) / 2;
            self.tree[ix] += change;
        }
    }

    fn retrieve(&self, mut ix: usize, mut s: f32) -> usize {
        loop {
            let left = 2 * ix + 1;
            let right = left + 1;
            if left >= self.tree.len() {
                return ix;
            }
            if s <= self.tree[left] || self.tree[right] <= 0f32 {
                ix = left;
            } else {
                s -= self.tree[left];
                ix = right;
            }
        }
    }

    /// Sum of all values.
    pub fn total(&self) -> f32 {
        self.tree[0]
    }

    /// Largest value.
    pub fn max(&self) -> f32 {
        self.max_tree.query(0, self.capacity)
    }

    /// Smallest positive value, `None` if every leaf is zero.
    pub fn min_positive(&self) -> Option<f32> {
        let v = self.min_tree.query(0, self.capacity);
        if v == f32::MAX {
            None
        } else {
            Some(v)
        }
    }

    /// Value of the `ix`-th leaf.
    pub fn value(&self, ix: usize) -> f32 {
        self.tree[ix + self.capacity - 1]
    }

    /// Sets the value of the `ix`-th leaf. Zero removes the leaf from sampling.
    pub fn set(&mut self, ix: usize, v: f32) {
        debug_assert!(ix < self.capacity);
        let v = if v.is_finite() { v.max(0f32) } else { 0f32 };
        self.min_tree
            .modify(ix, if v > 0f32 { v } else { f32::MAX });
        self.max_tree.modify(ix, v);
        let node = ix + self.capacity - 1;
        let change = v - self.tree[node];
        self.tree[node] = v;
        self.propagate(node, change);
    }

    /// Index of the leaf where the cumulative sum reaches `s`.
    ///
    /// `s` should be in `(0, total]`.
    pub fn get(&self, s: f32) -> usize {
        let node = self.retrieve(0, s);
        node + 1 - self.capacity
    }

    /// Draws a leaf index proportionally to the values.
    pub fn sample(&self, rng: &mut fastrand::Rng) -> usize {
        // 1 - [0, 1) keeps the target strictly positive, so zero leaves are skipped
        let s = self.total() * (1f32 - rng.f32());
        self.get(s)
    }
}
