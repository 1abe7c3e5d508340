//! An ordered map keyed by disjoint, non-overlapping intervals, with
//! automatic merging of adjacent compatible intervals and automatic
//! splitting when an insert or erase only partially overlaps an existing
//! node.
//!
//! Backed by a `BTreeMap<Interval<A>, V>` — the same substrate the pack's
//! own range-keyed maps use (e.g. `miri`'s `RangeMap` wraps a `BTreeMap<Range,
//! T>`); [`Interval`]'s `Ord` impl orders first by `least` then by
//! `greatest`, which for a set of pairwise-disjoint intervals is simply
//! ascending address order.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Bound;

use crate::address::Address;
use crate::interval::Interval;

/// Decides whether two adjacent intervals' values may be merged, and how to
/// split a value at an interior point. Parameterizes [`IntervalMap`].
pub trait MergePolicy<A: Address, V> {
    /// `left` occupies `left_interval`, immediately followed (no gap, no
    /// overlap) by `right` occupying `right_interval`. Returns whether the
    /// two nodes may be combined into one spanning both intervals.
    fn can_merge(left_interval: &Interval<A>, left: &V, right_interval: &Interval<A>, right: &V) -> bool;

    /// Splits `value`, which occupies `interval`, at `split_point` (which
    /// lies strictly inside `interval`, not at either endpoint). Returns the
    /// value for the right-hand half `[split_point, interval.greatest()]`;
    /// the original `value` becomes the left half.
    fn split(interval: &Interval<A>, value: &V, split_point: A) -> V;
}

/// A single `(interval, value)` node, as produced by [`IntervalMap::nodes`].
pub type Node<'a, A, V> = (&'a Interval<A>, &'a V);

pub struct IntervalMap<A: Address, V, P> {
    map: BTreeMap<Interval<A>, V>,
    _policy: PhantomData<fn() -> P>,
}

impl<A: Address, V, P> Default for IntervalMap<A, V, P> {
    fn default() -> Self {
        IntervalMap {
            map: BTreeMap::new(),
            _policy: PhantomData,
        }
    }
}

impl<A: Address, V: Clone, P: MergePolicy<A, V>> IntervalMap<A, V, P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn n_intervals(&self) -> usize {
        self.map.len()
    }

    /// The smallest interval containing every mapped address. Empty if the map is empty.
    pub fn hull(&self) -> Interval<A> {
        match (self.map.keys().next(), self.map.keys().next_back()) {
            (Some(first), Some(last)) => Interval::hull(first.least(), last.greatest()),
            _ => Interval::empty(),
        }
    }

    pub fn nodes(&self) -> impl DoubleEndedIterator<Item = Node<'_, A, V>> {
        self.map.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.map.values_mut()
    }

    /// The node containing `address`, if any.
    pub fn find(&self, address: A) -> Option<Node<'_, A, V>> {
        let node = self.predecessor(address)?;
        node.0.contains(address).then_some(node)
    }

    /// The first node whose interval's `greatest >= address`; `None` if no
    /// such node exists (i.e. `address` is above every mapped interval).
    pub fn lower_bound(&self, address: A) -> Option<Node<'_, A, V>> {
        if let Some(node) = self.predecessor(address) {
            if node.0.contains(address) {
                return Some(node);
            }
        }
        self.successor_strictly_after(address)
    }

    /// The last node whose interval's `least <= address`; `None` if no such
    /// node exists (i.e. `address` is below every mapped interval).
    pub fn find_prior(&self, address: A) -> Option<Node<'_, A, V>> {
        self.predecessor(address)
    }

    /// The value stored under exactly `key`, if `key` is itself a node in
    /// the map (not merely contained by one).
    pub fn get(&self, key: &Interval<A>) -> Option<&V> {
        self.map.get(key)
    }

    /// The key of the node immediately following `key` in ascending address
    /// order, or `None` if `key` is the map's last node. `key` need not
    /// itself be present.
    pub fn key_after(&self, key: &Interval<A>) -> Option<Interval<A>> {
        self.map
            .range((Bound::Excluded(*key), Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
    }

    /// The key of the node immediately preceding `key` in ascending address
    /// order, or `None` if `key` is the map's first node. `key` need not
    /// itself be present.
    pub fn key_before(&self, key: &Interval<A>) -> Option<Interval<A>> {
        self.map.range(..*key).next_back().map(|(k, _)| *k)
    }

    /// Mutable access to the value stored under exactly `key`.
    pub fn get_mut(&mut self, key: &Interval<A>) -> Option<&mut V> {
        self.map.get_mut(key)
    }

    /// Mutable access to every value whose key is `>= key`, in ascending order.
    pub fn values_mut_from(&mut self, key: Interval<A>) -> impl Iterator<Item = &mut V> {
        self.map.range_mut(key..).map(|(_, v)| v)
    }

    /// Largest-keyed node with `least <= address`, whether or not it
    /// actually contains `address` (it might end below it, if `address`
    /// falls in a gap).
    fn predecessor(&self, address: A) -> Option<Node<'_, A, V>> {
        let probe = Interval::new(address, A::MAX);
        self.map.range(..=probe).next_back()
    }

    fn successor_strictly_after(&self, address: A) -> Option<Node<'_, A, V>> {
        let probe = Interval::new(address, A::MAX);
        self.map.range((Bound::Excluded(probe), Bound::Unbounded)).next()
    }

    /// Keys whose interval overlaps `interval`, in ascending order.
    fn overlapping_keys(&self, interval: &Interval<A>) -> Vec<Interval<A>> {
        if interval.is_empty() {
            return Vec::new();
        }
        let mut keys = Vec::new();
        if let Some((k, _)) = self.predecessor(interval.least())
            && k.least() < interval.least()
            && k.overlaps(interval)
        {
            keys.push(*k);
        }
        let probe_lo = Interval::singleton(interval.least());
        let probe_hi = Interval::new(interval.greatest(), A::MAX);
        keys.extend(self.map.range(probe_lo..=probe_hi).map(|(k, _)| *k));
        keys
    }

    /// Removes every mapped address within `interval`, splitting any node
    /// that only partially overlaps it.
    pub fn erase(&mut self, interval: &Interval<A>) {
        for key in self.overlapping_keys(interval) {
            let value = self.map.remove(&key).expect("key came from this map's own keys");

            if key.least() < interval.least() {
                let left = Interval::new(key.least(), interval.least().checked_sub(A::ONE).expect(
                    "key.least() < interval.least() implies interval.least() > 0, so the subtraction cannot underflow",
                ));
                self.map.insert(left, value.clone());
            }
            if key.greatest() > interval.greatest() {
                let split_point = interval
                    .greatest()
                    .checked_add(A::ONE)
                    .expect("key.greatest() > interval.greatest() implies interval.greatest() < A::MAX");
                let right_value = P::split(&key, &value, split_point);
                let right = Interval::new(split_point, key.greatest());
                self.map.insert(right, right_value);
            }
        }
    }

    /// Maps `interval` to `value`, overwriting any pre-existing overlap and
    /// merging with adjacent nodes when the merge policy allows it.
    pub fn insert(&mut self, interval: Interval<A>, value: V) {
        if interval.is_empty() {
            return;
        }
        self.erase(&interval);
        self.map.insert(interval, value);
        self.merge_at_boundaries(interval);
    }

    fn merge_at_boundaries(&mut self, mut interval: Interval<A>) {
        // Left neighbor.
        if let Some(left_least_pred) = interval.least().checked_sub(A::ONE) {
            if let Some((&left_key, _)) = self.map.range(..=Interval::singleton(left_least_pred)).next_back()
                && left_key.adjacent_to(&interval)
            {
                let left_value = self.map.get(&left_key).unwrap().clone();
                let right_value = self.map.get(&interval).unwrap().clone();
                if P::can_merge(&left_key, &left_value, &interval, &right_value) {
                    self.map.remove(&left_key);
                    self.map.remove(&interval);
                    let merged = Interval::hull(left_key.least(), interval.greatest());
                    self.map.insert(merged, left_value);
                    interval = merged;
                }
            }
        }
        // Right neighbor.
        if let Some(right_least) = interval.greatest().checked_add(A::ONE) {
            let right_key = self.map.range(Interval::singleton(right_least)..).next().map(|(k, _)| *k);
            if let Some(right_key) = right_key
                && right_key.adjacent_to(&interval)
            {
                let left_value = self.map.get(&interval).unwrap().clone();
                let right_value = self.map.get(&right_key).unwrap().clone();
                if P::can_merge(&interval, &left_value, &right_key, &right_value) {
                    self.map.remove(&interval);
                    self.map.remove(&right_key);
                    let merged = Interval::hull(interval.least(), right_key.greatest());
                    self.map.insert(merged, left_value);
                }
            }
        }
    }

    /// The lowest contiguous interval of unmapped addresses with
    /// `least >= boundary`; empty if none (the map covers everything from
    /// `boundary` up to `A::MAX`, or `boundary` itself is `A::MAX` and mapped).
    pub fn first_unmapped(&self, boundary: A) -> Interval<A> {
        let mut addr = boundary;
        loop {
            match self.find(addr) {
                None => {
                    let end = self
                        .successor_strictly_after(addr)
                        .map(|(k, _)| k.least().checked_sub(A::ONE).unwrap_or(A::MAX))
                        .unwrap_or(A::MAX);
                    return Interval::hull(addr, end);
                }
                Some((key, _)) => match key.greatest().checked_add(A::ONE) {
                    Some(next) => addr = next,
                    None => return Interval::empty(), // mapped all the way to A::MAX
                },
            }
        }
    }

    /// The highest contiguous interval of unmapped addresses with
    /// `greatest <= boundary`; empty if none.
    pub fn last_unmapped(&self, boundary: A) -> Interval<A> {
        let mut addr = boundary;
        loop {
            match self.find(addr) {
                None => {
                    let start = self
                        .find_prior(addr)
                        .and_then(|(k, _)| k.greatest().checked_add(A::ONE))
                        .unwrap_or(A::ZERO);
                    return Interval::hull(start, addr);
                }
                Some((key, _)) => match key.least().checked_sub(A::ONE) {
                    Some(prev) => addr = prev,
                    None => return Interval::empty(), // mapped all the way down to 0
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SumMerge;
    impl MergePolicy<u32, i64> for SumMerge {
        fn can_merge(_li: &Interval<u32>, l: &i64, _ri: &Interval<u32>, r: &i64) -> bool {
            l == r
        }
        fn split(_interval: &Interval<u32>, value: &i64, _split_point: u32) -> i64 {
            *value
        }
    }

    type TestMap = IntervalMap<u32, i64, SumMerge>;

    #[test]
    fn insert_and_find() {
        let mut m = TestMap::new();
        m.insert(Interval::new(10, 19), 1);
        assert_eq!(m.find(15).unwrap().1, &1);
        assert!(m.find(20).is_none());
        assert_eq!(m.n_intervals(), 1);
    }

    #[test]
    fn adjacent_equal_values_merge() {
        let mut m = TestMap::new();
        m.insert(Interval::new(0, 9), 1);
        m.insert(Interval::new(10, 19), 1);
        assert_eq!(m.n_intervals(), 1);
        assert_eq!(m.hull(), Interval::new(0, 19));
    }

    #[test]
    fn adjacent_unequal_values_do_not_merge() {
        let mut m = TestMap::new();
        m.insert(Interval::new(0, 9), 1);
        m.insert(Interval::new(10, 19), 2);
        assert_eq!(m.n_intervals(), 2);
    }

    #[test]
    fn insert_overwrites_overlap_with_split() {
        let mut m = TestMap::new();
        m.insert(Interval::new(0, 19), 1);
        m.insert(Interval::new(5, 9), 2);
        assert_eq!(m.n_intervals(), 3);
        assert_eq!(m.find(0).unwrap().1, &1);
        assert_eq!(m.find(7).unwrap().1, &2);
        assert_eq!(m.find(15).unwrap().1, &1);
    }

    #[test]
    fn erase_splits_boundary_node() {
        let mut m = TestMap::new();
        m.insert(Interval::new(0, 19), 1);
        m.erase(&Interval::new(5, 9));
        assert_eq!(m.n_intervals(), 2);
        assert!(m.find(5).is_none());
        assert_eq!(m.find(0).unwrap().1, &1);
        assert_eq!(m.find(15).unwrap().1, &1);
    }

    #[test]
    fn lower_bound_skips_gap() {
        let mut m = TestMap::new();
        m.insert(Interval::new(100, 199), 1);
        let (k, _) = m.lower_bound(50).unwrap();
        assert_eq!(*k, Interval::new(100, 199));
        assert!(m.lower_bound(200).is_none());
    }

    #[test]
    fn find_prior_picks_last_node_at_or_below() {
        let mut m = TestMap::new();
        m.insert(Interval::new(0, 9), 1);
        m.insert(Interval::new(100, 199), 2);
        let (k, _) = m.find_prior(50).unwrap();
        assert_eq!(*k, Interval::new(0, 9));
        assert!(m.find_prior(0).is_some());
    }

    #[test]
    fn merge_idempotence() {
        let mut m = TestMap::new();
        m.insert(Interval::new(0, 9), 1);
        m.insert(Interval::new(0, 9), 1);
        assert_eq!(m.n_intervals(), 1);
    }

    #[test]
    fn first_unmapped_skips_mapped_region() {
        let mut m = TestMap::new();
        m.insert(Interval::new(10, 19), 1);
        assert_eq!(m.first_unmapped(0), Interval::new(0, 9));
        assert_eq!(m.first_unmapped(10), Interval::new(20, u32::MAX));
        assert_eq!(m.first_unmapped(25), Interval::new(25, u32::MAX));
    }

    #[test]
    fn last_unmapped_skips_mapped_region() {
        let mut m = TestMap::new();
        m.insert(Interval::new(10, 19), 1);
        assert_eq!(m.last_unmapped(30), Interval::new(20, 30));
        assert_eq!(m.last_unmapped(19), Interval::new(0, 9));
    }

    #[test]
    fn fully_mapped_reports_no_unmapped_space() {
        let mut m = TestMap::new();
        m.insert(Interval::whole(), 1);
        assert!(m.first_unmapped(0).is_empty());
        assert!(m.last_unmapped(u32::MAX).is_empty());
    }
}
