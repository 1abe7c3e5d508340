//! [`AddressMap`]: the top-level type tying storage, constraints, and the
//! matcher together into the public operations.

use crate::access::{Access, MatchFlags};
use crate::address::{self, Address};
use crate::constraints::{ConstraintState, Constraints, ConstraintsMut};
use crate::error::AddressMapError;
use crate::interval::Interval;
use crate::interval_map::IntervalMap;
use crate::matcher::{self, MatchedConstraints};
use crate::segment::{Segment, SegmentMergePolicy, SegmentPredicate};

pub(crate) type Storage<A, T> = IntervalMap<A, Segment<A, T>, SegmentMergePolicy>;

fn run_match<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    predicates: &[SegmentPredicate<A, T>],
    flags: MatchFlags,
) -> MatchedConstraints<A, T> {
    if flags.is_backward() {
        matcher::match_backward(storage, state, predicates, flags)
    } else {
        matcher::match_forward(storage, state, predicates, flags)
    }
}

fn consistency_check<A: Address, T>(storage: &Storage<A, T>) -> Result<(), AddressMapError> {
    for (interval, segment) in storage.nodes() {
        let available = segment.buffer().borrow().available(segment.offset()).to_usize_saturating();
        if available < interval.size() {
            return Err(AddressMapError::InconsistentMap {
                interval_description: interval.to_string(),
                buffer_available: available,
                interval_size: interval.size(),
            });
        }
    }
    Ok(())
}

/// A buffer returned fewer values than the matched interval promised it
/// had. This is always a bug in a `Buffer` implementation (or a segment
/// whose offset/length no longer matches its buffer), never a condition a
/// caller can recover from — `check_consistency` is run first purely to
/// surface *which* node is at fault in the panic message.
fn assert_full_transfer<A: Address, T>(storage: &Storage<A, T>, copied: usize, expected: usize) {
    if copied != expected {
        let diagnosis = consistency_check(storage);
        unreachable!("buffer transferred {copied} of {expected} expected values: {diagnosis:?}");
    }
}

/// `segment.offset() + (part.least() - node_interval.least())`: the buffer
/// offset corresponding to the sub-range `part` of the node occupying
/// `node_interval`.
fn part_offset<A: Address, T>(node_interval: &Interval<A>, segment: &Segment<A, T>, part: &Interval<A>) -> A {
    let delta = part
        .least()
        .checked_sub(node_interval.least())
        .expect("part is a sub-interval of node_interval, so part.least() >= node_interval.least()");
    segment
        .offset()
        .checked_add(delta)
        .expect("segment covers the whole of node_interval, so offset + delta is in range")
}

/// An interval map from addresses to reference-counted, copy-on-write
/// buffer-backed segments.
///
/// This is the crate's single entry point: build it up with [`AddressMap::insert`]
/// (or [`AddressMap::checked_insert`]), then read it through a
/// [`Constraints`]/[`ConstraintsMut`] chain obtained from
/// [`AddressMap::constraints`]/[`AddressMap::constraints_mut`], e.g.
/// `map.constraints().within(0x1000, 0x1fff).require(Access::READABLE).read(&mut buf, MatchFlags::empty())`.
pub struct AddressMap<A: Address, T> {
    storage: Storage<A, T>,
}

impl<A: Address, T> Default for AddressMap<A, T> {
    fn default() -> Self {
        AddressMap { storage: Storage::new() }
    }
}

impl<A: Address, T> AddressMap<A, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn n_segments(&self) -> usize {
        self.storage.n_intervals()
    }

    /// The smallest interval containing every mapped address.
    pub fn hull(&self) -> Interval<A> {
        self.storage.hull()
    }

    /// Every `(interval, segment)` node, in ascending address order.
    pub fn nodes(&self) -> impl DoubleEndedIterator<Item = (&Interval<A>, &Segment<A, T>)> {
        self.storage.nodes()
    }

    /// The node containing `address`, if any.
    pub fn find_node(&self, address: A) -> Option<(&Interval<A>, &Segment<A, T>)> {
        self.storage.find(address)
    }

    /// Maps `interval` to `segment`, overwriting any pre-existing overlap and
    /// merging with adjacent compatible segments.
    pub fn insert(&mut self, interval: Interval<A>, segment: Segment<A, T>) {
        self.storage.insert(interval, segment);
    }

    /// Like [`AddressMap::insert`], but refuses to overwrite any
    /// already-mapped address instead of silently clobbering it.
    pub fn checked_insert(&mut self, interval: Interval<A>, segment: Segment<A, T>) -> Result<(), AddressMapError> {
        if interval.is_empty() {
            return Ok(());
        }
        if self.storage.nodes().any(|(k, _)| k.overlaps(&interval)) {
            return Err(AddressMapError::InvalidConstraint {
                reason: format!("checked_insert: {interval} overlaps an existing segment"),
            });
        }
        self.storage.insert(interval, segment);
        Ok(())
    }

    /// Removes every mapped address within `interval`, splitting any segment
    /// that only partially overlaps it.
    pub fn erase(&mut self, interval: &Interval<A>) {
        self.storage.erase(interval);
    }

    pub fn constraints(&self) -> Constraints<'_, A, T> {
        Constraints::new(self)
    }

    pub fn constraints_mut(&mut self) -> ConstraintsMut<'_, A, T> {
        ConstraintsMut::new(self)
    }

    /// The lowest (or, with `BACKWARD`, highest) contiguous interval of
    /// unmapped addresses relative to `boundary`. Ignores every constraint
    /// except direction.
    pub fn unmapped(&self, boundary: A, flags: MatchFlags) -> Interval<A> {
        if flags.is_backward() {
            self.storage.last_unmapped(boundary)
        } else {
            self.storage.first_unmapped(boundary)
        }
    }

    /// Finds an interval of `n_values` unmapped, `alignment`-aligned
    /// addresses within `restriction`. Forward mode probes upward from
    /// `restriction.least()`; `BACKWARD` probes downward from
    /// `restriction.greatest()`.
    ///
    /// `n_values == 0` is rejected as `AddressMapError::InvalidConstraint`
    /// rather than folded into "nothing found" — per §7 the two are distinct
    /// error kinds: an empty `Ok(None)` means the search legitimately found
    /// no space, while `n_values == 0` is an ambiguous, ill-formed request
    /// (is the caller asking for zero bytes, or did they mean to pass
    /// something else?) that the original spec calls out as a surfaced
    /// usage error, not a quiet non-match.
    pub fn find_free_space(
        &self,
        n_values: usize,
        alignment: A,
        restriction: Interval<A>,
        flags: MatchFlags,
    ) -> Result<Option<Interval<A>>, AddressMapError> {
        if n_values == 0 {
            return Err(AddressMapError::InvalidConstraint {
                reason: "find_free_space: n_values must be nonzero".to_string(),
            });
        }
        if restriction.is_empty() {
            return Ok(None);
        }
        Ok(if flags.is_backward() {
            self.find_free_space_backward(n_values, alignment, restriction)
        } else {
            self.find_free_space_forward(n_values, alignment, restriction)
        })
    }

    fn find_free_space_forward(&self, n_values: usize, alignment: A, restriction: Interval<A>) -> Option<Interval<A>> {
        let mut probe = restriction.least();
        loop {
            if probe > restriction.greatest() {
                return None;
            }
            let gap = self.storage.first_unmapped(probe).intersect(&restriction);
            if gap.is_empty() {
                return None;
            }
            let min_addr = address::align_up(gap.least(), alignment)?;
            if min_addr > gap.greatest() {
                probe = gap.greatest().checked_add(A::ONE)?;
                continue;
            }
            let avail = Interval::hull(min_addr, gap.greatest()).size();
            let avail = if avail == 0 { usize::MAX } else { avail };
            if n_values > avail {
                probe = gap.greatest().checked_add(A::ONE)?;
                continue;
            }
            let max_addr = min_addr.checked_add_usize(n_values - 1)?;
            let candidate = Interval::new(min_addr, max_addr);
            if gap.contains_interval(&candidate) && restriction.contains_interval(&candidate) {
                return Some(candidate);
            }
            probe = gap.greatest().checked_add(A::ONE)?;
        }
    }

    fn find_free_space_backward(&self, n_values: usize, alignment: A, restriction: Interval<A>) -> Option<Interval<A>> {
        let mut probe = restriction.greatest();
        loop {
            let gap = self.storage.last_unmapped(probe).intersect(&restriction);
            if gap.is_empty() {
                return None;
            }
            let max_addr = address::align_down(gap.greatest(), alignment)?;
            if max_addr < gap.least() {
                probe = gap.least().checked_sub(A::ONE)?;
                continue;
            }
            let avail = Interval::hull(gap.least(), max_addr).size();
            let avail = if avail == 0 { usize::MAX } else { avail };
            if n_values > avail {
                probe = gap.least().checked_sub(A::ONE)?;
                continue;
            }
            let min_addr = max_addr.checked_sub_usize(n_values - 1)?;
            let candidate = Interval::new(min_addr, max_addr);
            if gap.contains_interval(&candidate) && restriction.contains_interval(&candidate) {
                return Some(candidate);
            }
            probe = gap.least().checked_sub(A::ONE)?;
        }
    }

    /// Checks that every segment's buffer actually covers the interval the
    /// segment claims to occupy.
    pub fn check_consistency(&self) -> Result<(), AddressMapError> {
        consistency_check(&self.storage)
    }

    pub(crate) fn storage(&self) -> &Storage<A, T> {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut Storage<A, T> {
        &mut self.storage
    }

    /// If the node at `node_key` is copy-on-write, clones its buffer once and
    /// retargets every node from `node_key` onward that still points at the
    /// old buffer, clearing their copy-on-write flag. A no-op if the node
    /// isn't shared.
    fn ensure_unique_buffer(&mut self, node_key: &Interval<A>) {
        let old_buffer = {
            let segment = self.storage.get(node_key).expect("node_key is a key in this map's own matched nodes");
            if !segment.is_copy_on_write() {
                return;
            }
            segment.buffer().clone()
        };
        let new_buffer = old_buffer.borrow().copy();
        for value in self.storage.values_mut_from(*node_key) {
            if value.points_to_same_buffer(&old_buffer) {
                value.set_buffer(new_buffer.clone());
                value.clear_copy_on_write();
            }
        }
    }
}

// --- Terminal operations shared between the const and mutable constraint views. ---

fn op_available<A: Address, T>(storage: &Storage<A, T>, state: &ConstraintState<A>, predicates: &[SegmentPredicate<A, T>], flags: MatchFlags) -> Interval<A> {
    let flags = flags.resolve_contiguous(true);
    run_match(storage, state, predicates, flags).interval
}

fn op_next<A: Address, T>(storage: &Storage<A, T>, state: &ConstraintState<A>, predicates: &[SegmentPredicate<A, T>], flags: MatchFlags) -> Option<A> {
    let mut narrowed = state.clone();
    narrowed.limit(1);
    let matched = run_match(storage, &narrowed, predicates, flags);
    if matched.interval.is_empty() {
        None
    } else {
        Some(matched.interval.least())
    }
}

fn op_find_node<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    predicates: &[SegmentPredicate<A, T>],
    flags: MatchFlags,
) -> Option<(Interval<A>, Segment<A, T>)> {
    let mut narrowed = state.clone();
    narrowed.limit(1);
    run_match(storage, &narrowed, predicates, flags).nodes.into_iter().next()
}

fn op_nodes<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    predicates: &[SegmentPredicate<A, T>],
    flags: MatchFlags,
) -> Vec<(Interval<A>, Segment<A, T>)> {
    run_match(storage, state, predicates, flags).nodes
}

fn op_read<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    predicates: &[SegmentPredicate<A, T>],
    flags: MatchFlags,
    dst: &mut [T],
) -> Interval<A> {
    debug_assert!(!flags.contains(MatchFlags::NONCONTIGUOUS), "read does not support NONCONTIGUOUS");
    let flags = flags.resolve_contiguous(true);
    let mut narrowed = state.clone();
    narrowed.limit(dst.len());
    let matched = run_match(storage, &narrowed, predicates, flags);
    let mut written = 0usize;
    for (node_interval, segment) in &matched.nodes {
        let part = matched.interval.intersect(node_interval);
        if part.is_empty() {
            continue;
        }
        let n = part.size();
        let offset = part_offset(node_interval, segment, &part);
        let copied = segment.buffer().borrow().read(&mut dst[written..written + n], offset, n);
        assert_full_transfer(storage, copied, n);
        written += n;
    }
    matched.interval
}

impl<'a, A: Address, T> Constraints<'a, A, T> {
    pub fn available(self, flags: MatchFlags) -> Interval<A> {
        op_available(self.map.storage(), &self.state, &self.predicates, flags)
    }

    /// The least (forward) or greatest (backward) address a `limit(1)`
    /// narrowing of this constraint would match, or `None`.
    pub fn next(self, flags: MatchFlags) -> Option<A> {
        op_next(self.map.storage(), &self.state, &self.predicates, flags)
    }

    pub fn exists(self, flags: MatchFlags) -> bool {
        op_next(self.map.storage(), &self.state, &self.predicates, flags).is_some()
    }

    pub fn find_node(self, flags: MatchFlags) -> Option<(Interval<A>, Segment<A, T>)> {
        op_find_node(self.map.storage(), &self.state, &self.predicates, flags)
    }

    pub fn nodes(self, flags: MatchFlags) -> Vec<(Interval<A>, Segment<A, T>)> {
        op_nodes(self.map.storage(), &self.state, &self.predicates, flags)
    }

    pub fn segments(self, flags: MatchFlags) -> Vec<Segment<A, T>> {
        self.nodes(flags).into_iter().map(|(_, segment)| segment).collect()
    }

    /// Copies the matched addresses into `dst`, which also caps the number of
    /// addresses matched (as if by `limit(dst.len())`). In `BACKWARD` mode
    /// `dst` is still filled in ascending address order. Rejects
    /// `NONCONTIGUOUS`.
    pub fn read(self, dst: &mut [T], flags: MatchFlags) -> Interval<A> {
        op_read(self.map.storage(), &self.state, &self.predicates, flags, dst)
    }
}

impl<'a, A: Address, T> ConstraintsMut<'a, A, T> {
    pub fn available(self, flags: MatchFlags) -> Interval<A> {
        let (state, predicates) = self.as_state_and_predicates();
        op_available(self.map.storage(), state, predicates, flags)
    }

    pub fn next(self, flags: MatchFlags) -> Option<A> {
        let (state, predicates) = self.as_state_and_predicates();
        op_next(self.map.storage(), state, predicates, flags)
    }

    pub fn exists(self, flags: MatchFlags) -> bool {
        let (state, predicates) = self.as_state_and_predicates();
        op_next(self.map.storage(), state, predicates, flags).is_some()
    }

    pub fn find_node(self, flags: MatchFlags) -> Option<(Interval<A>, Segment<A, T>)> {
        let (state, predicates) = self.as_state_and_predicates();
        op_find_node(self.map.storage(), state, predicates, flags)
    }

    pub fn nodes(self, flags: MatchFlags) -> Vec<(Interval<A>, Segment<A, T>)> {
        let (state, predicates) = self.as_state_and_predicates();
        op_nodes(self.map.storage(), state, predicates, flags)
    }

    pub fn segments(self, flags: MatchFlags) -> Vec<Segment<A, T>> {
        self.nodes(flags).into_iter().map(|(_, segment)| segment).collect()
    }

    pub fn read(self, dst: &mut [T], flags: MatchFlags) -> Interval<A> {
        let (state, predicates) = self.as_state_and_predicates();
        op_read(self.map.storage(), state, predicates, flags, dst)
    }

    /// Writes `src` into the matched addresses, which also caps the number of
    /// addresses matched (as if by `limit(src.len())`). Implicitly
    /// `prohibit(Access::IMMUTABLE)`s. Any matched node still marked
    /// copy-on-write is cloned to a private buffer before being written
    /// through. With `REVERSE_SOURCE`, `src` is consumed from its end instead
    /// of its start, so the last element of `src` lands at the lowest
    /// written address.
    pub fn write(mut self, src: &[T], flags: MatchFlags) -> Interval<A>
    where
        T: Clone,
    {
        self.state.prohibit(Access::IMMUTABLE);
        self.predicates
            .push(Box::new(|_interval, segment| !segment.buffer().borrow().is_immutable()));
        let flags = flags.resolve_contiguous(true);
        let mut narrowed = self.state.clone();
        narrowed.limit(src.len());
        let matched = run_match(self.map.storage(), &narrowed, &self.predicates, flags);

        let reversed: Vec<T>;
        let effective_src: &[T] = if flags.contains(MatchFlags::REVERSE_SOURCE) {
            reversed = src.iter().rev().cloned().collect();
            &reversed
        } else {
            src
        };

        let mut written = 0usize;
        for (node_interval, _) in &matched.nodes {
            let part = matched.interval.intersect(node_interval);
            if part.is_empty() {
                continue;
            }
            let n = part.size();
            self.map.ensure_unique_buffer(node_interval);
            let segment = self
                .map
                .storage()
                .get(node_interval)
                .expect("node_interval is still a key in this map after the copy-on-write fan-out")
                .clone();
            let offset = part_offset(node_interval, &segment, &part);
            let copied = segment.buffer().borrow_mut().write(&effective_src[written..written + n], offset, n);
            assert_full_transfer(self.map.storage(), copied, n);
            written += n;
        }
        matched.interval
    }

    /// Erases every sub-interval of the matched range whose node satisfies
    /// the full constraint (access bits, name, predicates).
    pub fn prune(self, flags: MatchFlags) -> Interval<A> {
        let flags = flags.resolve_contiguous(false);
        let address_only = ConstraintState {
            required_access: Access::empty(),
            prohibited_access: Access::empty(),
            name_substring: None,
            single_segment: false,
            max_size: usize::MAX,
            ..self.state.clone()
        };
        let broad = run_match(self.map.storage(), &address_only, &[], flags);
        let mut erase_list = Vec::new();
        for (node_interval, segment) in &broad.nodes {
            if matcher::is_satisfied(node_interval, segment, &self.state, &self.predicates) {
                erase_list.push(node_interval.intersect(&broad.interval));
            }
        }
        for interval in erase_list {
            self.map.storage_mut().erase(&interval);
        }
        broad.interval
    }

    /// Erases every sub-interval of the matched range whose node does *not*
    /// satisfy the full constraint — the complement of [`ConstraintsMut::prune`].
    pub fn keep(self, flags: MatchFlags) -> Interval<A> {
        let flags = flags.resolve_contiguous(false);
        let address_only = ConstraintState {
            required_access: Access::empty(),
            prohibited_access: Access::empty(),
            name_substring: None,
            single_segment: false,
            max_size: usize::MAX,
            ..self.state.clone()
        };
        let broad = run_match(self.map.storage(), &address_only, &[], flags);
        if broad.interval.is_empty() {
            return broad.interval;
        }
        let mut keep_intervals: Vec<Interval<A>> = broad
            .nodes
            .iter()
            .filter(|(node_interval, segment)| matcher::is_satisfied(node_interval, segment, &self.state, &self.predicates))
            .map(|(node_interval, _)| node_interval.intersect(&broad.interval))
            .collect();
        keep_intervals.sort();

        let mut erase_list = Vec::new();
        let mut cursor = broad.interval.least();
        let mut reached_max = false;
        for keep in &keep_intervals {
            if !reached_max && keep.least() > cursor {
                let hole_end = keep
                    .least()
                    .checked_sub(A::ONE)
                    .expect("keep.least() > cursor >= 0 implies keep.least() >= 1");
                erase_list.push(Interval::new(cursor, hole_end));
            }
            match keep.greatest().checked_add(A::ONE) {
                Some(next) => cursor = next,
                None => reached_max = true,
            }
        }
        if !reached_max && cursor <= broad.interval.greatest() {
            erase_list.push(Interval::new(cursor, broad.interval.greatest()));
        }
        for interval in erase_list {
            self.map.storage_mut().erase(&interval);
        }
        broad.interval
    }

    /// Adds `required` and removes `prohibited` from the access bits of
    /// every matched node, splitting a node that's only partially covered.
    pub fn change_access(self, required: Access, prohibited: Access, flags: MatchFlags) -> Interval<A> {
        let flags = flags.resolve_contiguous(false);
        let matched = run_match(self.map.storage(), &self.state, &self.predicates, flags);

        enum Update<A: Address, T> {
            InPlace(Interval<A>, Access),
            Insert(Interval<A>, Segment<A, T>),
        }
        let mut updates = Vec::new();
        for (node_interval, segment) in &matched.nodes {
            let to_change = node_interval.intersect(&matched.interval);
            if to_change.is_empty() {
                continue;
            }
            let new_access = (segment.access() | required) & !prohibited;
            if to_change == *node_interval {
                updates.push(Update::InPlace(*node_interval, new_access));
            } else {
                let mut new_segment = segment.clone();
                let delta = to_change
                    .least()
                    .checked_sub(node_interval.least())
                    .expect("to_change is a sub-interval of node_interval");
                let new_offset = segment
                    .offset()
                    .checked_add(delta)
                    .expect("segment covers the whole of node_interval, so offset + delta is in range");
                new_segment.set_offset(new_offset);
                new_segment.set_access(new_access);
                updates.push(Update::Insert(to_change, new_segment));
            }
        }
        for update in updates {
            match update {
                Update::InPlace(interval, new_access) => {
                    if let Some(value) = self.map.storage_mut().get_mut(&interval) {
                        value.set_access(new_access);
                    }
                }
                Update::Insert(interval, segment) => self.map.storage_mut().insert(interval, segment),
            }
        }
        matched.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VecBuffer;

    fn buffer(n: usize) -> crate::buffer::BufferHandle<u32, u8> {
        VecBuffer::<u8>::zeroed(n).into_handle()
    }

    #[test]
    fn insert_and_find_node() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 99), Segment::new(buffer(100), 0).with_access(Access::READABLE));
        assert_eq!(m.n_segments(), 1);
        let (interval, segment) = m.find_node(50).unwrap();
        assert_eq!(*interval, Interval::new(0, 99));
        assert!(segment.is_accessible(Access::READABLE, Access::empty()));
    }

    #[test]
    fn checked_insert_rejects_overlap() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 9), Segment::new(buffer(10), 0));
        assert!(m.checked_insert(Interval::new(5, 14), Segment::new(buffer(10), 0)).is_err());
        assert!(m.checked_insert(Interval::new(10, 19), Segment::new(buffer(10), 0)).is_ok());
        assert_eq!(m.n_segments(), 2);
    }

    #[test]
    fn read_copies_matched_bytes_in_address_order() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        let buf = VecBuffer::<u8>::new((0..100).collect()).into_handle();
        m.insert(Interval::new(1000, 1099), Segment::new(buf, 0).with_access(Access::READABLE));
        let mut dst = [0u8; 10];
        let matched = m.constraints().within(1005, 1014).read(&mut dst, MatchFlags::empty());
        assert_eq!(matched, Interval::new(1005, 1014));
        assert_eq!(dst, [5, 6, 7, 8, 9, 10, 11, 12, 13, 14]);
    }

    #[test]
    fn write_triggers_cow_fan_out_without_disturbing_sibling() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        let shared = VecBuffer::<u8>::zeroed(10).into_handle();
        m.insert(Interval::new(0, 9), Segment::new(shared.clone(), 0).with_access(Access::WRITABLE).with_cow(true));
        m.insert(Interval::new(100, 109), Segment::new(shared.clone(), 0).with_access(Access::WRITABLE).with_cow(true));

        m.constraints_mut().at_or_after(0).at_or_before(9).write(&[1; 10], MatchFlags::empty());

        let mut dst = [0u8; 10];
        m.constraints().at_or_after(100).at_or_before(109).read(&mut dst, MatchFlags::empty());
        assert_eq!(dst, [0; 10]);
        assert!(!m.find_node(0).unwrap().1.is_copy_on_write());
        assert!(m.find_node(100).unwrap().1.is_copy_on_write());
    }

    #[test]
    fn write_rejects_immutable_segment() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 9), Segment::new(buffer(10), 0).with_access(Access::IMMUTABLE));
        let matched = m.constraints_mut().write(&[1; 10], MatchFlags::empty());
        assert!(matched.is_empty());
    }

    #[test]
    fn write_rejects_immutable_buffer_even_without_the_access_bit() {
        use crate::buffer::ImmutableBuffer;
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        let buf = ImmutableBuffer::<u8>::new(vec![9; 10]).into_handle();
        m.insert(Interval::new(0, 9), Segment::new(buf, 0).with_access(Access::WRITABLE));
        let matched = m.constraints_mut().write(&[1; 10], MatchFlags::empty());
        assert!(matched.is_empty());
        let mut dst = [0u8; 10];
        m.constraints().read(&mut dst, MatchFlags::empty());
        assert_eq!(dst, [9; 10]);
    }

    #[test]
    fn prune_removes_only_satisfying_nodes() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 9), Segment::new(buffer(10), 0).with_access(Access::READABLE));
        m.insert(Interval::new(10, 19), Segment::new(buffer(10), 0).with_access(Access::WRITABLE));
        m.constraints_mut().require(Access::WRITABLE).prune(MatchFlags::empty());
        assert!(m.find_node(15).is_none());
        assert!(m.find_node(5).is_some());
    }

    #[test]
    fn keep_removes_non_satisfying_nodes() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 9), Segment::new(buffer(10), 0).with_access(Access::READABLE));
        m.insert(Interval::new(10, 19), Segment::new(buffer(10), 0).with_access(Access::WRITABLE));
        m.constraints_mut().require(Access::WRITABLE).keep(MatchFlags::empty());
        assert!(m.find_node(5).is_none());
        assert!(m.find_node(15).is_some());
    }

    #[test]
    fn change_access_splits_partially_covered_node() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 99), Segment::new(buffer(100), 0).with_access(Access::READABLE));
        m.constraints_mut()
            .within(10, 19)
            .change_access(Access::WRITABLE, Access::empty(), MatchFlags::empty());
        assert_eq!(m.n_segments(), 3);
        let (_, middle) = m.find_node(15).unwrap();
        assert!(middle.is_accessible(Access::READABLE | Access::WRITABLE, Access::empty()));
        let (_, left) = m.find_node(5).unwrap();
        assert!(!left.is_accessible(Access::WRITABLE, Access::empty()));
    }

    #[test]
    fn next_and_exists_reflect_constraint() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 9), Segment::new(buffer(10), 0).with_access(Access::READABLE));
        assert_eq!(m.constraints().require(Access::WRITABLE).next(MatchFlags::empty()), None);
        assert_eq!(m.constraints().require(Access::READABLE).next(MatchFlags::empty()), Some(0));
        assert!(m.constraints().require(Access::READABLE).exists(MatchFlags::empty()));
    }

    #[test]
    fn unmapped_finds_gap() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 9), Segment::new(buffer(10), 0));
        m.insert(Interval::new(20, 29), Segment::new(buffer(10), 0));
        assert_eq!(m.unmapped(0, MatchFlags::empty()), Interval::new(10, 19));
    }

    #[test]
    fn find_free_space_respects_alignment_and_restriction() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 0x0fff), Segment::new(buffer(0x1000), 0));
        let restriction = Interval::new(0, 0xffff);
        let found = m.find_free_space(0x100, 0x1000, restriction, MatchFlags::empty()).unwrap().unwrap();
        assert_eq!(found.least(), 0x1000);
        assert_eq!(found.size(), 0x100);
    }

    #[test]
    fn find_free_space_rejects_zero_size() {
        let m: AddressMap<u32, u8> = AddressMap::new();
        assert!(matches!(
            m.find_free_space(0, 1, Interval::whole(), MatchFlags::empty()),
            Err(AddressMapError::InvalidConstraint { .. })
        ));
    }

    #[test]
    fn check_consistency_flags_short_buffer() {
        let mut m: AddressMap<u32, u8> = AddressMap::new();
        m.insert(Interval::new(0, 99), Segment::new(buffer(50), 0));
        assert!(m.check_consistency().is_err());
    }
}
