//! The forward/backward matcher: turns a narrowed [`ConstraintState`] plus a
//! set of segment predicates into the concrete set of nodes and the address
//! interval they cover.
//!
//! Ported directly from the original's `constraintLowerBound`/
//! `constraintUpperBound`/`matchForward`/`matchBackward` (see
//! `util/sawyer/AddressMap.h`). The original walks `std::map` iterators one
//! step at a time, including a one-past-the-end sentinel for the upper
//! bound; this version instead tracks the *last included key* directly and
//! advances with [`IntervalMap::key_after`]/[`IntervalMap::key_before`],
//! which reads more naturally in Rust and sidesteps the need for a sentinel
//! iterator value.

use crate::access::MatchFlags;
use crate::address::Address;
use crate::constraints::ConstraintState;
use crate::interval::Interval;
use crate::interval_map::IntervalMap;
use crate::segment::{Segment, SegmentMergePolicy, SegmentPredicate};

type Storage<A, T> = IntervalMap<A, Segment<A, T>, SegmentMergePolicy>;

/// The result of a [`match_forward`]/[`match_backward`] search: the address
/// interval actually matched, and the nodes (in ascending order) that cover
/// it. Empty (`interval.is_empty()`) when nothing matched.
pub struct MatchedConstraints<A: Address, T> {
    pub interval: Interval<A>,
    pub nodes: Vec<(Interval<A>, Segment<A, T>)>,
}

impl<A: Address, T> MatchedConstraints<A, T> {
    fn empty() -> Self {
        MatchedConstraints {
            interval: Interval::empty(),
            nodes: Vec::new(),
        }
    }
}

pub(crate) fn is_satisfied<A: Address, T>(
    interval: &Interval<A>,
    segment: &Segment<A, T>,
    state: &ConstraintState<A>,
    predicates: &[SegmentPredicate<A, T>],
) -> bool {
    segment.is_accessible(state.required_access, state.prohibited_access)
        && state
            .name_substring
            .as_deref()
            .is_none_or(|s| segment.name().contains(s))
        && predicates.iter().all(|p| p(interval, segment))
}

/// Number of addresses covered by `key`'s interval that are `>= floor` and
/// `<= ceiling`, saturating to `usize::MAX` rather than reporting the
/// size-0 overflow sentinel for a segment spanning (close to) the whole
/// address space.
fn bounded_size<A: Address>(key: Interval<A>, floor: A, ceiling: A) -> usize {
    let part = Interval::hull(floor.max(key.least()), ceiling.min(key.greatest()));
    let n = part.size();
    if n == 0 { usize::MAX } else { n }
}

/// First node (in ascending order) a match could start from, and the lowest
/// address the overall matched interval can report. `use_anchor` mirrors
/// the original's two call sites: forward matching anchors on `anchored`
/// when present, backward matching never does (the anchor is checked against
/// the *upper* bound instead, see [`upper_bound_node`]).
fn lower_bound_node<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    use_anchor: bool,
) -> Option<(Interval<A>, A)> {
    if state.never || storage.is_empty() {
        return None;
    }
    if use_anchor
        && let Some(anchored) = state.anchored
    {
        if let Some(least) = state.least
            && least > anchored.least()
        {
            return None;
        }
        if let Some(greatest) = state.greatest
            && greatest < anchored.greatest()
        {
            return None;
        }
        let (key, _) = storage.lower_bound(anchored.least())?;
        if !key.contains(anchored.least()) {
            return None;
        }
        return Some((*key, anchored.least()));
    }
    if let Some(least) = state.least {
        let (key, _) = storage.lower_bound(least)?;
        return Some((*key, least.max(key.least())));
    }
    let (key, _) = storage.nodes().next()?;
    Some((*key, key.least()))
}

/// Last node (in ascending order) a match could end at, and the highest
/// address the overall matched interval can report.
fn upper_bound_node<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    use_anchor: bool,
) -> Option<(Interval<A>, A)> {
    if state.never || storage.is_empty() {
        return None;
    }
    if use_anchor
        && let Some(anchored) = state.anchored
    {
        if let Some(least) = state.least
            && least > anchored.least()
        {
            return None;
        }
        if let Some(greatest) = state.greatest
            && greatest < anchored.greatest()
        {
            return None;
        }
        let (key, _) = storage.find_prior(anchored.greatest())?;
        if key.greatest() < anchored.greatest() {
            return None;
        }
        return Some((*key, anchored.greatest()));
    }
    if let Some(greatest) = state.greatest {
        let (key, _) = storage.find_prior(greatest)?;
        return Some((*key, key.greatest().min(greatest)));
    }
    let (key, _) = storage.nodes().next_back()?;
    Some((*key, key.greatest()))
}

fn collect_ascending<A: Address, T>(
    storage: &Storage<A, T>,
    first: Interval<A>,
    last: Interval<A>,
) -> Vec<(Interval<A>, Segment<A, T>)> {
    let mut nodes = Vec::new();
    let mut key = first;
    loop {
        let segment = storage.get(&key).expect("key came from this map's own nodes").clone();
        nodes.push((key, segment));
        if key == last {
            break;
        }
        key = storage
            .key_after(&key)
            .expect("last lies strictly after key in ascending order, so a successor must exist");
    }
    nodes
}

/// Finds the nodes a `CONTIGUOUS`/non-`BACKWARD` (or any non-address-only)
/// match would cover, scanning from the lowest matching address upward.
pub(crate) fn match_forward<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    predicates: &[SegmentPredicate<A, T>],
    flags: MatchFlags,
) -> MatchedConstraints<A, T> {
    let Some((mut begin_key, mut min_addr)) = lower_bound_node(storage, state, true) else {
        return MatchedConstraints::empty();
    };
    let Some((ub_key, mut max_addr)) = upper_bound_node(storage, state, false) else {
        return MatchedConstraints::empty();
    };
    let end_key = storage.key_after(&ub_key);

    // Advance `begin_key` past any unsatisfying nodes, bailing out if an
    // anchored match's single candidate fails or we run past `end_key`.
    loop {
        if end_key.is_some_and(|ek| begin_key >= ek) {
            return MatchedConstraints::empty();
        }
        let segment = storage.get(&begin_key).expect("begin_key came from this map's own nodes");
        if is_satisfied(&begin_key, segment, state, predicates) {
            break;
        }
        if state.anchored.is_some() {
            return MatchedConstraints::empty();
        }
        begin_key = storage.key_after(&begin_key).expect("begin_key < end_key implies a successor exists");
    }
    min_addr = min_addr.max(begin_key.least());

    let contiguous = flags.is_contiguous();
    let last_key;
    if contiguous || state.has_non_address_constraints(predicates.len()) {
        let mut addr = min_addr;
        let mut n_found = 0usize;
        let mut cur = begin_key;
        let mut first = true;
        let stop_key;
        loop {
            if end_key.is_some_and(|ek| cur >= ek) {
                stop_key = Some(cur);
                break;
            }
            if !first {
                if state.single_segment {
                    stop_key = Some(cur);
                    break;
                }
                if contiguous && addr.checked_add(A::ONE) != Some(cur.least()) {
                    stop_key = Some(cur);
                    break;
                }
                let segment = storage.get(&cur).expect("cur came from this map's own nodes");
                if !is_satisfied(&cur, segment, state, predicates) {
                    if flags.is_whole() {
                        return MatchedConstraints::empty();
                    }
                    stop_key = Some(cur);
                    break;
                }
            }
            first = false;
            let n_here = bounded_size(cur, min_addr, A::MAX);
            if state.max_size != usize::MAX && n_found.saturating_add(n_here) >= state.max_size {
                let n_need = state.max_size - n_found;
                addr = min_addr.max(cur.least()).checked_add_usize(n_need - 1).unwrap_or(A::MAX);
                stop_key = storage.key_after(&cur);
                break;
            }
            addr = cur.greatest();
            n_found += n_here;
            match storage.key_after(&cur) {
                Some(next) => cur = next,
                None => {
                    stop_key = None;
                    break;
                }
            }
        }
        max_addr = max_addr.min(addr);
        last_key = match stop_key {
            Some(sk) => storage.key_before(&sk).expect("begin_key always precedes stop_key"),
            None => *storage.nodes().next_back().expect("storage is non-empty").0,
        };
    } else {
        last_key = ub_key;
    }

    let interval = Interval::hull(min_addr, max_addr);
    let nodes = collect_ascending(storage, begin_key, last_key);
    MatchedConstraints { interval, nodes }
}

/// Finds the nodes a `BACKWARD` match would cover, scanning from the highest
/// matching address downward.
pub(crate) fn match_backward<A: Address, T>(
    storage: &Storage<A, T>,
    state: &ConstraintState<A>,
    predicates: &[SegmentPredicate<A, T>],
    flags: MatchFlags,
) -> MatchedConstraints<A, T> {
    let Some((begin_key, mut min_addr)) = lower_bound_node(storage, state, false) else {
        return MatchedConstraints::empty();
    };
    let Some((ub_key, mut max_addr)) = upper_bound_node(storage, state, true) else {
        return MatchedConstraints::empty();
    };

    // Walk downward from `ub_key` until a satisfying node is found.
    let mut probe = ub_key;
    loop {
        if probe < begin_key {
            return MatchedConstraints::empty();
        }
        let segment = storage.get(&probe).expect("probe came from this map's own nodes");
        if is_satisfied(&probe, segment, state, predicates) {
            break;
        }
        if state.anchored.is_some() {
            return MatchedConstraints::empty();
        }
        probe = match storage.key_before(&probe) {
            Some(k) => k,
            None => return MatchedConstraints::empty(),
        };
    }
    let last_key = probe;
    max_addr = max_addr.min(last_key.greatest());

    let contiguous = flags.is_contiguous();
    let first_key;
    if contiguous || state.has_non_address_constraints(predicates.len()) {
        let mut addr = max_addr;
        let mut n_found = 0usize;
        let mut cur = last_key;
        let mut first = true;
        let result_first;
        loop {
            if !first {
                if state.single_segment {
                    result_first = storage.key_after(&cur).expect("cur has a successor: last_key >= cur");
                    break;
                }
                if contiguous && cur.greatest().checked_add(A::ONE) != Some(addr) {
                    result_first = storage.key_after(&cur).expect("cur has a successor: last_key >= cur");
                    break;
                }
                let segment = storage.get(&cur).expect("cur came from this map's own nodes");
                if !is_satisfied(&cur, segment, state, predicates) {
                    if flags.is_whole() {
                        return MatchedConstraints::empty();
                    }
                    result_first = storage.key_after(&cur).expect("cur has a successor: last_key >= cur");
                    break;
                }
            }
            first = false;
            let n_here = bounded_size(cur, A::ZERO, max_addr);
            if state.max_size != usize::MAX && n_found.saturating_add(n_here) >= state.max_size {
                let n_need = state.max_size - n_found;
                addr = max_addr
                    .min(cur.greatest())
                    .checked_sub_usize(n_need - 1)
                    .unwrap_or(A::ZERO);
                result_first = cur;
                break;
            }
            addr = cur.least();
            n_found += n_here;
            if cur == begin_key {
                result_first = begin_key;
                break;
            }
            cur = storage
                .key_before(&cur)
                .expect("cur > begin_key implies a predecessor exists");
        }
        min_addr = min_addr.max(addr);
        first_key = result_first;
    } else {
        first_key = begin_key;
    }

    let interval = Interval::hull(min_addr, max_addr);
    let nodes = collect_ascending(storage, first_key, last_key);
    MatchedConstraints { interval, nodes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Access;
    use crate::buffer::VecBuffer;

    type TestStorage = Storage<u32, u8>;

    fn seg(buf: &crate::buffer::BufferHandle<u32, u8>, offset: u32, name: &str) -> Segment<u32, u8> {
        Segment::new(buf.clone(), offset).with_access(Access::READABLE).with_name(name)
    }

    fn sample() -> TestStorage {
        let mut storage = TestStorage::new();
        let buf = VecBuffer::<u8>::zeroed(1000).into_handle();
        storage.insert(Interval::new(0u32, 9), seg(&buf, 0, "a"));
        storage.insert(Interval::new(20u32, 29), seg(&buf, 100, "b"));
        storage.insert(Interval::new(30u32, 39), seg(&buf, 200, "c"));
        storage
    }

    #[test]
    fn forward_match_skips_gap_to_find_satisfying_node() {
        let storage = sample();
        let state = ConstraintState { least: Some(15), ..Default::default() };
        let result = match_forward(&storage, &state, &[], MatchFlags::NONCONTIGUOUS);
        assert_eq!(result.interval, Interval::new(20, 39));
        assert_eq!(result.nodes.len(), 2);
    }

    #[test]
    fn forward_contiguous_stops_at_gap() {
        let storage = sample();
        let state = ConstraintState::default();
        let result = match_forward(&storage, &state, &[], MatchFlags::CONTIGUOUS);
        assert_eq!(result.interval, Interval::new(0, 9));
        assert_eq!(result.nodes.len(), 1);
    }

    #[test]
    fn forward_contiguous_crosses_adjacent_nodes() {
        let storage = sample();
        let state = ConstraintState { least: Some(20), ..Default::default() };
        let result = match_forward(&storage, &state, &[], MatchFlags::CONTIGUOUS);
        assert_eq!(result.interval, Interval::new(20, 39));
        assert_eq!(result.nodes.len(), 2);
    }

    #[test]
    fn forward_anchored_miss_returns_empty() {
        let storage = sample();
        let mut state = ConstraintState::default();
        state.at(15);
        let result = match_forward(&storage, &state, &[], MatchFlags::empty());
        assert!(result.interval.is_empty());
        assert!(result.nodes.is_empty());
    }

    #[test]
    fn backward_match_finds_highest_satisfying_run() {
        let storage = sample();
        let state = ConstraintState::default();
        let result = match_backward(&storage, &state, &[], MatchFlags::CONTIGUOUS | MatchFlags::BACKWARD);
        assert_eq!(result.interval, Interval::new(20, 39));
        assert_eq!(result.nodes.len(), 2);
    }

    #[test]
    fn backward_anchored_at_gap_misses() {
        let storage = sample();
        let mut state = ConstraintState::default();
        state.at(15);
        let result = match_backward(&storage, &state, &[], MatchFlags::BACKWARD);
        assert!(result.interval.is_empty());
    }

    #[test]
    fn limit_truncates_forward_match() {
        let storage = sample();
        let mut state = ConstraintState { least: Some(20), ..Default::default() };
        state.limit(5);
        let result = match_forward(&storage, &state, &[], MatchFlags::CONTIGUOUS);
        assert_eq!(result.interval, Interval::new(20, 24));
        assert_eq!(result.nodes.len(), 1);
    }
}
