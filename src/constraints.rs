//! The constraint algebra: composable, immutable (each call narrows and
//! returns a new value) filters over address and segment predicates.
//!
//! The original C++ curries these by value while binding to the map by
//! pointer (`AddressMapConstraints<AddressMap>` holding `AddressMap *map_`).
//! Rust's borrow checker gives us the const/mutable split the design notes
//! ask for directly: [`Constraints`] borrows the map with `&'a AddressMap`,
//! [`ConstraintsMut`] with `&'a mut AddressMap`, and both share their
//! narrowing logic through the [`ConstraintBuilder`] trait instead of the
//! original's template-duplicated class.

use crate::access::Access;
use crate::address::Address;
use crate::error::AddressMapError;
use crate::interval::Interval;
use crate::map::AddressMap;
use crate::segment::SegmentPredicate;

/// The narrowing state shared by [`Constraints`] and [`ConstraintsMut`].
///
/// Kept separate from the segment-predicate list (which needs the `T` type
/// parameter) so most of the builder logic doesn't have to be generic over
/// `T` at all.
#[derive(Clone)]
pub(crate) struct ConstraintState<A: Address> {
    pub(crate) never: bool,
    pub(crate) least: Option<A>,
    pub(crate) greatest: Option<A>,
    pub(crate) anchored: Option<Interval<A>>,
    pub(crate) max_size: usize,
    pub(crate) single_segment: bool,
    pub(crate) required_access: Access,
    pub(crate) prohibited_access: Access,
    pub(crate) name_substring: Option<String>,
    /// Set when the chain hit a usage error (currently: conflicting `substr`
    /// calls) rather than a legitimately unsatisfiable narrowing. `never` is
    /// set alongside this so existing terminal operations keep matching
    /// nothing; [`ConstraintBuilder::into_result`] is how a caller turns this
    /// back into the `AddressMapError::InvalidConstraint` §7 names for it.
    pub(crate) invalid_reason: Option<String>,
}

impl<A: Address> Default for ConstraintState<A> {
    fn default() -> Self {
        ConstraintState {
            never: false,
            least: None,
            greatest: None,
            anchored: None,
            max_size: usize::MAX,
            single_segment: false,
            required_access: Access::empty(),
            prohibited_access: Access::empty(),
            name_substring: None,
            invalid_reason: None,
        }
    }
}

impl<A: Address> ConstraintState<A> {
    pub(crate) fn none(&mut self) {
        self.never = true;
    }

    /// Marks the chain both unsatisfiable and invalid: `never` so existing
    /// silent-empty-match terminal operations keep working unchanged, plus
    /// `invalid_reason` so [`ConstraintBuilder::into_result`] can surface a
    /// real `AddressMapError::InvalidConstraint` instead.
    pub(crate) fn invalidate(&mut self, reason: String) {
        self.never = true;
        self.invalid_reason = Some(reason);
    }

    pub(crate) fn require(&mut self, bits: Access) {
        self.required_access |= bits;
    }

    pub(crate) fn prohibit(&mut self, bits: Access) {
        self.prohibited_access |= bits;
    }

    /// Requires the segment's name to contain `s`. Calling this twice with
    /// two different strings has no well-defined conjunction (the original
    /// doesn't support it either), so it invalidates the chain rather than
    /// silently keeping the second value.
    pub(crate) fn substr(&mut self, s: String) {
        if let Some(prev) = &self.name_substring
            && prev.as_str() != s.as_str()
        {
            self.invalidate(format!("substr called twice with differing strings: {prev:?} vs {s:?}"));
            return;
        }
        self.name_substring = Some(s);
    }

    pub(crate) fn at(&mut self, x: A) {
        let point = Interval::singleton(x);
        self.anchored = Some(match self.anchored {
            Some(prev) => prev.intersect(&point),
            None => point,
        });
        if self.anchored.unwrap().is_empty() {
            self.none();
        }
    }

    pub(crate) fn at_interval(&mut self, x: Interval<A>) {
        self.anchored = Some(match self.anchored {
            Some(prev) => prev.intersect(&x),
            None => x,
        });
        let anchored = self.anchored.unwrap();
        if anchored.is_empty() {
            self.none();
        } else {
            self.at_or_after(anchored.least());
            self.at_or_before(anchored.greatest());
        }
    }

    pub(crate) fn limit(&mut self, n: usize) {
        self.max_size = self.max_size.min(n);
        if self.max_size == 0 {
            self.none();
        }
    }

    pub(crate) fn at_or_after(&mut self, least: A) {
        self.least = Some(match self.least {
            Some(prev) => prev.max(least),
            None => least,
        });
        if let Some(greatest) = self.greatest
            && greatest < self.least.unwrap()
        {
            self.none();
        }
    }

    pub(crate) fn at_or_before(&mut self, greatest: A) {
        self.greatest = Some(match self.greatest {
            Some(prev) => prev.min(greatest),
            None => greatest,
        });
        if let Some(least) = self.least
            && least > self.greatest.unwrap()
        {
            self.none();
        }
    }

    pub(crate) fn within(&mut self, lo: A, hi: A) {
        match Interval::try_new(lo, hi) {
            Some(_) => {
                self.at_or_after(lo);
                self.at_or_before(hi);
            }
            None => self.none(),
        }
    }

    pub(crate) fn base_size(&mut self, base: A, size: usize) {
        if size == 0 {
            self.none();
            return;
        }
        match base.checked_add_usize(size - 1) {
            Some(hi) => self.within(base, hi),
            None => self.none(),
        }
    }

    pub(crate) fn after(&mut self, x: A) {
        match x.checked_add(A::ONE) {
            Some(v) => self.at_or_after(v),
            None => self.none(),
        }
    }

    pub(crate) fn before(&mut self, x: A) {
        match x.checked_sub(A::ONE) {
            Some(v) => self.at_or_before(v),
            None => self.none(),
        }
    }

    pub(crate) fn has_non_address_constraints(&self, predicate_count: usize) -> bool {
        !self.never
            && (!self.required_access.is_empty()
                || !self.prohibited_access.is_empty()
                || self.name_substring.is_some()
                || self.max_size != usize::MAX
                || self.single_segment
                || predicate_count > 0)
    }
}

/// Builder methods shared by [`Constraints`] and [`ConstraintsMut`].
///
/// All methods are monotonic: later calls only ever narrow the constraint,
/// never widen it. Implemented as default methods over a small set of
/// accessor methods so the narrowing logic itself lives in exactly one
/// place ([`ConstraintState`]'s methods) instead of being duplicated across
/// the two borrow-kinds.
pub trait ConstraintBuilder<A: Address, T>: Sized {
    #[doc(hidden)]
    fn state_mut(&mut self) -> &mut ConstraintState<A>;
    #[doc(hidden)]
    fn state(&self) -> &ConstraintState<A>;
    #[doc(hidden)]
    fn predicates_mut(&mut self) -> &mut Vec<SegmentPredicate<A, T>>;
    #[doc(hidden)]
    fn predicates(&self) -> &[SegmentPredicate<A, T>];

    /// Matches anything (the identity constraint).
    fn any(self) -> Self {
        self
    }

    /// Matches nothing.
    fn none(mut self) -> Self {
        self.state_mut().none();
        self
    }

    /// Requires every bit in `bits` to be set on a segment's access.
    fn require(mut self, bits: Access) -> Self {
        self.state_mut().require(bits);
        self
    }

    /// Forbids every bit in `bits` from being set on a segment's access.
    fn prohibit(mut self, bits: Access) -> Self {
        self.state_mut().prohibit(bits);
        self
    }

    /// Requires the segment's name to contain `s`. Calling this twice with
    /// two different strings is a usage error (name-substring conjunction
    /// isn't supported): the chain becomes unsatisfiable and carries an
    /// `InvalidConstraint` diagnostic that [`ConstraintBuilder::into_result`]
    /// surfaces.
    fn substr(mut self, s: impl Into<String>) -> Self {
        self.state_mut().substr(s.into());
        self
    }

    /// Anchors the match to exactly address `x`.
    fn at(mut self, x: A) -> Self {
        self.state_mut().at(x);
        self
    }

    /// Anchors the match to `interval`, also tightening `least`/`greatest`
    /// to that interval.
    fn at_interval(mut self, x: Interval<A>) -> Self {
        self.state_mut().at_interval(x);
        self
    }

    /// Caps the number of matched addresses at `n`. `n == 0` makes the
    /// constraint unsatisfiable.
    fn limit(mut self, n: usize) -> Self {
        self.state_mut().limit(n);
        self
    }

    fn at_or_after(mut self, least: A) -> Self {
        self.state_mut().at_or_after(least);
        self
    }

    fn at_or_before(mut self, greatest: A) -> Self {
        self.state_mut().at_or_before(greatest);
        self
    }

    fn within(mut self, lo: A, hi: A) -> Self {
        self.state_mut().within(lo, hi);
        self
    }

    fn base_size(mut self, base: A, size: usize) -> Self {
        self.state_mut().base_size(base, size);
        self
    }

    /// `at_or_after(x + 1)`; unsatisfiable if `x == A::MAX`.
    fn after(mut self, x: A) -> Self {
        self.state_mut().after(x);
        self
    }

    /// `at_or_before(x - 1)`; unsatisfiable if `x == A::ZERO`.
    fn before(mut self, x: A) -> Self {
        self.state_mut().before(x);
        self
    }

    /// Forbids crossing a segment boundary.
    fn single_segment(mut self) -> Self {
        self.state_mut().single_segment = true;
        self
    }

    /// Appends a user-supplied `(interval, segment) -> bool` predicate.
    fn segment_predicate(mut self, p: SegmentPredicate<A, T>) -> Self {
        self.predicates_mut().push(p);
        self
    }

    /// True iff this constraint filters beyond pure address bounds (access
    /// bits, name, size cap, single-segment, user predicates). Operations
    /// use this to decide whether they need to iterate segment-by-segment
    /// or can take the faster address-only path.
    fn has_non_address_constraints(&self) -> bool {
        self.state().has_non_address_constraints(self.predicates().len())
    }

    /// Checks the chain for a usage error (currently: conflicting `substr`
    /// calls) built up by prior builder calls, distinct from a merely
    /// unsatisfiable narrowing (e.g. `within(10, 5)`). Per §7,
    /// `InvalidConstraint` is a surfaced error kind rather than something a
    /// terminal operation quietly matches nothing against, so terminal
    /// operations don't call this automatically — a caller who wants the
    /// distinction should check before invoking one.
    fn into_result(self) -> Result<Self, AddressMapError> {
        match self.state().invalid_reason.clone() {
            Some(reason) => Err(AddressMapError::InvalidConstraint { reason }),
            None => Ok(self),
        }
    }
}

/// A read-only constraint bound to an `&AddressMap`.
pub struct Constraints<'a, A: Address, T> {
    pub(crate) map: &'a AddressMap<A, T>,
    pub(crate) state: ConstraintState<A>,
    pub(crate) predicates: Vec<SegmentPredicate<A, T>>,
}

impl<'a, A: Address, T> Constraints<'a, A, T> {
    pub(crate) fn new(map: &'a AddressMap<A, T>) -> Self {
        Constraints {
            map,
            state: ConstraintState::default(),
            predicates: Vec::new(),
        }
    }

    pub fn map(&self) -> &AddressMap<A, T> {
        self.map
    }
}

impl<'a, A: Address, T> ConstraintBuilder<A, T> for Constraints<'a, A, T> {
    fn state_mut(&mut self) -> &mut ConstraintState<A> {
        &mut self.state
    }
    fn state(&self) -> &ConstraintState<A> {
        &self.state
    }
    fn predicates_mut(&mut self) -> &mut Vec<SegmentPredicate<A, T>> {
        &mut self.predicates
    }
    fn predicates(&self) -> &[SegmentPredicate<A, T>] {
        &self.predicates
    }
}

/// A mutating constraint bound to an `&mut AddressMap`, used by `write`,
/// `prune`, `keep`, and `change_access`.
pub struct ConstraintsMut<'a, A: Address, T> {
    pub(crate) map: &'a mut AddressMap<A, T>,
    pub(crate) state: ConstraintState<A>,
    pub(crate) predicates: Vec<SegmentPredicate<A, T>>,
}

impl<'a, A: Address, T> ConstraintsMut<'a, A, T> {
    pub(crate) fn new(map: &'a mut AddressMap<A, T>) -> Self {
        ConstraintsMut {
            map,
            state: ConstraintState::default(),
            predicates: Vec::new(),
        }
    }

    /// Drops down to a read-only view of the same narrowing state, useful
    /// for operations (like `write`) that need an address-only pre-pass
    /// before taking the mutable path.
    pub(crate) fn as_state_and_predicates(&self) -> (&ConstraintState<A>, &[SegmentPredicate<A, T>]) {
        (&self.state, &self.predicates)
    }
}

impl<'a, A: Address, T> ConstraintBuilder<A, T> for ConstraintsMut<'a, A, T> {
    fn state_mut(&mut self) -> &mut ConstraintState<A> {
        &mut self.state
    }
    fn state(&self) -> &ConstraintState<A> {
        &self.state
    }
    fn predicates_mut(&mut self) -> &mut Vec<SegmentPredicate<A, T>> {
        &mut self.predicates
    }
    fn predicates(&self) -> &[SegmentPredicate<A, T>] {
        &self.predicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VecBuffer;
    use crate::segment::Segment;

    fn test_map() -> AddressMap<u32, u8> {
        let mut m = AddressMap::new();
        let buf = VecBuffer::<u8>::zeroed(100).into_handle();
        m.insert(Interval::new(0, 99), Segment::new(buf, 0).with_access(Access::READABLE));
        m
    }

    #[test]
    fn limit_zero_is_never() {
        let m = test_map();
        let c = m.constraints().limit(0);
        assert!(c.state.never);
    }

    #[test]
    fn at_or_after_conflicting_with_greatest_is_never() {
        let m = test_map();
        let c = m.constraints().at_or_before(10).at_or_after(20);
        assert!(c.state.never);
    }

    #[test]
    fn at_interval_tightens_bounds() {
        let m = test_map();
        let c = m.constraints().at_interval(Interval::new(5u32, 15));
        assert_eq!(c.state.least, Some(5));
        assert_eq!(c.state.greatest, Some(15));
        assert_eq!(c.state.anchored, Some(Interval::new(5, 15)));
    }

    #[test]
    fn after_max_is_never() {
        let m = test_map();
        let c = m.constraints().after(u32::MAX);
        assert!(c.state.never);
    }

    #[test]
    fn before_zero_is_never() {
        let m = test_map();
        let c = m.constraints().before(0u32);
        assert!(c.state.never);
    }

    #[test]
    fn repeated_substr_with_same_string_is_fine() {
        let m = test_map();
        let c = m.constraints().substr("foo").substr("foo");
        assert!(!c.state.never);
        assert!(c.into_result().is_ok());
    }

    #[test]
    fn conflicting_substr_calls_invalidate_the_chain() {
        let m = test_map();
        let c = m.constraints().substr("foo").substr("bar");
        assert!(c.state.never);
        assert!(c.state.invalid_reason.is_some());
        match c.into_result() {
            Err(AddressMapError::InvalidConstraint { reason }) => {
                assert!(reason.contains("foo") && reason.contains("bar"));
            }
            Ok(_) => panic!("expected InvalidConstraint"),
        }
    }

    #[test]
    fn into_result_passes_through_a_plain_unsatisfiable_narrowing() {
        // `within(10, 5)` is unsatisfiable but not a usage error — it has no
        // `invalid_reason`, so `into_result` must not turn it into an Err.
        let m = test_map();
        let c = m.constraints().within(10u32, 5);
        assert!(c.state.never);
        assert!(c.state.invalid_reason.is_none());
        assert!(c.into_result().is_ok());
    }

    #[test]
    fn has_non_address_constraints_detects_access_filter() {
        let m = test_map();
        let plain = m.constraints().within(0, 10);
        assert!(!plain.has_non_address_constraints());
        let filtered = m.constraints().require(Access::WRITABLE);
        assert!(filtered.has_non_address_constraints());
    }
}
