//! Segments: the value type stored in the map's interval substrate.

use crate::access::Access;
use crate::address::Address;
use crate::buffer::BufferHandle;
use crate::interval::Interval;
use crate::interval_map::MergePolicy;

/// A `(buffer, offset, access bits, name, copy-on-write flag)` tuple occupying
/// whatever interval the enclosing map node says it does. The interval
/// itself is *not* stored here — it lives in the map's key, per invariant 3
/// in the data model (the interval and the segment are a node together).
pub struct Segment<A: Address, T> {
    buffer: BufferHandle<A, T>,
    offset: A,
    access: Access,
    name: String,
    cow: bool,
}

impl<A: Address, T> Clone for Segment<A, T> {
    fn clone(&self) -> Self {
        Segment {
            buffer: self.buffer.clone(),
            offset: self.offset,
            access: self.access,
            name: self.name.clone(),
            cow: self.cow,
        }
    }
}

impl<A: Address, T> std::fmt::Debug for Segment<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("offset", &self.offset)
            .field("access", &self.access)
            .field("name", &self.name)
            .field("cow", &self.cow)
            .finish_non_exhaustive()
    }
}

impl<A: Address, T> Segment<A, T> {
    pub fn new(buffer: BufferHandle<A, T>, offset: A) -> Self {
        Segment {
            buffer,
            offset,
            access: Access::empty(),
            name: String::new(),
            cow: false,
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_cow(mut self, cow: bool) -> Self {
        self.cow = cow;
        self
    }

    pub fn buffer(&self) -> &BufferHandle<A, T> {
        &self.buffer
    }

    pub fn offset(&self) -> A {
        self.offset
    }

    pub fn set_offset(&mut self, offset: A) {
        self.offset = offset;
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn set_access(&mut self, access: Access) {
        self.access = access;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_copy_on_write(&self) -> bool {
        self.cow
    }

    pub fn set_copy_on_write(&mut self, cow: bool) {
        self.cow = cow;
    }

    pub fn clear_copy_on_write(&mut self) {
        self.cow = false;
    }

    /// True if the segment's access bits include every bit in `required` and
    /// none of the bits in `prohibited`.
    pub fn is_accessible(&self, required: Access, prohibited: Access) -> bool {
        self.access.contains(required) && !self.access.intersects(prohibited)
    }

    pub fn points_to_same_buffer(&self, other: &BufferHandle<A, T>) -> bool {
        std::rc::Rc::ptr_eq(&self.buffer, other)
    }

    pub fn set_buffer(&mut self, buffer: BufferHandle<A, T>) {
        self.buffer = buffer;
    }
}

/// Decides when two adjacent intervals' segments may be merged into one, and
/// how to split a segment at a point.
///
/// This is invariant 3/4 in the data model expressed as code: two adjacent
/// nodes merge iff their segments have identical access bits and name, point
/// at the same buffer, and the buffer offsets are themselves contiguous (the
/// combined interval would read as one uninterrupted slice of the buffer).
pub struct SegmentMergePolicy;

impl SegmentMergePolicy {
    /// `left` occupies `left_interval`, immediately followed by `right`
    /// occupying `right_interval` (`left_interval.greatest() + 1 ==
    /// right_interval.least()`). Returns whether they may be merged into a
    /// single segment spanning the hull of both intervals.
    pub fn can_merge<A: Address, T>(
        left_interval: &Interval<A>,
        left: &Segment<A, T>,
        right_interval: &Interval<A>,
        right: &Segment<A, T>,
    ) -> bool {
        debug_assert!(!left_interval.is_empty());
        debug_assert!(!right_interval.is_empty());
        debug_assert_eq!(left_interval.greatest().checked_add(A::ONE), Some(right_interval.least()));

        left.access == right.access
            && left.name == right.name
            && left.points_to_same_buffer(&right.buffer)
            && left
                .offset
                .checked_add_usize(left_interval.size())
                .is_some_and(|expected| expected == right.offset)
    }

    /// Splits `segment`, which occupies `interval`, at `split_point` (which
    /// must lie within `interval`). Returns the segment for the right-hand
    /// half `[split_point, interval.greatest()]`; the caller keeps the
    /// original (now logically truncated to `[interval.least(), split_point - 1]`)
    /// as the left half.
    pub fn split<A: Address, T>(interval: &Interval<A>, segment: &Segment<A, T>, split_point: A) -> Segment<A, T> {
        debug_assert!(!interval.is_empty());
        debug_assert!(interval.contains(split_point));
        let mut right = segment.clone();
        let delta = split_point
            .checked_sub(interval.least())
            .expect("split_point >= interval.least() per contains() check above");
        right.offset = segment
            .offset
            .checked_add(delta)
            .expect("segment offset + in-bounds delta must fit: buffer covers the whole interval");
        right
    }
}

impl<A: Address, T> MergePolicy<A, Segment<A, T>> for SegmentMergePolicy {
    fn can_merge(left_interval: &Interval<A>, left: &Segment<A, T>, right_interval: &Interval<A>, right: &Segment<A, T>) -> bool {
        SegmentMergePolicy::can_merge(left_interval, left, right_interval, right)
    }

    fn split(interval: &Interval<A>, value: &Segment<A, T>, split_point: A) -> Segment<A, T> {
        SegmentMergePolicy::split(interval, value, split_point)
    }
}

/// A user-supplied filter on `(interval, segment)` pairs, chained onto a
/// [`Constraints`](crate::constraints::Constraints) value via
/// `segment_predicate`.
///
/// Boxed as `dyn Fn` rather than the original's `SegmentPredicate` virtual
/// base class with an explicit `chain: bool` accumulator parameter — Rust
/// closures compose naturally with `Vec<Box<dyn Fn(...) -> bool>>` and an
/// `all()` fold, so there's no need to thread the accumulator through by
/// hand.
pub type SegmentPredicate<A, T> = Box<dyn Fn(&Interval<A>, &Segment<A, T>) -> bool>;
