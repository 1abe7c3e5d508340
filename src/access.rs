//! Segment access bits and the flags controlling matcher direction/contiguity.

use bitflags::bitflags;

bitflags! {
    /// Access bits attached to a [`Segment`](crate::segment::Segment).
    ///
    /// The core only ever interprets [`Access::IMMUTABLE`] (forbidden on
    /// writes, checked by [`ConstraintsMut::write`](crate::ConstraintsMut::write)).
    /// `READABLE`/`WRITABLE`/`EXECUTABLE` are conventional but opaque to the
    /// core itself — they exist so user constraints (`require`/`prohibit`)
    /// have something to name; the map never branches on them except
    /// through those user-supplied constraints.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Access: u32 {
        const READABLE   = 1 << 0;
        const WRITABLE   = 1 << 1;
        const EXECUTABLE = 1 << 2;
        /// Forbidden on writes regardless of a segment's copy-on-write flag.
        const IMMUTABLE  = 1 << 3;
    }
}

bitflags! {
    /// Controls matcher direction, contiguity, and anchor strictness.
    ///
    /// [`MatchFlags::CONTIGUOUS`] and [`MatchFlags::NONCONTIGUOUS`] are
    /// mutually exclusive; when neither is set, each operation falls back to
    /// its own documented default (`CONTIGUOUS` for `read`/`write`/`available`,
    /// `NONCONTIGUOUS` for `prune`/`keep`/`change_access`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MatchFlags: u32 {
        const BACKWARD      = 1 << 0;
        const CONTIGUOUS    = 1 << 1;
        const NONCONTIGUOUS = 1 << 2;
        /// An anchored `at(interval)` must match the entire interval or nothing.
        const WHOLE         = 1 << 3;
        /// Preserved-by-default open question (see DESIGN.md): backward
        /// `write` normally still consumes `src` from its start. Setting
        /// this flag consumes `src` from its end instead, so the last
        /// element of `src` lands at the lowest written address.
        const REVERSE_SOURCE = 1 << 4;
    }
}

impl MatchFlags {
    pub(crate) fn is_backward(self) -> bool {
        self.contains(MatchFlags::BACKWARD)
    }

    /// Resolves the effective contiguity for an operation given its default,
    /// applying the documented "CONTIGUOUS/NONCONTIGUOUS are mutually
    /// exclusive, absence picks the operation's default" rule.
    pub(crate) fn resolve_contiguous(self, default_contiguous: bool) -> MatchFlags {
        if self.intersects(MatchFlags::CONTIGUOUS | MatchFlags::NONCONTIGUOUS) {
            self
        } else if default_contiguous {
            self | MatchFlags::CONTIGUOUS
        } else {
            self | MatchFlags::NONCONTIGUOUS
        }
    }

    pub(crate) fn is_contiguous(self) -> bool {
        self.contains(MatchFlags::CONTIGUOUS)
    }

    pub(crate) fn is_whole(self) -> bool {
        self.contains(MatchFlags::WHOLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_contiguous_fills_in_default() {
        let f = MatchFlags::empty().resolve_contiguous(true);
        assert!(f.is_contiguous());
        let f = MatchFlags::empty().resolve_contiguous(false);
        assert!(!f.is_contiguous());
        assert!(f.contains(MatchFlags::NONCONTIGUOUS));
    }

    #[test]
    fn resolve_contiguous_leaves_explicit_flag_alone() {
        let f = MatchFlags::NONCONTIGUOUS.resolve_contiguous(true);
        assert!(!f.is_contiguous());
    }

    #[test]
    fn access_immutable_is_distinct_bit() {
        let a = Access::READABLE | Access::WRITABLE;
        assert!(!a.contains(Access::IMMUTABLE));
        assert!((a | Access::IMMUTABLE).contains(Access::IMMUTABLE));
    }
}
