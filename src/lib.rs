//! A generic interval map from address ranges to reference-counted,
//! copy-on-write buffer-backed segments, queried through a composable
//! constraint algebra.
//!
//! The map itself ([`AddressMap`]) never owns storage directly — every node
//! is a [`Segment`] wrapping a [`BufferHandle`], so the same physical buffer
//! can back many address ranges (or many maps) at once, and a write through
//! a shared, copy-on-write segment transparently clones the buffer before
//! mutating it.
//!
//! Queries are built with the [`ConstraintBuilder`] chain
//! (`map.constraints().within(...).require(...)`) and ended with a terminal
//! operation (`read`, `write`, `prune`, `keep`, `change_access`, `next`,
//! `available`, `exists`, ...) defined on the [`Constraints`]/[`ConstraintsMut`]
//! value that chain returns.
//!
//! This crate has no opinion on where buffers come from: [`VecBuffer`] and
//! [`ImmutableBuffer`] are minimal reference implementations for tests and
//! simple in-memory use; a loader for some object format would supply its
//! own [`Buffer`] impl instead.

mod access;
mod address;
mod buffer;
mod constraints;
mod error;
mod interval;
mod interval_map;
mod map;
mod matcher;
mod segment;

pub use access::{Access, MatchFlags};
pub use address::{Address, align_down, align_up};
pub use buffer::{Buffer, BufferHandle, ImmutableBuffer, VecBuffer};
pub use constraints::{ConstraintBuilder, Constraints, ConstraintsMut};
pub use error::AddressMapError;
pub use interval::Interval;
pub use map::AddressMap;
pub use segment::{Segment, SegmentMergePolicy, SegmentPredicate};
