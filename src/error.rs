//! Error type for the address map.
//!
//! Mirrors the teacher's own library-internal error style (see
//! `MemoryError` in the original `src/memory.rs`): a plain enum with a
//! hand-written `Display` and `impl std::error::Error`, rather than
//! `thiserror`/`anyhow`. Those are reserved for application code in the
//! corpus; this crate is a library boundary type other code matches on.

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMapError {
    /// [`AddressMap::check_consistency`](crate::AddressMap::check_consistency)
    /// (or an internal sanity check) found a node whose buffer doesn't cover
    /// the interval the node claims to occupy.
    InconsistentMap {
        interval_description: String,
        buffer_available: usize,
        interval_size: usize,
    },
    /// A request or constraint chain was ill-formed in a way that's distinct
    /// from a legitimately unsatisfiable narrowing (which stays silent via
    /// the `never` flag) — e.g. [`AddressMap::find_free_space`](crate::AddressMap::find_free_space)
    /// called with `n_values == 0`, or a [`ConstraintBuilder`](crate::ConstraintBuilder)
    /// chain calling `substr` twice with two different strings and then
    /// checked via `into_result`.
    InvalidConstraint { reason: String },
}

impl fmt::Display for AddressMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressMapError::InconsistentMap {
                interval_description,
                buffer_available,
                interval_size,
            } => write!(
                f,
                "address map segment at {interval_description} points to only {buffer_available} \
                 value{} but the interval size is {interval_size}",
                if *buffer_available == 1 { "" } else { "s" }
            ),
            AddressMapError::InvalidConstraint { reason } => {
                write!(f, "invalid address map constraint: {reason}")
            }
        }
    }
}

impl Error for AddressMapError {}
