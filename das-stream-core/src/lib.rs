//! Core data model for das scientific data streams.
//!
//! A das stream carries time-correlated, multidimensional physics
//! measurements: a self-describing header followed by tagged data packets.
//! This crate holds the in-memory model those streams are parsed into
//! (stream → dataset → dimension → variable → array) together with the
//! value codecs that translate packet bytes into typed array elements and
//! back. The `das-stream-in` and `das-stream-out` crates build the wire
//! readers and writers on top of it.
#![allow(clippy::derive_partial_eq_without_eq)]
extern crate num;
#[macro_use]
extern crate num_derive;

#[cfg(any(feature = "to_json", feature = "serde"))]
extern crate serde;
#[cfg(feature = "to_json")]
extern crate serde_json;

pub mod array;
pub mod codec;
pub mod dataset;
pub mod descriptor;
pub mod dimension;
pub mod enums;
pub mod errors;
pub mod frame;
pub mod iterator;
pub mod property;
pub mod stream;
pub mod time;
pub mod units;
pub mod value;
pub mod variable;

pub use errors::DasError;

pub use enums::*;

/// The most index positions any array, variable or dataset may use.
pub const IDX_MAX: usize = 8;

/// A concrete location in index space.
pub type Index = [usize; IDX_MAX];

/// What is known about the extent of one index position.
///
/// Rather than the magic negative values of older das tooling, unused and
/// function-like positions carry explicit tags. Order matters for shape
/// union: `Ragged > Size > Func > Unused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisLen {
    /// The object is constant along this index position.
    Unused,
    /// Values vary along this position but the extent is unbounded, e.g. a
    /// sequence variable.
    Func,
    /// The extent differs depending on the other indices.
    Ragged,
    /// A definite extent.
    Size(usize),
}

impl AxisLen {
    /// Merge two extents, most restrictive wins: raggedness is contagious,
    /// definite sizes beat functions, and two sizes take the minimum.
    pub fn merge(self, other: AxisLen) -> AxisLen {
        use AxisLen::*;
        match (self, other) {
            (Ragged, _) | (_, Ragged) => Ragged,
            (Size(a), Size(b)) => Size(a.min(b)),
            (Size(a), _) | (_, Size(a)) => Size(a),
            (Func, _) | (_, Func) => Func,
            (Unused, Unused) => Unused,
        }
    }

    pub fn is_used(self) -> bool {
        !matches!(self, AxisLen::Unused)
    }

    /// The definite extent, if there is one.
    pub fn size(self) -> Option<usize> {
        match self {
            AxisLen::Size(n) => Some(n),
            _ => None,
        }
    }
}

/// The extent of every index position of some object.
pub type Shape = [AxisLen; IDX_MAX];

/// A shape with nothing in it.
pub const SHAPE_EMPTY: Shape = [AxisLen::Unused; IDX_MAX];

/// Index-wise union of two shapes over the first `rank` positions.
pub fn shape_merge(dest: &mut Shape, src: &Shape, rank: usize) {
    for i in 0..rank.min(IDX_MAX) {
        dest[i] = dest[i].merge(src[i]);
    }
}

/// How one external index position maps into an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdxMap {
    /// This external position selects the given array axis.
    Mapped(usize),
    /// The array does not vary along this external position.
    Unused,
}

/// Index maps for all external positions of a variable.
pub type IndexMap = [IdxMap; IDX_MAX];

/// An index map using no positions at all.
pub const IDXMAP_EMPTY: IndexMap = [IdxMap::Unused; IDX_MAX];

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn axis_len_merge_precedence() {
        use AxisLen::*;
        assert_eq!(Ragged.merge(Size(5)), Ragged);
        assert_eq!(Size(5).merge(Size(3)), Size(3));
        assert_eq!(Size(5).merge(Func), Size(5));
        assert_eq!(Func.merge(Unused), Func);
        assert_eq!(Unused.merge(Unused), Unused);
    }
}
