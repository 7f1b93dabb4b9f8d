use std::cmp::Ordering;
use std::ops::Bound;

use crate::{KeyComparator, Tuple};

/// Key bounds for a range search. Bound tuples usually carry only key fields
/// (or a key prefix).
#[derive(Debug, Clone)]
pub struct KeyRange {
    pub low: Bound<Tuple>,
    pub high: Bound<Tuple>,
}

impl KeyRange {
    /// The unbounded range: every key.
    pub fn all() -> Self {
        Self {
            low: Bound::Unbounded,
            high: Bound::Unbounded,
        }
    }

    pub fn new(low: Bound<Tuple>, high: Bound<Tuple>) -> Self {
        Self { low, high }
    }

    /// `low <= key < high`, the shape used by most scans.
    pub fn half_open(low: Tuple, high: Tuple) -> Self {
        Self {
            low: Bound::Included(low),
            high: Bound::Excluded(high),
        }
    }

    /// Returns `true` if `t` sorts before the low bound.
    pub fn is_below(&self, cmp: &dyn KeyComparator, t: &Tuple) -> bool {
        match &self.low {
            Bound::Unbounded => false,
            Bound::Included(low) => cmp.compare(t, low) == Ordering::Less,
            Bound::Excluded(low) => cmp.compare(t, low) != Ordering::Greater,
        }
    }

    /// Returns `true` if `t` sorts after the high bound. Since component
    /// streams are ascending, a cursor can stop at the first such tuple.
    pub fn is_above(&self, cmp: &dyn KeyComparator, t: &Tuple) -> bool {
        match &self.high {
            Bound::Unbounded => false,
            Bound::Included(high) => cmp.compare(t, high) == Ordering::Greater,
            Bound::Excluded(high) => cmp.compare(t, high) != Ordering::Less,
        }
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}
