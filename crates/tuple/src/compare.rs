use std::cmp::Ordering;

use crate::Tuple;

/// Total order over tuple keys.
///
/// Implementations must be consistent across every component of an index:
/// each component is sorted by the same comparator, and the merge layer
/// relies on it to line up equal keys from different components.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering;

    /// Number of leading fields that make up the key.
    fn key_fields(&self) -> usize;
}

/// Compares the first `key_fields` fields in natural [`Field`](crate::Field) order.
///
/// If either tuple has fewer than `key_fields` fields, only the common
/// prefix is compared. A shorter search key is therefore *equal* to every
/// tuple it is a prefix of, which is what prefix range bounds want.
#[derive(Debug, Clone, Copy)]
pub struct FieldComparator {
    key_fields: usize,
}

impl FieldComparator {
    pub fn new(key_fields: usize) -> Self {
        Self {
            key_fields: key_fields.max(1),
        }
    }
}

impl KeyComparator for FieldComparator {
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        let n = self.key_fields.min(a.len()).min(b.len());
        a.fields()[..n].cmp(&b.fields()[..n])
    }

    fn key_fields(&self) -> usize {
        self.key_fields
    }
}
