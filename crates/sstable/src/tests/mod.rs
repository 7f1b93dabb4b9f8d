
use anyhow::Result;
use memtable::Memtable;
use std::path::Path;
use std::sync::Arc;
use tuple::{Field, FieldComparator, KeyComparator, Tuple};

pub(super) fn cmp() -> Arc<dyn KeyComparator> {
    Arc::new(FieldComparator::new(1))
}

pub(super) fn row(k: i64, v: &str) -> Tuple {
    Tuple::new(vec![Field::Int(k), Field::from(v)])
}

pub(super) fn key(k: i64) -> Tuple {
    Tuple::new(vec![Field::Int(k)])
}

/// Builds the sample table: 1..=3 live (3 with an empty payload), 4 deleted.
pub(super) fn make_sample_memtable() -> Memtable {
    let mut m = Memtable::new(cmp());
    m.put(row(1, "apple"));
    m.put(row(2, "banana"));
    m.put(row(3, ""));
    m.delete(vec![Field::Int(4)]);
    m
}

pub(super) fn write_sample(path: &Path) -> Result<u64> {
    crate::SSTableWriter::write_from_memtable(path, &make_sample_memtable())
}
