//! # Memtable - the mutable in-memory component
//!
//! Holds the most recent writes of an index, sorted by the index's
//! [`KeyComparator`]. Each key appears at most once: a newer write for the
//! same key replaces the older one, and a delete stores an *antimatter*
//! tuple so that it shadows older values living in disk components.
//!
//! Readers never iterate the live table. [`Memtable::cursor`] copies the
//! in-range tuples (cheap `Arc` clones) at open time, so writes that land
//! after a cursor was opened are invisible to it.

use anyhow::{bail, Result};
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use tuple::{ComponentCursor, Field, KeyComparator, KeyRange, Tuple};

/// A tuple ordered by the table's comparator, so the standard ordered
/// collections can hold it.
#[derive(Clone)]
struct OrderedTuple {
    tuple: Tuple,
    order: Arc<dyn KeyComparator>,
}

impl PartialEq for OrderedTuple {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedTuple {}

impl PartialOrd for OrderedTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.tuple, &other.tuple)
    }
}

pub struct Memtable {
    entries: BTreeSet<OrderedTuple>,
    cmp: Arc<dyn KeyComparator>,
    approx_size: usize,
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("entries", &self.entries.len())
            .field("approx_size", &self.approx_size)
            .finish()
    }
}

impl Memtable {
    pub fn new(cmp: Arc<dyn KeyComparator>) -> Self {
        Self {
            entries: BTreeSet::new(),
            cmp,
            approx_size: 0,
        }
    }

    fn ordered(&self, tuple: Tuple) -> OrderedTuple {
        OrderedTuple {
            tuple,
            order: Arc::clone(&self.cmp),
        }
    }

    /// Inserts `tuple`, replacing any existing entry with an equal key.
    pub fn put(&mut self, tuple: Tuple) {
        self.approx_size += tuple.approx_size();
        let entry = self.ordered(tuple);
        if let Some(old) = self.entries.replace(entry) {
            self.approx_size = self.approx_size.saturating_sub(old.tuple.approx_size());
        }
    }

    /// Delete: store an antimatter tuple for `key`.
    pub fn delete(&mut self, key: Vec<Field>) {
        self.put(Tuple::antimatter(key));
    }

    /// Ordered iterator over all entries, antimatter included.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.entries.iter().map(|e| &e.tuple)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn comparator(&self) -> &Arc<dyn KeyComparator> {
        &self.cmp
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.approx_size = 0;
    }

    /// Opens a cursor over a point-in-time copy of the entries in `range`.
    pub fn cursor(&self, range: &KeyRange) -> MemtableCursor {
        // A prefix bound can equal many entries, so only a full-width bound
        // is used to seek into the tree.
        let seek = match &range.low {
            Bound::Included(t) | Bound::Excluded(t) if t.len() >= self.cmp.key_fields() => {
                Some(self.ordered(t.clone()))
            }
            _ => None,
        };
        let pending = match seek {
            Some(from) => self.copy_range(self.entries.range(from..), range),
            None => self.copy_range(self.entries.iter(), range),
        };
        MemtableCursor {
            pending,
            current: None,
            closed: false,
        }
    }

    fn copy_range<'a, I>(&self, entries: I, range: &KeyRange) -> VecDeque<Tuple>
    where
        I: Iterator<Item = &'a OrderedTuple>,
    {
        let cmp = self.cmp.as_ref();
        entries
            .map(|e| &e.tuple)
            .skip_while(|t| range.is_below(cmp, t))
            .take_while(|t| !range.is_above(cmp, t))
            .cloned()
            .collect()
    }
}

/// Cursor over a memtable snapshot.
#[derive(Debug)]
pub struct MemtableCursor {
    pending: VecDeque<Tuple>,
    current: Option<Tuple>,
    closed: bool,
}

impl ComponentCursor for MemtableCursor {
    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            bail!("memtable cursor used after close");
        }
        Ok(!self.pending.is_empty())
    }

    fn advance(&mut self) -> Result<()> {
        if self.closed {
            bail!("memtable cursor used after close");
        }
        match self.pending.pop_front() {
            Some(t) => {
                self.current = Some(t);
                Ok(())
            }
            None => bail!("advance past end of memtable cursor"),
        }
    }

    fn current(&self) -> Option<&Tuple> {
        self.current.as_ref()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("memtable cursor closed twice");
        }
        self.closed = true;
        self.pending.clear();
        self.current = None;
        Ok(())
    }
}
