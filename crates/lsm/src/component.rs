//! Components: the unit a search snapshot is made of.
//!
//! One capability ([`Component`]) with two variants. The merge layer only
//! ever sees `Box<dyn ComponentCursor>`, so it does not care which variant
//! backs a slot.

use anyhow::{bail, Result};
use memtable::Memtable;
use parking_lot::RwLock;
use sstable::{SSTableReader, SSTableWriter};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tuple::{ComponentCursor, Field, KeyComparator, KeyRange, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// The single mutable component, always the most recent.
    Memory,
    /// An immutable component produced by a flush or a merge.
    Disk,
}

/// A sorted, duplicate-free tuple set within an LSM index.
pub trait Component: Send + Sync {
    fn id(&self) -> ComponentId;

    fn kind(&self) -> ComponentKind;

    /// Number of stored tuples, antimatter included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a forward cursor over the tuples in `range`.
    fn open_cursor(&self, range: &KeyRange) -> Result<Box<dyn ComponentCursor>>;

    /// Physically reclaims the component. Called by the harness only once
    /// no outstanding search can reach it.
    fn destroy(&self) -> Result<()>;
}

/// Shared handle to a component, as held by snapshots.
pub type ComponentRef = Arc<dyn Component>;

/// The mutable in-memory component.
pub struct MemoryComponent {
    id: ComponentId,
    table: RwLock<Memtable>,
}

impl MemoryComponent {
    pub fn new(id: ComponentId, cmp: Arc<dyn KeyComparator>) -> Self {
        Self {
            id,
            table: RwLock::new(Memtable::new(cmp)),
        }
    }

    /// Upserts `tuple`. Cursors opened earlier do not see it.
    pub fn insert(&self, tuple: Tuple) {
        self.table.write().put(tuple);
    }

    /// Records a delete marker for `key`.
    pub fn delete(&self, key: Vec<Field>) {
        self.table.write().delete(key);
    }

    pub fn approx_size(&self) -> usize {
        self.table.read().approx_size()
    }

    /// Writes the current contents to a new SSTable at `path`.
    pub fn write_to(&self, path: &Path) -> Result<u64> {
        SSTableWriter::write_from_memtable(path, &self.table.read())
    }
}

impl Component for MemoryComponent {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Memory
    }

    fn len(&self) -> usize {
        self.table.read().len()
    }

    fn open_cursor(&self, range: &KeyRange) -> Result<Box<dyn ComponentCursor>> {
        Ok(Box::new(self.table.read().cursor(range)))
    }

    fn destroy(&self) -> Result<()> {
        self.table.write().clear();
        Ok(())
    }
}

/// An immutable component backed by one SSTable file.
pub struct DiskComponent {
    id: ComponentId,
    reader: SSTableReader,
    cmp: Arc<dyn KeyComparator>,
    destroyed: AtomicBool,
}

impl DiskComponent {
    pub fn open(id: ComponentId, path: &Path, cmp: Arc<dyn KeyComparator>) -> Result<Self> {
        Ok(Self {
            id,
            reader: SSTableReader::open(path)?,
            cmp,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Component for DiskComponent {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Disk
    }

    fn len(&self) -> usize {
        self.reader.len() as usize
    }

    fn open_cursor(&self, range: &KeyRange) -> Result<Box<dyn ComponentCursor>> {
        if self.is_destroyed() {
            bail!("component {} was already reclaimed", self.id);
        }
        Ok(Box::new(self.reader.cursor(range.clone(), Arc::clone(&self.cmp))?))
    }

    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            bail!("component {} destroyed twice", self.id);
        }
        std::fs::remove_file(self.reader.path())?;
        Ok(())
    }
}
