//! # LSM - multi-component search over an LSM index
//!
//! Ties the [`memtable`] and [`sstable`] crates together into an index whose
//! searches merge every component of a fixed snapshot, while flushes and
//! merges replace components underneath them.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                   LsmIndex                       │
//! │                                                  │
//! │ write.rs → MemoryComponent insert / delete       │
//! │              |                                   │
//! │              v                                   │
//! │           flush() → new DiskComponent            │
//! │              |                                   │
//! │              v                                   │
//! │           merge() → one DiskComponent per run    │
//! │                                                  │
//! │ read.rs → enter_search → LsmSearchCursor         │
//! │            (k-way merge, newest rank wins)       │
//! └──────────────────────────────────────────────────┘
//!                |  publish / reclaim
//!                v
//!           LsmHarness (snapshots + reference counts)
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                                |
//! |-----------------|--------------------------------------------------------|
//! | [`lib.rs`]      | `LsmIndex` struct, constructor, accessors, `Debug`     |
//! | [`component`]   | `Component` trait, memory and disk variants            |
//! | [`harness`]     | Snapshots, search tokens, deferred reclamation         |
//! | [`cursor`]      | `LsmSearchCursor`: merge, de-duplication, antimatter   |
//! | [`write`]       | `insert()`, `delete()`, `flush()`                      |
//! | [`read`]        | `search()`, `search_with()`, `get()`                   |
//! | [`merge`]       | `merge()`, `merge_all()` through the search protocol   |
//! | [`error`]       | `LsmError` taxonomy                                    |
//!
//! ## Components
//!
//! ```text
//! ┌────────────────────────────┐  ← rank 0, newest, mutable
//! │ MemoryComponent            │
//! ├────────────────────────────┤  ← from flushes and merges
//! │ DiskComponent ...          │
//! └────────────────────────────┘  ← oldest
//! ```
//!
//! Scheduling (when to flush or merge) is left to the caller.
pub mod component;
pub mod cursor;
pub mod error;
pub mod harness;
mod merge;
mod read;
mod write;

pub use component::{
    Component, ComponentId, ComponentKind, ComponentRef, DiskComponent, MemoryComponent,
};
pub use config::IndexConfig;
pub use cursor::{AntimatterPolicy, LsmSearchCursor, MergeSource, Rank, SearchLease};
pub use error::{LsmError, LsmResult};
pub use harness::{LsmHarness, SearchSnapshot, SearchToken, SnapshotId};
pub use tuple::{ComponentCursor, Field, FieldComparator, KeyComparator, KeyRange, Tuple};

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// An LSM index: one mutable component plus the disk components behind it.
///
/// All methods take `&self`; share the index across threads with an `Arc`.
/// Searches never block on maintenance. `flush` and `merge` serialize with
/// each other through an internal lock.
pub struct LsmIndex {
    pub(crate) config: IndexConfig,
    pub(crate) cmp: Arc<dyn KeyComparator>,
    pub(crate) harness: Arc<LsmHarness>,
    /// The mutable component writes go to. Swapped by `flush`.
    pub(crate) mem: RwLock<Arc<MemoryComponent>>,
    pub(crate) next_component: AtomicU64,
    /// Held by `flush` and `merge` for their whole duration.
    pub(crate) maintenance: Mutex<()>,
}

impl std::fmt::Debug for LsmIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mem = self.mem.read();
        f.debug_struct("LsmIndex")
            .field("sst_dir", &self.config.sst_dir)
            .field("key_fields", &self.cmp.key_fields())
            .field("memory_component", &mem.id())
            .field("memory_entries", &mem.len())
            .field("memory_size", &mem.approx_size())
            .field("disk_components", &self.disk_component_count())
            .field("harness", &self.harness)
            .finish()
    }
}

impl LsmIndex {
    /// Opens an empty index whose disk components live in `config.sst_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the component directory cannot be created.
    pub fn open(config: IndexConfig, cmp: Arc<dyn KeyComparator>) -> LsmResult<Self> {
        std::fs::create_dir_all(&config.sst_dir)?;

        let mem = Arc::new(MemoryComponent::new(ComponentId(0), Arc::clone(&cmp)));
        let harness = LsmHarness::new(vec![Arc::clone(&mem) as ComponentRef])?;
        info!(dir = %config.sst_dir.display(), key_fields = cmp.key_fields(), "index opened");

        Ok(Self {
            config,
            cmp,
            harness: Arc::new(harness),
            mem: RwLock::new(mem),
            next_component: AtomicU64::new(1),
            maintenance: Mutex::new(()),
        })
    }

    /// Opens an index ordered by the first `config.key_fields` fields.
    pub fn open_default(config: IndexConfig) -> LsmResult<Self> {
        let cmp: Arc<dyn KeyComparator> = Arc::new(FieldComparator::new(config.key_fields));
        Self::open(config, cmp)
    }

    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub fn comparator(&self) -> &Arc<dyn KeyComparator> {
        &self.cmp
    }

    /// The harness coordinating this index's searches and reclamation.
    #[must_use]
    pub fn harness(&self) -> &Arc<LsmHarness> {
        &self.harness
    }

    pub fn sst_dir(&self) -> &Path {
        &self.config.sst_dir
    }

    /// Components of the current snapshot, newest first.
    pub fn components(&self) -> Vec<ComponentRef> {
        self.harness.current_components()
    }

    #[must_use]
    pub fn disk_component_count(&self) -> usize {
        self.components()
            .iter()
            .filter(|c| c.kind() == ComponentKind::Disk)
            .count()
    }

    /// Tuples (antimatter included) in the mutable component.
    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.mem.read().len()
    }

    pub(crate) fn allocate_component_id(&self) -> ComponentId {
        ComponentId(self.next_component.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn component_path(&self, id: ComponentId) -> PathBuf {
        self.config.sst_dir.join(format!("component-{:020}.sst", id.0))
    }
}

/// Runs `publish` for a freshly written component file and removes the file
/// when publishing fails, so a failed flush or merge leaves no stray SSTable.
pub(crate) fn publish_or_discard<T>(
    path: &Path,
    publish: impl FnOnce() -> LsmResult<T>,
) -> LsmResult<T> {
    publish().map_err(|e| {
        if let Err(rm) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %rm, "could not remove unpublished component file");
        }
        e
    })
}

#[cfg(test)]
mod tests;
