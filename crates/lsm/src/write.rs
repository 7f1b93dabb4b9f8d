/// Write path: insert(), delete(), flush().
///
/// Writes land in the mutable component. `flush` turns its contents into a
/// new disk component and installs a fresh mutable component through the
/// harness, so searches already reading the old one are unaffected.
use std::sync::Arc;
use tracing::{debug, info};
use tuple::{Field, Tuple};

use crate::component::{Component, ComponentId, ComponentRef, DiskComponent, MemoryComponent};
use crate::error::{LsmError, LsmResult};
use crate::{publish_or_discard, LsmIndex};

impl LsmIndex {
    /// Upserts `tuple` into the mutable component.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the tuple is antimatter or has fewer fields than
    /// the key.
    pub fn insert(&self, tuple: Tuple) -> LsmResult<()> {
        if tuple.is_antimatter() {
            return Err(LsmError::InvalidArgument(
                "insert of an antimatter tuple; use delete".into(),
            ));
        }
        self.check_key_width(tuple.len())?;
        self.mem.read().insert(tuple);
        Ok(())
    }

    /// Records a delete marker for `key`, shadowing every older version.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `key` has fewer fields than the key.
    pub fn delete(&self, key: Vec<Field>) -> LsmResult<()> {
        self.check_key_width(key.len())?;
        self.mem.read().delete(key);
        Ok(())
    }

    /// Writes the mutable component to a new disk component and publishes
    /// it. Returns the new component's id, or `None` if there was nothing
    /// to flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the SSTable cannot be written, reopened or
    /// published. The index is left unchanged and the file is removed.
    pub fn flush(&self) -> LsmResult<Option<ComponentId>> {
        let _maintenance = self.maintenance.lock();
        // Blocks writers for the duration of the write so no update is lost
        // between the snapshot written and the swap.
        let mut mem = self.mem.write();
        if mem.is_empty() {
            debug!(component = %mem.id(), "flush skipped; memory component empty");
            return Ok(None);
        }

        let id = self.allocate_component_id();
        let path = self.component_path(id);
        let written = mem.write_to(&path)?;

        let fresh = Arc::new(MemoryComponent::new(
            self.allocate_component_id(),
            Arc::clone(&self.cmp),
        ));
        publish_or_discard(&path, || {
            let disk = DiskComponent::open(id, &path, Arc::clone(&self.cmp))?;
            self.harness.flush_complete(
                Arc::clone(&fresh) as ComponentRef,
                Some(Arc::new(disk) as ComponentRef),
            )
        })?;
        let old = std::mem::replace(&mut *mem, fresh);

        info!(from = %old.id(), to = %id, tuples = written, path = %path.display(), "memory component flushed");
        Ok(Some(id))
    }

    fn check_key_width(&self, fields: usize) -> LsmResult<()> {
        let key_fields = self.cmp.key_fields();
        if fields < key_fields {
            return Err(LsmError::InvalidArgument(format!(
                "{} fields given, key needs {}",
                fields, key_fields
            )));
        }
        Ok(())
    }
}
