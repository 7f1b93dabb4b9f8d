/// Merge: replaces a contiguous run of disk components with one component.
///
/// The merge reads its inputs the same way a search does: it pins a
/// snapshot through the harness and streams an [`LsmSearchCursor`] straight
/// into [`SSTableWriter`], so memory use is bounded by one tuple per input.
/// Delete markers are kept unless the run reaches the oldest component, in
/// which case there is nothing left for them to shadow.
use sstable::SSTableWriter;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tuple::KeyRange;

use crate::component::{Component, ComponentId, ComponentKind, ComponentRef, DiskComponent};
use crate::cursor::{AntimatterPolicy, LsmSearchCursor, SearchLease};
use crate::error::{LsmError, LsmResult};
use crate::{publish_or_discard, LsmIndex};

impl LsmIndex {
    /// Merges the disk components `ids` (newest first, contiguous) into one.
    ///
    /// Returns the id of the merged component, or `None` when every input
    /// tuple was suppressed and the run was simply dropped. Searches open
    /// during the merge keep reading the old components; those are destroyed
    /// once the last such search closes.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if `ids` is empty, not current, not disk
    /// components, or not a contiguous run. Storage errors from reading or
    /// writing abort the merge and leave the index unchanged.
    pub fn merge(&self, ids: &[ComponentId]) -> LsmResult<Option<ComponentId>> {
        let _maintenance = self.maintenance.lock();
        if ids.is_empty() {
            return Err(LsmError::protocol("merge of zero components"));
        }

        let (visible, token) = self.harness.enter_search(false);
        let (run, includes_oldest) = match select_run(&visible, ids) {
            Ok(found) => found,
            Err(e) => {
                self.harness.exit_search(token)?;
                return Err(e);
            }
        };
        let lease = SearchLease::new(Arc::clone(&self.harness), token);

        let policy = if includes_oldest {
            AntimatterPolicy::Suppress
        } else {
            AntimatterPolicy::Retain
        };
        let mut cursor = LsmSearchCursor::new(Arc::clone(&self.cmp))
            .with_policy(policy)
            .with_order_validation(self.config.validate_order);
        cursor.open_components(&run, &KeyRange::all(), Some(lease))?;

        if !cursor.has_next()? {
            cursor.close()?;
            self.harness.merge_complete(ids, None)?;
            info!(inputs = ids.len(), "merge dropped every tuple; run removed");
            return Ok(None);
        }

        let id = self.allocate_component_id();
        let path = self.component_path(id);
        debug!(inputs = run.len(), ?policy, output = %id, "merge started");

        // Stream straight from the merge cursor into the writer.
        let mut merge_error: Option<LsmError> = None;
        let mut emitted = 0u64;
        let streaming_iter = std::iter::from_fn(|| {
            let step = match cursor.has_next() {
                Ok(true) => cursor.advance().map(|t| Some(t.clone())),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            };
            match step {
                Ok(Some(t)) => {
                    emitted += 1;
                    Some(t)
                }
                Ok(None) => None,
                Err(e) => {
                    merge_error = Some(e);
                    None
                }
            }
        });
        let write_result =
            SSTableWriter::write_from_iterator(&path, self.cmp.as_ref(), streaming_iter);

        if let Some(e) = merge_error {
            // The cursor already closed itself when it failed.
            let _ = cursor.close();
            return Err(e);
        }
        if let Err(e) = write_result {
            if let Err(close) = cursor.close() {
                warn!(error = %close, "closing merge cursor after a failed write");
            }
            return Err(e.into());
        }

        publish_or_discard(&path, || {
            cursor.close()?;
            let merged = DiskComponent::open(id, &path, Arc::clone(&self.cmp))?;
            self.harness.merge_complete(ids, Some(Arc::new(merged) as ComponentRef))
        })?;

        info!(inputs = ids.len(), output = %id, tuples = emitted, "merge published");
        Ok(Some(id))
    }

    /// Merges every disk component into one. Does nothing with fewer than
    /// two disk components.
    pub fn merge_all(&self) -> LsmResult<Option<ComponentId>> {
        let ids: Vec<ComponentId> = self
            .components()
            .iter()
            .filter(|c| c.kind() == ComponentKind::Disk)
            .map(|c| c.id())
            .collect();
        if ids.len() < 2 {
            debug!(disk_components = ids.len(), "merge_all skipped");
            return Ok(None);
        }
        self.merge(&ids)
    }
}

/// Finds `ids` as a contiguous run in `visible` and reports whether the run
/// ends at the oldest component.
fn select_run(
    visible: &[ComponentRef],
    ids: &[ComponentId],
) -> LsmResult<(Vec<ComponentRef>, bool)> {
    let start = visible
        .iter()
        .position(|c| c.id() == ids[0])
        .ok_or_else(|| LsmError::protocol(format!("component {} is not current", ids[0])))?;
    let run = visible
        .get(start..start + ids.len())
        .filter(|run| run.iter().map(|c| c.id()).eq(ids.iter().copied()))
        .ok_or_else(|| LsmError::protocol("merged components are not a contiguous run"))?;
    if let Some(c) = run.iter().find(|c| c.kind() != ComponentKind::Disk) {
        return Err(LsmError::protocol(format!("cannot merge memory component {}", c.id())));
    }
    Ok((run.to_vec(), start + ids.len() == visible.len()))
}
