//! Search lifecycle harness.
//!
//! Decouples component lifetime from in-flight searches. Every search pins
//! the snapshot that was current when it started; flushes and merges publish
//! new snapshots without disturbing pinned ones. A component superseded by a
//! flush or merge is only destroyed once no snapshot containing it is
//! current or pinned.
//!
//! ```text
//!  enter_search ──► pin current snapshot (searchers += 1) ──► token
//!  exit_search(token) ──► searchers -= 1 ──► reclaim if last reference
//!  flush/merge_complete ──► publish new snapshot, queue superseded components
//! ```
//!
//! The lock guards only the bookkeeping for enter/exit/publish. Searches
//! never hold it while iterating.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::component::{ComponentId, ComponentKind, ComponentRef};
use crate::error::{LsmError, LsmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// An immutable, recency-ordered component list plus the count of searches
/// pinning it. Index 0 is the newest component (the mutable one, if any).
pub struct SearchSnapshot {
    id: SnapshotId,
    components: Vec<ComponentRef>,
    searchers: AtomicUsize,
}

impl SearchSnapshot {
    fn new(id: SnapshotId, components: Vec<ComponentRef>) -> Self {
        Self {
            id,
            components,
            searchers: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn components(&self) -> &[ComponentRef] {
        &self.components
    }

    /// Number of outstanding searches pinning this snapshot.
    pub fn searchers(&self) -> usize {
        self.searchers.load(Ordering::Acquire)
    }

    fn contains(&self, id: ComponentId) -> bool {
        self.components.iter().any(|c| c.id() == id)
    }

    fn visible(&self, include_mem: bool) -> Vec<ComponentRef> {
        self.components
            .iter()
            .filter(|c| include_mem || c.kind() != ComponentKind::Memory)
            .cloned()
            .collect()
    }
}

impl fmt::Debug for SearchSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<ComponentId> = self.components.iter().map(|c| c.id()).collect();
        f.debug_struct("SearchSnapshot")
            .field("id", &self.id)
            .field("components", &ids)
            .field("searchers", &self.searchers())
            .finish()
    }
}

/// Opaque proof of one outstanding search reference.
///
/// Not `Clone`: [`LsmHarness::exit_search`] consumes it, so a reference can
/// be released at most once.
#[derive(Debug)]
pub struct SearchToken {
    id: u64,
    snapshot: SnapshotId,
    include_mem: bool,
}

impl SearchToken {
    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot
    }

    pub fn includes_mem_component(&self) -> bool {
        self.include_mem
    }
}

struct HarnessState {
    current: Arc<SearchSnapshot>,
    next_snapshot: u64,
    /// token id -> pinned snapshot
    outstanding: HashMap<u64, Arc<SearchSnapshot>>,
    /// superseded snapshots that still have searchers
    retired: Vec<Arc<SearchSnapshot>>,
    /// superseded components waiting for their last reference to go away
    obsolete: Vec<ComponentRef>,
}

impl HarnessState {
    fn is_live(&self, id: ComponentId) -> bool {
        self.current.contains(id) || self.retired.iter().any(|s| s.contains(id))
    }

    /// Removes and returns obsolete components no live snapshot can reach.
    fn take_reclaimable(&mut self) -> Vec<ComponentRef> {
        self.retired.retain(|s| s.searchers() > 0);
        let (free, keep): (Vec<ComponentRef>, Vec<ComponentRef>) =
            std::mem::take(&mut self.obsolete)
                .into_iter()
                .partition(|c| !self.is_live(c.id()));
        self.obsolete = keep;
        free
    }

    /// Installs `components` as the current snapshot and queues `obsolete`
    /// for reclamation. Returns what can be destroyed right away.
    fn publish(
        &mut self,
        components: Vec<ComponentRef>,
        obsolete: Vec<ComponentRef>,
    ) -> LsmResult<Vec<ComponentRef>> {
        validate_layout(&components)?;
        let id = SnapshotId(self.next_snapshot);
        self.next_snapshot += 1;

        let old = std::mem::replace(
            &mut self.current,
            Arc::new(SearchSnapshot::new(id, components)),
        );
        if old.searchers() > 0 {
            debug!(snapshot = %old.id, searchers = old.searchers(), "snapshot retired with searchers");
            self.retired.push(old);
        }
        self.obsolete.extend(obsolete);
        Ok(self.take_reclaimable())
    }
}

/// Reference-counting coordinator between searches and component
/// replacement. One per index.
pub struct LsmHarness {
    state: Mutex<HarnessState>,
    next_token: AtomicU64,
}

impl LsmHarness {
    /// Creates a harness over an initial, recency-ordered component list.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if a memory component appears anywhere but first,
    /// more than once, or if a component id repeats.
    pub fn new(components: Vec<ComponentRef>) -> LsmResult<Self> {
        validate_layout(&components)?;
        Ok(Self {
            state: Mutex::new(HarnessState {
                current: Arc::new(SearchSnapshot::new(SnapshotId(0), components)),
                next_snapshot: 1,
                outstanding: HashMap::new(),
                retired: Vec::new(),
                obsolete: Vec::new(),
            }),
            next_token: AtomicU64::new(0),
        })
    }

    /// Pins the current snapshot for a new search.
    ///
    /// Returns the visible components in recency order (the mutable
    /// component first, unless `include_mem` is false) and the token that
    /// must be handed back to [`exit_search`](Self::exit_search).
    pub fn enter_search(&self, include_mem: bool) -> (Vec<ComponentRef>, SearchToken) {
        let token_id = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let snapshot = Arc::clone(&state.current);
        snapshot.searchers.fetch_add(1, Ordering::AcqRel);
        state.outstanding.insert(token_id, Arc::clone(&snapshot));
        drop(state);

        debug!(snapshot = %snapshot.id, token = token_id, include_mem, "search entered");
        let components = snapshot.visible(include_mem);
        (
            components,
            SearchToken {
                id: token_id,
                snapshot: snapshot.id,
                include_mem,
            },
        )
    }

    /// Releases the reference identified by `token`. If it was the last
    /// reference to a superseded snapshot, components only that snapshot kept
    /// alive are destroyed before this returns.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if the token does not belong to this harness.
    pub fn exit_search(&self, token: SearchToken) -> LsmResult<()> {
        let reclaimable = {
            let mut state = self.state.lock();
            let snapshot = match state.outstanding.get(&token.id) {
                Some(s) if s.id == token.snapshot => Arc::clone(s),
                _ => {
                    return Err(LsmError::protocol(format!(
                        "unknown search token {} for snapshot {}",
                        token.id, token.snapshot
                    )))
                }
            };
            state.outstanding.remove(&token.id);
            let before = snapshot.searchers.fetch_sub(1, Ordering::AcqRel);
            debug!(snapshot = %snapshot.id, token = token.id, remaining = before - 1, "search exited");

            if before == 1 && !Arc::ptr_eq(&snapshot, &state.current) {
                state.take_reclaimable()
            } else {
                Vec::new()
            }
        };
        reclaim(reclaimable);
        Ok(())
    }

    /// Publishes the result of a flush: `new_memory` becomes the mutable
    /// component, `flushed` (if any) becomes the newest disk component, and
    /// the previous mutable component is queued for reclamation.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if `new_memory` is not a memory component,
    /// `flushed` is not a disk component, or the current snapshot has no
    /// mutable component.
    pub fn flush_complete(
        &self,
        new_memory: ComponentRef,
        flushed: Option<ComponentRef>,
    ) -> LsmResult<()> {
        if new_memory.kind() != ComponentKind::Memory {
            return Err(LsmError::protocol("flush must install a memory component"));
        }
        if let Some(d) = &flushed {
            if d.kind() != ComponentKind::Disk {
                return Err(LsmError::protocol("flush output must be a disk component"));
            }
        }

        let mut state = self.state.lock();
        let current = state.current.components();
        let Some(old_memory) = current.first().filter(|c| c.kind() == ComponentKind::Memory)
        else {
            return Err(LsmError::protocol("no mutable component to flush"));
        };
        let old_memory = Arc::clone(old_memory);

        let mut next = Vec::with_capacity(current.len() + 1);
        next.push(new_memory);
        next.extend(flushed);
        next.extend(current[1..].iter().cloned());

        info!(
            flushed = %old_memory.id(),
            components = next.len(),
            "flush published"
        );
        let reclaimable = state.publish(next, vec![old_memory])?;
        drop(state);
        reclaim(reclaimable);
        Ok(())
    }

    /// Publishes the result of a merge: the contiguous run of disk
    /// components `merged` (newest first) is replaced by `replacement`, or
    /// simply removed when the merge produced no tuples.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if `merged` is empty, names an unknown or memory
    /// component, or is not a contiguous newest-to-oldest run.
    pub fn merge_complete(
        &self,
        merged: &[ComponentId],
        replacement: Option<ComponentRef>,
    ) -> LsmResult<()> {
        if merged.is_empty() {
            return Err(LsmError::protocol("merge of zero components"));
        }

        let mut state = self.state.lock();
        let current = state.current.components();
        let first = current
            .iter()
            .position(|c| c.id() == merged[0])
            .ok_or_else(|| LsmError::protocol(format!("merged component {} is not current", merged[0])))?;
        let run = current.get(first..first + merged.len()).ok_or_else(|| {
            LsmError::protocol("merged components run past the oldest component")
        })?;
        for (c, id) in run.iter().zip(merged) {
            if c.id() != *id {
                return Err(LsmError::protocol(format!(
                    "merged components are not a contiguous run: expected {}, found {}",
                    id,
                    c.id()
                )));
            }
            if c.kind() != ComponentKind::Disk {
                return Err(LsmError::protocol(format!("cannot merge memory component {}", id)));
            }
        }
        let obsolete: Vec<ComponentRef> = run.to_vec();

        let mut next = Vec::with_capacity(current.len());
        next.extend(current[..first].iter().cloned());
        next.extend(replacement);
        next.extend(current[first + merged.len()..].iter().cloned());

        info!(merged = merged.len(), components = next.len(), "merge published");
        let reclaimable = state.publish(next, obsolete)?;
        drop(state);
        reclaim(reclaimable);
        Ok(())
    }

    /// The components of the current snapshot, newest first.
    pub fn current_components(&self) -> Vec<ComponentRef> {
        self.state.lock().current.components().to_vec()
    }

    pub fn current_snapshot_id(&self) -> SnapshotId {
        self.state.lock().current.id
    }

    /// Searchers pinning snapshot `id`; zero for unknown or fully released
    /// snapshots.
    pub fn searchers(&self, id: SnapshotId) -> usize {
        let state = self.state.lock();
        if state.current.id == id {
            return state.current.searchers();
        }
        state
            .retired
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.searchers())
            .unwrap_or(0)
    }

    /// Total outstanding search tokens across all snapshots.
    pub fn outstanding_searches(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// Superseded components still waiting for their searches to finish.
    pub fn pending_reclamations(&self) -> usize {
        self.state.lock().obsolete.len()
    }
}

impl fmt::Debug for LsmHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LsmHarness")
            .field("current", &*state.current)
            .field("outstanding", &state.outstanding.len())
            .field("retired", &state.retired.len())
            .field("obsolete", &state.obsolete.len())
            .finish()
    }
}

fn validate_layout(components: &[ComponentRef]) -> LsmResult<()> {
    for (i, c) in components.iter().enumerate() {
        if c.kind() == ComponentKind::Memory && i != 0 {
            return Err(LsmError::protocol(format!(
                "memory component {} must be the newest component",
                c.id()
            )));
        }
        if components[..i].iter().any(|p| p.id() == c.id()) {
            return Err(LsmError::protocol(format!("component {} listed twice", c.id())));
        }
    }
    Ok(())
}

/// Destroys components outside the harness lock. Failures cannot be handed
/// back to any search, so they are logged.
fn reclaim(components: Vec<ComponentRef>) {
    for c in components {
        match c.destroy() {
            Ok(()) => info!(component = %c.id(), "component reclaimed"),
            Err(e) => warn!(component = %c.id(), error = %e, "component reclamation failed"),
        }
    }
}
