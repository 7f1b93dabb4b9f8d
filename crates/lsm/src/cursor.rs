//! Merge search cursor over the components of one snapshot.
//!
//! Produces tuples in strictly ascending key order. When a key is present in
//! several components only the tuple from the most recent one (lowest
//! [`Rank`]) is considered; it is emitted unless it is antimatter. Older
//! versions of the key are discarded without ever being emitted.
//!
//! ## Algorithm
//!
//! One [`MergeSlot`] per still-open component cursor lives in a min-heap
//! ordered by `(key, rank)`. The slot whose tuple was last handed out (or
//! skipped as antimatter) is kept aside as *pending*:
//!
//! ```text
//! loop {
//!   pending && head has same key  -> pop head, refill it from its cursor
//!   pending && (different | empty) -> refill pending, clear it
//!   no pending, head antimatter   -> pop head into pending (purges dups)
//!   otherwise                     -> head is the next output
//! }
//! ```
//!
//! A slot's cursor is only advanced once its tuple is no longer needed for
//! comparison or by the caller, so I/O stays lazy and a source is never
//! moved past a tuple that may still be read.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use tuple::{ComponentCursor, KeyComparator, KeyRange, Tuple};

use crate::component::ComponentRef;
use crate::error::{LsmError, LsmResult};
use crate::harness::{LsmHarness, SearchToken, SnapshotId};

/// Recency rank of a merge source: 0 is the newest component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(pub usize);

/// A component cursor tagged with its recency rank.
pub struct MergeSource {
    pub rank: Rank,
    pub cursor: Box<dyn ComponentCursor>,
}

impl MergeSource {
    pub fn new(rank: usize, cursor: Box<dyn ComponentCursor>) -> Self {
        Self {
            rank: Rank(rank),
            cursor,
        }
    }
}

/// What to do with the winning tuple of a key when it is antimatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AntimatterPolicy {
    /// Drop the key entirely (searches, and merges that include the oldest
    /// component).
    #[default]
    Suppress,
    /// Emit the delete marker so it keeps shadowing components older than
    /// the merged run.
    Retain,
}

/// A reference on the harness held for the lifetime of a search.
pub struct SearchLease {
    harness: Arc<LsmHarness>,
    token: SearchToken,
}

impl SearchLease {
    pub fn new(harness: Arc<LsmHarness>, token: SearchToken) -> Self {
        Self { harness, token }
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.token.snapshot_id()
    }

    fn release(self) -> LsmResult<()> {
        self.harness.exit_search(self.token)
    }
}

/// Heap entry: the current tuple of one source.
struct MergeSlot {
    rank: Rank,
    /// Index into `LsmSearchCursor::sources`.
    source: usize,
    tuple: Tuple,
    cmp: Arc<dyn KeyComparator>,
}

impl PartialEq for MergeSlot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeSlot {}

impl PartialOrd for MergeSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* key first, and on
        // equal keys the most recent component (smallest rank) first.
        self.cmp
            .compare(&other.tuple, &self.tuple)
            .then_with(|| other.rank.cmp(&self.rank))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Constructed or reset; holds nothing.
    Idle,
    Open,
    /// An underlying fault already closed every source and released the lease.
    Failed,
    Closed,
}

enum Step {
    DiscardHead,
    RefillPending,
    HoldHead,
}

/// K-way merge cursor with de-duplication and antimatter suppression.
///
/// Lifecycle: [`new`](Self::new) -> [`initialize`](Self::initialize) (or
/// [`open_components`](Self::open_components)) -> `has_next`/`advance` ->
/// [`close`](Self::close) -> optionally [`reset`](Self::reset) and reuse.
pub struct LsmSearchCursor {
    cmp: Arc<dyn KeyComparator>,
    policy: AntimatterPolicy,
    validate_order: bool,
    /// One entry per source; `None` once that source is exhausted and closed.
    sources: Vec<Option<Box<dyn ComponentCursor>>>,
    heap: BinaryHeap<MergeSlot>,
    pending: Option<MergeSlot>,
    /// Copy of the tuple returned by the last `advance`.
    last: Option<Tuple>,
    lease: Option<SearchLease>,
    state: CursorState,
}

impl fmt::Debug for LsmSearchCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LsmSearchCursor")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("open_sources", &self.open_sources())
            .field("heap", &self.heap.len())
            .field("pending", &self.pending.is_some())
            .field("snapshot", &self.snapshot_id())
            .finish()
    }
}

impl LsmSearchCursor {
    pub fn new(cmp: Arc<dyn KeyComparator>) -> Self {
        Self {
            cmp,
            policy: AntimatterPolicy::Suppress,
            validate_order: true,
            sources: Vec::new(),
            heap: BinaryHeap::new(),
            pending: None,
            last: None,
            lease: None,
            state: CursorState::Idle,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AntimatterPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_order_validation(mut self, validate: bool) -> Self {
        self.validate_order = validate;
        self
    }

    /// Opens one cursor per component (recency order, newest first) and
    /// initializes the merge over them.
    ///
    /// If any component fails to open, the cursors opened so far are closed
    /// and the lease is released before the error is returned.
    pub fn open_components(
        &mut self,
        components: &[ComponentRef],
        range: &KeyRange,
        lease: Option<SearchLease>,
    ) -> LsmResult<()> {
        let mut sources = Vec::with_capacity(components.len());
        for (rank, component) in components.iter().enumerate() {
            match component.open_cursor(range) {
                Ok(cursor) => sources.push(MergeSource::new(rank, cursor)),
                Err(e) => {
                    warn!(component = %component.id(), error = %e, "failed to open component cursor");
                    discard(sources, lease);
                    return Err(e.into());
                }
            }
        }
        self.initialize(sources, lease)
    }

    /// Seeds the merge from `sources`, which must be in strictly increasing
    /// rank order. Sources that are immediately exhausted are closed and
    /// dropped. `lease`, if given, is released exactly once when the cursor
    /// is closed or fails.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if the cursor is not idle or the ranks are out of
    /// order; `Storage` if a source fails while being primed. In every error
    /// case all sources are closed and the lease is released.
    pub fn initialize(
        &mut self,
        sources: Vec<MergeSource>,
        lease: Option<SearchLease>,
    ) -> LsmResult<()> {
        if self.state != CursorState::Idle {
            discard(sources, lease);
            return Err(LsmError::protocol("initialize on a cursor that is not idle"));
        }
        if let Some(w) = sources.windows(2).find(|w| w[0].rank >= w[1].rank) {
            let msg = format!(
                "merge sources out of recency order: rank {} followed by rank {}",
                w[0].rank.0, w[1].rank.0
            );
            discard(sources, lease);
            return Err(LsmError::protocol(msg));
        }

        let mut ranks = Vec::with_capacity(sources.len());
        self.sources = sources
            .into_iter()
            .map(|s| {
                ranks.push(s.rank);
                Some(s.cursor)
            })
            .collect();
        self.lease = lease;
        self.state = CursorState::Open;
        self.heap = BinaryHeap::with_capacity(self.sources.len().max(1));

        for (source, rank) in ranks.into_iter().enumerate() {
            if let Err(e) = self.prime(source, rank) {
                return Err(self.fail(e));
            }
        }
        debug!(sources = self.sources.len(), live = self.heap.len(), "merge cursor initialized");
        Ok(())
    }

    /// Runs the filtering pass and reports whether another tuple is available.
    ///
    /// # Errors
    ///
    /// `State` if the cursor is not open. A `Storage` or order
    /// `ProtocolViolation` from a source closes the cursor (all sources, and
    /// the lease) before it is returned.
    pub fn has_next(&mut self) -> LsmResult<bool> {
        self.ensure_open("has_next")?;
        if let Err(e) = self.settle() {
            return Err(self.fail(e));
        }
        Ok(!self.heap.is_empty())
    }

    /// Moves to the next tuple and returns it.
    ///
    /// # Errors
    ///
    /// `State` if nothing is left (i.e. `has_next` would be false); source
    /// faults as for [`has_next`](Self::has_next).
    pub fn advance(&mut self) -> LsmResult<&Tuple> {
        self.ensure_open("advance")?;
        if let Err(e) = self.settle() {
            return Err(self.fail(e));
        }
        match self.heap.pop() {
            Some(slot) => {
                self.last = Some(slot.tuple.clone());
                Ok(&self.pending.insert(slot).tuple)
            }
            None => Err(LsmError::state("advance called with no tuple remaining")),
        }
    }

    /// The tuple returned by the last `advance`. It stays readable across
    /// `has_next` until the next `advance`.
    ///
    /// # Errors
    ///
    /// `State` before the first `advance` or once the cursor is not open.
    pub fn tuple(&self) -> LsmResult<&Tuple> {
        match (&self.state, &self.last) {
            (CursorState::Open, Some(t)) => Ok(t),
            _ => Err(LsmError::state("no current tuple")),
        }
    }

    /// Closes every remaining source and releases the harness lease.
    ///
    /// Each source close is attempted even if an earlier one fails, and the
    /// lease is always released. The first close failure is returned after
    /// that.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if the cursor was never opened or is already
    /// closed; the lease is never released twice. Closing a cursor that
    /// already failed is not an error.
    pub fn close(&mut self) -> LsmResult<()> {
        match self.state {
            CursorState::Open => {
                let close_error = self.close_sources();
                let released = self.release_lease();
                self.state = CursorState::Closed;
                if let Some(e) = close_error {
                    return Err(LsmError::Storage(e));
                }
                released
            }
            CursorState::Failed => {
                self.state = CursorState::Closed;
                Ok(())
            }
            CursorState::Idle => Err(LsmError::protocol("close on a cursor that was never opened")),
            CursorState::Closed => Err(LsmError::protocol("cursor closed twice")),
        }
    }

    /// Returns the cursor to the idle state so it can be initialized again.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` while the cursor is open, since it still holds a
    /// harness reference and open sources.
    pub fn reset(&mut self) -> LsmResult<()> {
        if self.state == CursorState::Open {
            return Err(LsmError::protocol("reset while a harness reference is held"));
        }
        self.sources.clear();
        self.heap.clear();
        self.pending = None;
        self.last = None;
        self.lease = None;
        self.state = CursorState::Idle;
        Ok(())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == CursorState::Open
    }

    /// Sources not yet exhausted and closed.
    pub fn open_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
    }

    /// Snapshot pinned by this cursor's lease, if it still holds one.
    pub fn snapshot_id(&self) -> Option<SnapshotId> {
        self.lease.as_ref().map(SearchLease::snapshot_id)
    }

    fn ensure_open(&self, op: &str) -> LsmResult<()> {
        if self.state == CursorState::Open {
            Ok(())
        } else {
            Err(LsmError::state(format!("{} on a cursor that is not open ({:?})", op, self.state)))
        }
    }

    /// The filtering / de-duplication pass. On return, either the heap is
    /// empty or its head is the next tuple to emit; nothing is pending.
    fn settle(&mut self) -> LsmResult<()> {
        loop {
            let step = match (self.heap.peek(), &self.pending) {
                (None, None) => return Ok(()),
                (None, Some(_)) => Step::RefillPending,
                (Some(head), None) => {
                    if head.tuple.is_antimatter() && self.policy == AntimatterPolicy::Suppress {
                        Step::HoldHead
                    } else {
                        return Ok(());
                    }
                }
                (Some(head), Some(pending)) => {
                    if self.cmp.compare(&pending.tuple, &head.tuple) == Ordering::Equal {
                        Step::DiscardHead
                    } else {
                        Step::RefillPending
                    }
                }
            };

            match step {
                Step::DiscardHead => {
                    // an older version of the pending key
                    if let Some(stale) = self.heap.pop() {
                        self.refill(stale)?;
                    }
                }
                Step::RefillPending => {
                    if let Some(slot) = self.pending.take() {
                        self.refill(slot)?;
                    }
                }
                Step::HoldHead => self.pending = self.heap.pop(),
            }
        }
    }

    /// Pulls the first tuple of a freshly opened source.
    fn prime(&mut self, source: usize, rank: Rank) -> LsmResult<()> {
        let Some(cursor) = self.sources[source].as_mut() else {
            return Ok(());
        };
        if cursor.has_next()? {
            cursor.advance()?;
            let tuple = current_of(&**cursor, rank)?;
            self.heap.push(MergeSlot {
                rank,
                source,
                tuple,
                cmp: Arc::clone(&self.cmp),
            });
        } else {
            self.close_source(source)?;
        }
        Ok(())
    }

    /// Replaces the slot's tuple with the next one from its source, or
    /// closes the source when it is exhausted.
    fn refill(&mut self, mut slot: MergeSlot) -> LsmResult<()> {
        let Some(cursor) = self.sources[slot.source].as_mut() else {
            return Ok(());
        };
        if !cursor.has_next()? {
            return self.close_source(slot.source);
        }
        cursor.advance()?;
        let next = current_of(&**cursor, slot.rank)?;
        if self.validate_order && self.cmp.compare(&slot.tuple, &next) != Ordering::Less {
            return Err(LsmError::protocol(format!(
                "component at rank {} is not strictly ascending: {} followed by {}",
                slot.rank.0, slot.tuple, next
            )));
        }
        slot.tuple = next;
        self.heap.push(slot);
        Ok(())
    }

    fn close_source(&mut self, source: usize) -> LsmResult<()> {
        if let Some(mut cursor) = self.sources[source].take() {
            cursor.close()?;
        }
        Ok(())
    }

    /// Closes every open source, returning the first failure.
    fn close_sources(&mut self) -> Option<anyhow::Error> {
        self.heap.clear();
        self.pending = None;
        self.last = None;
        let mut first_error = None;
        for (i, slot) in self.sources.iter_mut().enumerate() {
            if let Some(mut cursor) = slot.take() {
                if let Err(e) = cursor.close() {
                    warn!(source = i, error = %e, "component cursor close failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error
    }

    fn release_lease(&mut self) -> LsmResult<()> {
        match self.lease.take() {
            Some(lease) => lease.release(),
            None => Ok(()),
        }
    }

    /// Tears the cursor down after a source fault and hands the fault back.
    fn fail(&mut self, e: LsmError) -> LsmError {
        warn!(error = %e, "merge cursor failed; closing sources");
        self.close_sources();
        if let Err(release) = self.release_lease() {
            warn!(error = %release, "lease release failed");
        }
        self.state = CursorState::Failed;
        e
    }
}

fn current_of(cursor: &dyn ComponentCursor, rank: Rank) -> LsmResult<Tuple> {
    cursor.current().cloned().ok_or_else(|| {
        LsmError::protocol(format!(
            "component at rank {} advanced without a current tuple",
            rank.0
        ))
    })
}

/// Closes sources and releases a lease that never made it into a cursor.
fn discard(sources: Vec<MergeSource>, lease: Option<SearchLease>) {
    for mut s in sources {
        if let Err(e) = s.cursor.close() {
            warn!(rank = s.rank.0, error = %e, "component cursor close failed");
        }
    }
    if let Some(lease) = lease {
        if let Err(e) = lease.release() {
            warn!(error = %e, "lease release failed");
        }
    }
}

/// Best-effort close on drop, mirroring an explicit `close`.
impl Drop for LsmSearchCursor {
    fn drop(&mut self) {
        if self.state == CursorState::Open {
            if let Err(e) = self.close() {
                warn!(error = %e, "close on drop failed");
            }
        }
    }
}

/// Lets a merge cursor act as a source inside another merge.
impl ComponentCursor for LsmSearchCursor {
    fn has_next(&mut self) -> anyhow::Result<bool> {
        LsmSearchCursor::has_next(self).map_err(LsmError::into_anyhow)
    }

    fn advance(&mut self) -> anyhow::Result<()> {
        LsmSearchCursor::advance(self)
            .map(|_| ())
            .map_err(LsmError::into_anyhow)
    }

    fn current(&self) -> Option<&Tuple> {
        self.tuple().ok()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        LsmSearchCursor::close(self).map_err(LsmError::into_anyhow)
    }
}
