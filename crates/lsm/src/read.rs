/// Read path: search(), search_with(), get().
///
/// Every read pins the current snapshot through the harness and merges its
/// components with an [`LsmSearchCursor`]. The lease travels with the cursor
/// and is released when it closes.
use std::ops::Bound;
use std::sync::Arc;
use tuple::{Field, KeyRange, Tuple};

use crate::cursor::{AntimatterPolicy, LsmSearchCursor, SearchLease};
use crate::error::LsmResult;
use crate::LsmIndex;

impl LsmIndex {
    /// Opens a search over `range`, reading the mutable component unless
    /// the config says otherwise.
    pub fn search(&self, range: &KeyRange) -> LsmResult<LsmSearchCursor> {
        self.search_with(range, self.config.include_mem_component)
    }

    /// Opens a search over `range`.
    ///
    /// The returned cursor yields live tuples in ascending key order and
    /// must be closed (or dropped) to release its snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a component cursor cannot be opened; nothing is
    /// left pinned in that case.
    pub fn search_with(&self, range: &KeyRange, include_mem: bool) -> LsmResult<LsmSearchCursor> {
        let (components, token) = self.harness.enter_search(include_mem);
        let lease = SearchLease::new(Arc::clone(&self.harness), token);

        let mut cursor = LsmSearchCursor::new(Arc::clone(&self.cmp))
            .with_policy(AntimatterPolicy::Suppress)
            .with_order_validation(self.config.validate_order);
        cursor.open_components(&components, range, Some(lease))?;
        Ok(cursor)
    }

    /// Looks up the live tuple whose key equals `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if any component read fails.
    pub fn get(&self, key: Vec<Field>) -> LsmResult<Option<Tuple>> {
        let target = Tuple::new(key);
        let range = KeyRange::new(Bound::Included(target.clone()), Bound::Included(target));
        let mut cursor = self.search(&range)?;
        let found = if cursor.has_next()? {
            Some(cursor.advance()?.clone())
        } else {
            None
        };
        cursor.close()?;
        Ok(found)
    }
}
