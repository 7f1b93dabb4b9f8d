use anyhow::Result;

use crate::Tuple;

/// A stateful, single-pass, forward-only iterator bound to one component.
///
/// Lifecycle: open -> zero or more (`has_next` / `advance`) -> `close`
/// (exactly once). Tuples must be produced in strictly ascending key order.
///
/// ```text
/// while cursor.has_next()? {
///     cursor.advance()?;
///     let t = cursor.current();   // valid until the next advance()
/// }
/// cursor.close()?;
/// ```
///
/// Any error is a storage-level fault; callers propagate it rather than
/// retry.
pub trait ComponentCursor: Send {
    /// Returns `true` if another tuple can be reached with [`advance`](Self::advance).
    fn has_next(&mut self) -> Result<bool>;

    /// Moves to the next tuple.
    fn advance(&mut self) -> Result<()>;

    /// The tuple at the current position, or `None` before the first
    /// `advance` (and after `close`).
    fn current(&self) -> Option<&Tuple>;

    /// Releases whatever resource the cursor holds.
    fn close(&mut self) -> Result<()>;
}

impl<C: ComponentCursor + ?Sized> ComponentCursor for Box<C> {
    fn has_next(&mut self) -> Result<bool> {
        (**self).has_next()
    }

    fn advance(&mut self) -> Result<()> {
        (**self).advance()
    }

    fn current(&self) -> Option<&Tuple> {
        (**self).current()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
