//! # Tuple - records, key ordering and the component cursor capability
//!
//! The vocabulary shared by every other crate in the workspace:
//!
//! - [`Field`] / [`Tuple`]: an ordered sequence of typed fields. The leading
//!   fields form the key, the rest is payload. A tuple can be flagged as
//!   *antimatter*, i.e. a delete marker for its key rather than a value.
//! - [`KeyComparator`]: the caller-supplied total order over tuple keys.
//!   [`FieldComparator`] is the default, comparing the first `key_fields`
//!   fields in natural [`Field`] order.
//! - [`KeyRange`]: lower/upper key bounds for a range search.
//! - [`ComponentCursor`]: the forward-only, single-pass iterator every
//!   component (in-memory or on-disk) hands out to the merge layer.
//!
//! ```text
//! Tuple { fields: [ key_0 | key_1 | ... | payload ... ], antimatter }
//!                  \_____ key_fields _____/
//! ```

mod compare;
mod cursor;
mod range;
mod record;

pub use compare::{FieldComparator, KeyComparator};
pub use cursor::ComponentCursor;
pub use range::KeyRange;
pub use record::{Field, Tuple};
