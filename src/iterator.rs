//! Common interface for ordered key/value iterators.

use crate::Result;

/// An iterator over a sorted sequence of byte-string key/value pairs.
///
/// A freshly created iterator is not positioned; callers must seek
/// before using `key`/`value`/`next`/`prev`. Iterators are
/// single-threaded objects.
pub trait KvIterator {
    fn valid(&self) -> bool;

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Position at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Requires `valid()`.
    fn next(&mut self);

    /// Requires `valid()`.
    fn prev(&mut self);

    /// Requires `valid()`.
    fn key(&self) -> &[u8];

    /// Requires `valid()`.
    fn value(&self) -> &[u8];

    /// First error encountered, if any. An iterator with a non-ok
    /// status is permanently invalid.
    fn status(&self) -> Result<()>;
}
