//! Pluggable per-table filters.

pub mod bloom_filter;

pub use bloom_filter::BloomFilterPolicy;

/// Builds and probes the probabilistic filters stored in a table's
/// filter block. `key_may_match` must never return `false` for a key
/// that was passed to `create_filter`; false positives are allowed.
pub trait FilterPolicy: Send + Sync {
    /// Name recorded in the table's metaindex. Changing the filter
    /// encoding in an incompatible way requires changing the name.
    fn name(&self) -> &'static str;

    /// Append a filter summarizing `keys` to `dst`.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}
