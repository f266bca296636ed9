//! Builds the prefix-compressed key/value blocks used for data, index
//! and metaindex content.
//!
//! Keys within a block share prefixes with their predecessor; every
//! `block_restart_interval` entries the full key is stored and its
//! offset recorded in the restart array, which readers binary-search:
//!
//! ```text
//! +-----------------+-----------------+-----+------------------------+
//! | entry 0         | entry 1         | ... | entry n-1              |
//! +-----------------+-----------------+-----+------------------------+
//! | u32 restart[0] | ... | u32 restart[k-1] | u32 num_restarts       |
//! +----------------------------------------------------------------—+
//! ```
//!
//! Each entry is
//! `varint32(shared) || varint32(non_shared) || varint32(value_len) ||
//! key_delta || value`, with `shared == 0` at restart points.

use crate::byteutils::{put_fixed32, put_varint32};
use crate::db::comparator::Comparator;
use std::cmp::Ordering;
use std::sync::Arc;

pub struct BlockBuilder {
    block_restart_interval: usize,
    cmp: Arc<dyn Comparator>,
    buffer: Vec<u8>,
    /// Offsets of restart points; always starts with 0.
    restarts: Vec<u32>,
    /// Entries emitted since the last restart.
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(block_restart_interval: usize, cmp: Arc<dyn Comparator>) -> BlockBuilder {
        debug_assert!(block_restart_interval >= 1);
        BlockBuilder {
            block_restart_interval,
            cmp,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    /// Reset as if newly constructed.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Append an entry. Requires that `finish` has not been called
    /// since the last `reset` and that `key` is larger than any
    /// previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.block_restart_interval);
        debug_assert!(
            self.buffer.is_empty() || self.cmp.compare(key, &self.last_key) == Ordering::Greater
        );

        let mut shared = 0;
        if self.counter < self.block_restart_interval {
            // See how much sharing to do with the previous key.
            let min_length = self.last_key.len().min(key.len());
            while shared < min_length && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart compression.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Append the restart array and return the finished block
    /// contents, valid until the next `reset`.
    pub fn finish(&mut self) -> &[u8] {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Uncompressed size of the block being built, were `finish`
    /// called now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::db::comparator::BytewiseComparator;
    use crate::sstable::block_builder::BlockBuilder;
    use std::sync::Arc;

    #[test]
    fn test_empty_block() {
        let mut builder = BlockBuilder::new(16, Arc::new(BytewiseComparator));
        assert!(builder.is_empty());
        assert_eq!(builder.current_size_estimate(), 8);
        let contents = builder.finish();
        // Just the restart array: one restart at 0 plus the count.
        assert_eq!(contents, &[0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_prefix_compression() {
        let mut builder = BlockBuilder::new(16, Arc::new(BytewiseComparator));
        builder.add(b"apple", b"1");
        builder.add(b"applesauce", b"2");
        let contents = builder.finish().to_vec();

        // First entry: no sharing.
        assert_eq!(&contents[..3], &[0, 5, 1]);
        assert_eq!(&contents[3..9], b"apple1");
        // Second entry shares the full 5-byte prefix.
        assert_eq!(&contents[9..12], &[5, 5, 1]);
        assert_eq!(&contents[12..18], b"sauce2");
    }

    #[test]
    fn test_restart_interval_one_never_shares() {
        let mut builder = BlockBuilder::new(1, Arc::new(BytewiseComparator));
        builder.add(b"aaa", b"x");
        builder.add(b"aab", b"y");
        builder.add(b"aac", b"z");
        let contents = builder.finish().to_vec();
        // num_restarts == 3: every entry is a restart point.
        let n = contents.len();
        assert_eq!(&contents[n - 4..], &[3, 0, 0, 0]);
        // Every entry stores its key whole.
        assert_eq!(&contents[..3], &[0, 3, 1]);
    }

    #[test]
    fn test_reset_reuses_builder() {
        let mut builder = BlockBuilder::new(16, Arc::new(BytewiseComparator));
        builder.add(b"k", b"v");
        let first = builder.finish().to_vec();
        builder.reset();
        builder.add(b"k", b"v");
        assert_eq!(builder.finish(), first.as_slice());
    }

    #[test]
    fn test_size_estimate_tracks_contents() {
        let mut builder = BlockBuilder::new(16, Arc::new(BytewiseComparator));
        let mut last = builder.current_size_estimate();
        for i in 0..100 {
            builder.add(format!("key{:03}", i).as_bytes(), b"value");
            let estimate = builder.current_size_estimate();
            assert!(estimate > last);
            last = estimate;
        }
        assert_eq!(builder.finish().len(), last);
    }
}
