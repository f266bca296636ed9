//! The per-table filter block.
//!
//! Rather than one filter per data block, filters cover fixed 2 KiB
//! ranges of data-block file space, so a reader can find the filter
//! for a block from its file offset alone:
//!
//! ```text
//! +--------------------------------------------------+
//! | filter 0 | filter 1 | ... | filter n-1           |
//! +--------------------------------------------------+
//! | u32 offset[0] | ... | u32 offset[n-1]            |
//! +--------------------------------------------------+
//! | u32 offsets_array_start | u8 base_lg             |
//! +--------------------------------------------------+
//! ```
//!
//! A range with no keys stores an empty filter (its offset equals the
//! next filter's offset), which matches nothing.

use crate::byteutils::{put_fixed32, u32_from_le_bytes};
use crate::filter::FilterPolicy;
use std::sync::Arc;

/// Generate a new filter every 2 KiB of data-block space.
const FILTER_BASE_LG: usize = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened key contents.
    keys: Vec<u8>,
    /// Starting offset of each key in `keys`.
    starts: Vec<usize>,
    /// Filter data computed so far.
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> FilterBlockBuilder {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Declare that the next data block ends at `block_offset`,
    /// generating filters for every 2 KiB boundary passed.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(mut self) -> Vec<u8> {
        if !self.starts.is_empty() {
            self.generate_filter();
        }

        // Append the per-filter offsets and the encoding parameters.
        let array_offset = self.result.len() as u32;
        let offsets = std::mem::take(&mut self.filter_offsets);
        for offset in offsets {
            put_fixed32(&mut self.result, offset);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.push(FILTER_BASE_LG as u8);
        self.result
    }

    fn generate_filter(&mut self) {
        let num_keys = self.starts.len();
        if num_keys == 0 {
            // Fast path if there are no keys for this filter.
            self.filter_offsets.push(self.result.len() as u32);
            return;
        }

        // Make a list of key slices from the flattened representation.
        self.starts.push(self.keys.len()); // Simplify length computation.
        let key_slices: Vec<&[u8]> = (0..num_keys)
            .map(|i| &self.keys[self.starts[i]..self.starts[i + 1]])
            .collect();

        self.filter_offsets.push(self.result.len() as u32);
        self.policy.create_filter(&key_slices, &mut self.result);

        self.keys.clear();
        self.starts.clear();
    }
}

pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    contents: Vec<u8>,
    /// Offset of the offset array within `contents`.
    offset_array: usize,
    /// Number of filters.
    num: usize,
    base_lg: usize,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> FilterBlockReader {
        let n = contents.len();
        let mut reader = FilterBlockReader {
            policy,
            contents,
            offset_array: 0,
            num: 0,
            base_lg: 0,
        };
        // 1 byte for base_lg and 4 for the start of the offset array.
        if n < 5 {
            return reader;
        }
        let last_word = u32_from_le_bytes(&reader.contents[n - 5..]) as usize;
        if last_word > n - 5 {
            return reader;
        }
        reader.base_lg = reader.contents[n - 1] as usize;
        reader.offset_array = last_word;
        reader.num = (n - 5 - last_word) / 4;
        reader
    }

    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index < self.num {
            let start = u32_from_le_bytes(&self.contents[self.offset_array + index * 4..]) as usize;
            let limit =
                u32_from_le_bytes(&self.contents[self.offset_array + index * 4 + 4..]) as usize;
            if start <= limit && limit <= self.offset_array {
                let filter = &self.contents[start..limit];
                return self.policy.key_may_match(key, filter);
            } else if start == limit {
                // Empty filters do not match any keys.
                return false;
            }
        }
        // Errors are treated as potential matches.
        true
    }
}
