//! Reader side of the block format produced by `BlockBuilder`.

use crate::byteutils::{decode_varint32, u32_from_le_bytes};
use crate::db::comparator::Comparator;
use crate::iterator::KvIterator;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::sync::Arc;

pub struct Block {
    data: Vec<u8>,
    /// Offset of the restart array.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Block> {
        if data.len() < 4 {
            return Err(Error::corruption("bad block contents"));
        }
        let num_restarts = u32_from_le_bytes(&data[data.len() - 4..]);
        let max_restarts_allowed = (data.len() - 4) / 4;
        if num_restarts as usize > max_restarts_allowed {
            // The size is too small for num_restarts.
            return Err(Error::corruption("bad block contents"));
        }
        let restart_offset = data.len() - 4 - num_restarts as usize * 4;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts as usize);
        u32_from_le_bytes(&self.data[self.restart_offset + index * 4..]) as usize
    }
}

/// Decode the `(shared, non_shared, value_len)` header of the entry at
/// `p`, returning the lengths and the offset of the key delta. `None`
/// on any malformed or truncated encoding.
fn decode_entry(data: &[u8], p: usize, limit: usize) -> Option<(usize, usize, usize, usize)> {
    if limit < p + 3 {
        return None;
    }
    let region = &data[p..limit];
    let (shared, n0) = decode_varint32(region)?;
    let (non_shared, n1) = decode_varint32(&region[n0..])?;
    let (value_len, n2) = decode_varint32(&region[n0 + n1..])?;
    let header_len = n0 + n1 + n2;
    if limit - p - header_len < non_shared as usize + value_len as usize {
        return None;
    }
    Some((
        shared as usize,
        non_shared as usize,
        value_len as usize,
        p + header_len,
    ))
}

/// Iterator over one block. Holds the block via `Arc`, so cached
/// blocks stay alive for as long as any iterator uses them.
pub struct BlockIter {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    /// Offset of the current entry; `== restart_offset` means the
    /// iterator is exhausted.
    current: usize,
    /// Index of the restart interval containing `current`.
    restart_index: usize,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Option<Error>,
}

impl BlockIter {
    pub fn new(block: Arc<Block>, cmp: Arc<dyn Comparator>) -> BlockIter {
        let current = block.restart_offset;
        let restart_index = block.num_restarts as usize;
        BlockIter {
            block,
            cmp,
            current,
            restart_index,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            status: None,
        }
    }

    /// Offset just past the current entry.
    #[inline]
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        // The entry itself is decoded by the next parse_next_key;
        // position the cursor just before it.
        self.value_offset = self.block.restart_point(index);
        self.value_len = 0;
    }

    fn corruption_error(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts as usize;
        self.status = Some(Error::corruption("bad entry in block"));
        self.key.clear();
        self.value_offset = 0;
        self.value_len = 0;
    }

    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.block.restart_offset {
            // No more entries; mark as invalid.
            self.current = self.block.restart_offset;
            self.restart_index = self.block.num_restarts as usize;
            return false;
        }

        match decode_entry(&self.block.data, self.current, self.block.restart_offset) {
            Some((shared, non_shared, value_len, key_delta)) if self.key.len() >= shared => {
                self.key.truncate(shared);
                self.key
                    .extend_from_slice(&self.block.data[key_delta..key_delta + non_shared]);
                self.value_offset = key_delta + non_shared;
                self.value_len = value_len;
                while self.restart_index + 1 < self.block.num_restarts as usize
                    && self.block.restart_point(self.restart_index + 1) < self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            _ => {
                self.corruption_error();
                false
            }
        }
    }
}

impl KvIterator for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.corruption_error();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.corruption_error();
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts as usize - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.block.restart_offset {
            // Keep skipping.
        }
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.corruption_error();
            return;
        }
        // Binary search in the restart array for the last restart
        // point whose key is < target.
        let mut left = 0usize;
        let mut right = self.block.num_restarts as usize - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.block.restart_point(mid);
            match decode_entry(&self.block.data, region_offset, self.block.restart_offset) {
                Some((0, non_shared, _, key_offset)) => {
                    let mid_key = &self.block.data[key_offset..key_offset + non_shared];
                    if self.cmp.compare(mid_key, target) == Ordering::Less {
                        // Key at mid is smaller than target: blocks
                        // before mid are uninteresting.
                        left = mid;
                    } else {
                        // Key at mid is >= target: blocks at or after
                        // mid are uninteresting.
                        right = mid - 1;
                    }
                }
                _ => {
                    // Restart entries must store the whole key.
                    self.corruption_error();
                    return;
                }
            }
        }

        // Linear scan within the restart interval for the first key
        // >= target.
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());

        // Scan backwards to a restart point before the current entry,
        // then replay forward.
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No more entries.
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts as usize;
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {
            // Loop until the entry just before `original`.
        }
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::comparator::BytewiseComparator;
    use crate::iterator::KvIterator;
    use crate::sstable::block::{Block, BlockIter};
    use crate::sstable::block_builder::BlockBuilder;
    use std::sync::Arc;

    fn build_block(interval: usize, entries: &[(&[u8], &[u8])]) -> Arc<Block> {
        let mut builder = BlockBuilder::new(interval, Arc::new(BytewiseComparator));
        for (key, value) in entries {
            builder.add(key, value);
        }
        Arc::new(Block::new(builder.finish().to_vec()).unwrap())
    }

    fn iter_of(block: &Arc<Block>) -> BlockIter {
        BlockIter::new(block.clone(), Arc::new(BytewiseComparator))
    }

    fn sample_entries() -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..100)
            .map(|i| {
                (
                    format!("key{:03}", i).into_bytes(),
                    format!("value{}", i).into_bytes(),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_block_iterates_nothing() {
        let block = build_block(16, &[]);
        let mut iter = iter_of(&block);
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek(b"anything");
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_forward_iteration() {
        for interval in [1, 4, 16, 128] {
            let entries = sample_entries();
            let borrowed: Vec<(&[u8], &[u8])> = entries
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect();
            let block = build_block(interval, &borrowed);
            let mut iter = iter_of(&block);
            iter.seek_to_first();
            for (key, value) in &entries {
                assert!(iter.valid());
                assert_eq!(iter.key(), key.as_slice());
                assert_eq!(iter.value(), value.as_slice());
                iter.next();
            }
            assert!(!iter.valid());
        }
    }

    #[test]
    fn test_backward_iteration() {
        for interval in [1, 4, 16, 128] {
            let entries = sample_entries();
            let borrowed: Vec<(&[u8], &[u8])> = entries
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect();
            let block = build_block(interval, &borrowed);
            let mut iter = iter_of(&block);
            iter.seek_to_last();
            for (key, value) in entries.iter().rev() {
                assert!(iter.valid());
                assert_eq!(iter.key(), key.as_slice());
                assert_eq!(iter.value(), value.as_slice());
                iter.prev();
            }
            assert!(!iter.valid());
        }
    }

    #[test]
    fn test_seek() {
        let entries = sample_entries();
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        for interval in [1, 16] {
            let block = build_block(interval, &borrowed);
            let mut iter = iter_of(&block);

            // Exact hits.
            iter.seek(b"key050");
            assert!(iter.valid());
            assert_eq!(iter.key(), b"key050");
            assert_eq!(iter.value(), b"value50");

            // Between keys: lands on the next larger one.
            iter.seek(b"key050x");
            assert!(iter.valid());
            assert_eq!(iter.key(), b"key051");

            // Before the first key.
            iter.seek(b"a");
            assert!(iter.valid());
            assert_eq!(iter.key(), b"key000");

            // Past the last key.
            iter.seek(b"z");
            assert!(!iter.valid());
        }
    }

    #[test]
    fn test_single_restart_covers_all_entries() {
        let entries = sample_entries();
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        // Interval larger than the entry count: one restart point.
        let block = build_block(1000, &borrowed);
        let mut iter = iter_of(&block);
        iter.seek(b"key099");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key099");
        let mut count = 0;
        iter.seek_to_first();
        while iter.valid() {
            count += 1;
            iter.next();
        }
        assert_eq!(count, entries.len());
    }

    #[test]
    fn test_truncated_contents_rejected() {
        assert!(Block::new(vec![]).is_err());
        assert!(Block::new(vec![1, 2, 3]).is_err());
        // num_restarts larger than the block could hold.
        assert!(Block::new(vec![0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_garbage_entry_sets_status() {
        // A block whose entry region is garbage but whose restart
        // array is well-formed.
        let mut data = vec![0x80u8; 12]; // truncated varints
        data.extend_from_slice(&0u32.to_le_bytes()); // restart[0]
        data.extend_from_slice(&1u32.to_le_bytes()); // num_restarts
        let block = Arc::new(Block::new(data).unwrap());
        let mut iter = iter_of(&block);
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().is_err());
    }
}
