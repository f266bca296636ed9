//! The mutable in-memory table.
//!
//! A memtable wraps the concurrent skip list with the entry encoding
//! shared by the rest of the store:
//!
//! ```text
//! +--------------------+--------------+--------------------+-------+
//! | varint32(iklen)    | internal key | varint32(vlen)     | value |
//! +--------------------+--------------+--------------------+-------+
//! ```
//!
//! where the internal key is `user_key || (sequence << 8) | type`.
//! Entries live in the memtable's arena and are immutable once
//! inserted.
//!
//! One writer at a time is serialized internally; any number of
//! readers may run concurrently with the writer. Callers share a
//! memtable by wrapping it in `Arc`, which also gives readers the
//! "keep the structure alive" guarantee the skip list requires.

use crate::byteutils::{decode_varint32_raw, encode_varint32_to, varint_length};
use crate::collections::arena::Arena;
use crate::collections::skip_list::{KeyComparator, SkipList, SkipListIterator};
use crate::db::comparator::Comparator;
use crate::db::key_types::{
    pack_sequence_and_type, InternalKeyComparator, LookupKey, SequenceNumber, ValueType,
};
use crate::iterator::KvIterator;
use crate::{Error, Result};
use std::cmp::Ordering as CmpOrdering;
use std::sync::{Arc, Mutex};

/// Decode the length-prefixed slice starting at `p`.
///
/// # Safety
///
/// `p` must point at a well-formed length-prefixed entry.
unsafe fn length_prefixed_slice<'a>(p: *const u8) -> &'a [u8] {
    // +5: the prefix of a well-formed entry cannot be longer.
    let (len, data) = decode_varint32_raw(p, p.add(5)).expect("corrupted length prefix");
    std::slice::from_raw_parts(data, len as usize)
}

/// Orders skip-list entries by decoding both length prefixes and
/// delegating to the internal-key comparator.
#[derive(Clone)]
pub struct MemKeyComparator {
    comparator: InternalKeyComparator,
}

impl KeyComparator for MemKeyComparator {
    unsafe fn compare(&self, a: *const u8, b: *const u8) -> CmpOrdering {
        self.comparator
            .compare(length_prefixed_slice(a), length_prefixed_slice(b))
    }
}

pub struct MemTable {
    comparator: InternalKeyComparator,
    // Serializes writers; readers never take it.
    write_lock: Mutex<()>,
    arena: Arc<Arena>,
    table: SkipList<MemKeyComparator>,
}

impl MemTable {
    pub fn new(comparator: InternalKeyComparator) -> MemTable {
        let arena = Arc::new(Arena::default());
        let table = SkipList::new(
            MemKeyComparator {
                comparator: comparator.clone(),
            },
            arena.clone(),
        );
        MemTable {
            comparator,
            write_lock: Mutex::new(()),
            arena,
            table,
        }
    }

    /// Bytes of arena memory backing this table. Safe to call
    /// concurrently with a writer.
    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    /// Add an entry. Requires strictly increasing `(key, sequence)`
    /// pairs over the table's lifetime so that no two entries compare
    /// equal.
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let internal_key_size = key.len() + 8;
        let encoded_len = varint_length(internal_key_size as u64)
            + internal_key_size
            + varint_length(value.len() as u64)
            + value.len();

        let _guard = self.write_lock.lock().unwrap();
        unsafe {
            let buf = self.arena.allocate(encoded_len);
            let dst = std::slice::from_raw_parts_mut(buf, encoded_len);
            let mut offset = encode_varint32_to(dst, internal_key_size as u32);
            dst[offset..offset + key.len()].copy_from_slice(key);
            offset += key.len();
            dst[offset..offset + 8]
                .copy_from_slice(&pack_sequence_and_type(sequence, value_type).to_le_bytes());
            offset += 8;
            offset += encode_varint32_to(&mut dst[offset..], value.len() as u32);
            dst[offset..offset + value.len()].copy_from_slice(value);
            debug_assert_eq!(offset + value.len(), encoded_len);

            self.table.insert(buf);
        }
    }

    /// Look up the newest entry for `key`'s user key at or below its
    /// sequence number.
    ///
    /// Returns `None` when this table holds nothing for the user key,
    /// `Some(Ok(value))` for a live value, and
    /// `Some(Err(Error::KeyNotFound))` when the newest visible entry
    /// is a deletion marker.
    pub fn get(&self, key: &LookupKey) -> Option<Result<Vec<u8>>> {
        let mut iter = self.table.iter();
        iter.seek(key.memtable_key().as_ptr());
        if !iter.valid() {
            return None;
        }
        unsafe {
            // The seek skipped every entry with a larger sequence
            // number; only the user key still needs checking.
            let entry = iter.key();
            let internal_key = length_prefixed_slice(entry);
            let user_key = &internal_key[..internal_key.len() - 8];
            if self
                .comparator
                .user_comparator()
                .compare(user_key, key.user_key())
                != CmpOrdering::Equal
            {
                return None;
            }

            let tag =
                crate::byteutils::u64_from_le_bytes(&internal_key[internal_key.len() - 8..]);
            match (tag & 0xff) as u8 {
                t if t == ValueType::Value as u8 => {
                    let value =
                        length_prefixed_slice(internal_key.as_ptr().add(internal_key.len()));
                    Some(Ok(value.to_vec()))
                }
                _ => Some(Err(Error::KeyNotFound)),
            }
        }
    }

    /// Iterate over the table in internal-key order. Keys and values
    /// are slices into arena storage, valid while the iterator's
    /// borrow of the memtable lasts.
    pub fn iter(&self) -> MemTableIterator {
        MemTableIterator {
            iter: self.table.iter(),
            tmp: Vec::new(),
        }
    }
}

pub struct MemTableIterator<'a> {
    iter: SkipListIterator<'a, MemKeyComparator>,
    // Scratch for encoding seek targets in memtable-key form.
    tmp: Vec<u8>,
}

impl<'a> KvIterator for MemTableIterator<'a> {
    fn valid(&self) -> bool {
        self.iter.valid()
    }

    fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
    }

    fn seek_to_last(&mut self) {
        self.iter.seek_to_last();
    }

    fn seek(&mut self, target: &[u8]) {
        // `target` is an internal key; the skip list stores
        // length-prefixed entries.
        self.tmp.clear();
        let mut prefix = [0u8; 5];
        let n = encode_varint32_to(&mut prefix, target.len() as u32);
        self.tmp.extend_from_slice(&prefix[..n]);
        self.tmp.extend_from_slice(target);
        self.iter.seek(self.tmp.as_ptr());
    }

    fn next(&mut self) {
        self.iter.next();
    }

    fn prev(&mut self) {
        self.iter.prev();
    }

    fn key(&self) -> &[u8] {
        unsafe { length_prefixed_slice(self.iter.key()) }
    }

    fn value(&self) -> &[u8] {
        unsafe {
            let key = length_prefixed_slice(self.iter.key());
            length_prefixed_slice(key.as_ptr().add(key.len()))
        }
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
