//! Internal key encoding.
//!
//! Every entry carries a 64-bit tag packing a 56-bit sequence number
//! with a one-byte value type:
//!
//! ```text
//! +----------+----------------------------------+
//! | user key | (sequence << 8) | type   u64, le |
//! +----------+----------------------------------+
//! \----------------- internal key -------------/
//! ```
//!
//! Internal keys order by user key ascending, then tag descending, so
//! the newest version of a user key comes first.

use crate::byteutils::{put_fixed64, put_varint32, u64_from_le_bytes, varint_length};
use crate::db::comparator::Comparator;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::sync::Arc;

pub type SequenceNumber = u64;

/// Sequence numbers occupy 56 bits, leaving the low byte of the tag
/// for the value type.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
}

/// The type used when constructing seek targets. `Value` is the
/// highest type byte, so `(seq, VALUE_TYPE_FOR_SEEK)` sorts before any
/// entry with the same user key and sequence number.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<ValueType> {
        match byte {
            0 => Ok(ValueType::Deletion),
            1 => Ok(ValueType::Value),
            _ => Err(Error::Corruption(format!("unknown value type {}", byte))),
        }
    }
}

#[inline]
pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

/// A parsed view of an internal key.
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

pub fn parse_internal_key(internal_key: &[u8]) -> Result<ParsedInternalKey> {
    if internal_key.len() < 8 {
        return Err(Error::corruption("internal key too short"));
    }
    let tag = u64_from_le_bytes(&internal_key[internal_key.len() - 8..]);
    Ok(ParsedInternalKey {
        user_key: &internal_key[..internal_key.len() - 8],
        sequence: tag >> 8,
        value_type: ValueType::from_u8((tag & 0xff) as u8)?,
    })
}

#[inline]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    seq: SequenceNumber,
    t: ValueType,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_type(seq, t));
}

/// Orders internal keys: user key ascending (per the wrapped user
/// comparator), then sequence and type descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> InternalKeyComparator {
        InternalKeyComparator { user_comparator }
    }

    #[inline]
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &'static str {
        "kvstone.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let atag = u64_from_le_bytes(&a[a.len() - 8..]);
                let btag = u64_from_le_bytes(&b[b.len() - 8..]);
                // Larger tag means newer entry, which sorts first.
                btag.cmp(&atag)
            }
            ord => ord,
        }
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        // Try to shorten the user-key part; keep the original key
        // unless shortening produced a strictly larger user key, in
        // which case the maximal tag keeps the separator below every
        // real entry with that user key.
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user_comparator
            .find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut tmp = user_key.to_vec();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            *key = tmp;
        }
    }
}

/// A key for memtable lookups, holding one allocation viewed three
/// ways:
///
/// ```text
/// +--------------------+----------+--------------------------+
/// | varint32(klen + 8) | user key | (seq << 8) | SEEK   u64  |
/// +--------------------+----------+--------------------------+
/// \------------------ memtable key ------------------------->|
///                      \--------- internal key ------------->|
///                      \ user key /
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    key_start: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> LookupKey {
        let internal_key_len = user_key.len() + 8;
        let mut data = Vec::with_capacity(varint_length(internal_key_len as u64) + internal_key_len);
        put_varint32(&mut data, internal_key_len as u32);
        let key_start = data.len();
        append_internal_key(&mut data, user_key, sequence, VALUE_TYPE_FOR_SEEK);
        LookupKey { data, key_start }
    }

    /// The full length-prefixed form stored in the memtable index.
    #[inline]
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.key_start..]
    }

    #[inline]
    pub fn user_key(&self) -> &[u8] {
        &self.data[self.key_start..self.data.len() - 8]
    }
}
