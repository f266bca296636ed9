//! End-to-end tests over real files: write-ahead log recovery and the
//! memtable -> table builder -> table reader pipeline.

use kvstone::db::comparator::{BytewiseComparator, Comparator};
use kvstone::db::key_types::{
    parse_internal_key, InternalKeyComparator, LookupKey, SequenceNumber, ValueType,
};
use kvstone::db::options::{Options, ReadOptions};
use kvstone::env::{FsRandomAccessFile, FsSequentialFile, FsWritableFile};
use kvstone::iterator::KvIterator;
use kvstone::memory::MemTable;
use kvstone::sstable::{Table, TableBuilder};
use kvstone::wal::{LogReader, LogWriter};
use std::path::Path;
use std::sync::Arc;

fn internal_comparator() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

/// Log record payload: `u32(klen) || u32(vlen+1) || key || value`,
/// with `vlen+1 == 0` marking a deletion.
fn encode_entry(key: &[u8], value: Option<&[u8]>) -> Vec<u8> {
    let mut record = Vec::new();
    record.extend_from_slice(&(key.len() as u32).to_le_bytes());
    match value {
        Some(v) => record.extend_from_slice(&(v.len() as u32 + 1).to_le_bytes()),
        None => record.extend_from_slice(&0u32.to_le_bytes()),
    }
    record.extend_from_slice(key);
    if let Some(v) = value {
        record.extend_from_slice(v);
    }
    record
}

fn replay_log(path: &Path, table: &MemTable, mut next_seq: SequenceNumber) -> SequenceNumber {
    let file = FsSequentialFile::open(path).unwrap();
    let mut reader = LogReader::new(file, None, true, 0);
    while let Some(record) = reader.read_record() {
        let klen = u32::from_le_bytes(record[0..4].try_into().unwrap()) as usize;
        let vtag = u32::from_le_bytes(record[4..8].try_into().unwrap()) as usize;
        let key = &record[8..8 + klen];
        if vtag == 0 {
            table.add(next_seq, ValueType::Deletion, key, b"");
        } else {
            let value = &record[8 + klen..8 + klen + vtag - 1];
            table.add(next_seq, ValueType::Value, key, value);
        }
        next_seq += 1;
    }
    next_seq
}

fn get(table: &MemTable, key: &[u8], seq: SequenceNumber) -> Option<Option<Vec<u8>>> {
    // Outer None: no entry; Some(None): deleted; Some(Some(v)): live.
    match table.get(&LookupKey::new(key, seq)) {
        None => None,
        Some(Err(_)) => Some(None),
        Some(Ok(v)) => Some(Some(v)),
    }
}

#[test]
fn test_wal_roundtrip_through_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let log_path = dir.path().join("000001.log");

    let mut writer = LogWriter::new(FsWritableFile::create(&log_path).unwrap());
    for i in 0..1000u32 {
        let key = format!("key{}", i);
        let value = format!("value{}", i);
        writer
            .add_record(&encode_entry(key.as_bytes(), Some(value.as_bytes())))
            .unwrap();
    }
    // Delete every third key.
    for i in (0..1000u32).step_by(3) {
        let key = format!("key{}", i);
        writer
            .add_record(&encode_entry(key.as_bytes(), None))
            .unwrap();
    }
    writer.sync().unwrap();
    drop(writer);

    let table = MemTable::new(internal_comparator());
    let next_seq = replay_log(&log_path, &table, 1);
    assert_eq!(next_seq, 1 + 1000 + 334);

    for i in 0..1000u32 {
        let key = format!("key{}", i);
        match get(&table, key.as_bytes(), next_seq) {
            Some(None) => assert_eq!(i % 3, 0, "key{} unexpectedly deleted", i),
            Some(Some(v)) => {
                assert_ne!(i % 3, 0);
                assert_eq!(v, format!("value{}", i).into_bytes());
            }
            None => panic!("key{} missing", i),
        }
    }
}

#[test]
fn test_wal_tolerates_torn_tail() {
    let dir = tempfile::TempDir::new().unwrap();
    let log_path = dir.path().join("000001.log");

    let mut writer = LogWriter::new(FsWritableFile::create(&log_path).unwrap());
    writer
        .add_record(&encode_entry(b"durable", Some(b"yes")))
        .unwrap();
    writer
        .add_record(&encode_entry(b"torn", Some(&vec![b'x'; 5000])))
        .unwrap();
    writer.sync().unwrap();
    drop(writer);

    // Simulate a crash mid-write by truncating into the last record.
    let full_len = std::fs::metadata(&log_path).unwrap().len();
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&log_path)
        .unwrap();
    file.set_len(full_len - 3000).unwrap();
    drop(file);

    let table = MemTable::new(internal_comparator());
    let next_seq = replay_log(&log_path, &table, 1);
    // Only the first record survived; the torn one is silently
    // dropped.
    assert_eq!(next_seq, 2);
    assert_eq!(
        get(&table, b"durable", next_seq).unwrap().unwrap(),
        b"yes"
    );
    assert!(get(&table, b"torn", next_seq).is_none());
}

#[test]
fn test_memtable_flush_to_table() {
    let dir = tempfile::TempDir::new().unwrap();
    let table_path = dir.path().join("000002.sst");

    let cmp = internal_comparator();
    let mem = MemTable::new(cmp.clone());
    mem.add(100, ValueType::Value, b"k", b"v1");
    mem.add(101, ValueType::Value, b"k", b"v2");
    mem.add(102, ValueType::Deletion, b"k", b"");
    for i in 0..500u32 {
        mem.add(
            200 + i as u64,
            ValueType::Value,
            format!("stable{:03}", i).as_bytes(),
            format!("value{}", i).as_bytes(),
        );
    }

    // Tables over internal keys order with the internal-key
    // comparator.
    let options = Options {
        comparator: Arc::new(cmp.clone()),
        block_size: 256,
        ..Default::default()
    };

    let file = FsWritableFile::create(&table_path).unwrap();
    let mut builder = TableBuilder::new(options.clone(), file);
    let mut iter = mem.iter();
    iter.seek_to_first();
    while iter.valid() {
        builder.add(iter.key(), iter.value());
        iter.next();
    }
    builder.finish().unwrap();
    builder.sync().unwrap();
    let file_size = builder.file_size();
    drop(builder);
    assert_eq!(
        file_size,
        std::fs::metadata(&table_path).unwrap().len()
    );

    let table = Table::open(
        options,
        Box::new(FsRandomAccessFile::open(&table_path).unwrap()),
        file_size,
    )
    .unwrap();

    // Point lookups honor sequence visibility, exactly as the
    // memtable did.
    let lookup = |user_key: &[u8], seq: SequenceNumber| -> Option<Option<Vec<u8>>> {
        let lookup_key = LookupKey::new(user_key, seq);
        let mut result = None;
        table
            .internal_get(&ReadOptions::default(), lookup_key.internal_key(), |k, v| {
                let parsed = parse_internal_key(k).unwrap();
                if parsed.user_key == user_key {
                    result = match parsed.value_type {
                        ValueType::Value => Some(Some(v.to_vec())),
                        ValueType::Deletion => Some(None),
                    };
                }
            })
            .unwrap();
        result
    };

    assert_eq!(lookup(b"k", 102), Some(None)); // deletion wins at 102
    assert_eq!(lookup(b"k", 101), Some(Some(b"v2".to_vec())));
    assert_eq!(lookup(b"k", 100), Some(Some(b"v1".to_vec())));
    assert_eq!(lookup(b"k", 99), None);
    for i in 0..500u32 {
        assert_eq!(
            lookup(format!("stable{:03}", i).as_bytes(), 1000),
            Some(Some(format!("value{}", i).into_bytes()))
        );
    }
    assert_eq!(lookup(b"stable999", 1000), None);

    // A full scan of the table equals a full scan of the memtable.
    let mut table_iter = table.iter(ReadOptions::default());
    table_iter.seek_to_first();
    let mut mem_iter = mem.iter();
    mem_iter.seek_to_first();
    let mut entries = 0;
    while mem_iter.valid() {
        assert!(table_iter.valid());
        assert_eq!(table_iter.key(), mem_iter.key());
        assert_eq!(table_iter.value(), mem_iter.value());
        mem_iter.next();
        table_iter.next();
        entries += 1;
    }
    assert!(!table_iter.valid());
    assert_eq!(entries, 503);
}

#[test]
fn test_internal_key_comparator_orders_table_seeks() {
    // Separator logic must keep user keys with different sequence
    // numbers inside one logical range.
    let cmp = internal_comparator();
    let mut a = Vec::new();
    kvstone::db::key_types::append_internal_key(&mut a, b"apple", 5, ValueType::Value);
    let mut b = Vec::new();
    kvstone::db::key_types::append_internal_key(&mut b, b"cherry", 9, ValueType::Value);
    let mut separator = a.clone();
    cmp.find_shortest_separator(&mut separator, &b);
    // "apple" shortens to "b", carrying the maximal tag.
    assert!(separator.len() < a.len());
    assert_eq!(cmp.compare(&a, &separator), std::cmp::Ordering::Less);
    assert_eq!(cmp.compare(&separator, &b), std::cmp::Ordering::Less);
}
