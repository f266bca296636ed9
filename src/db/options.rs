use crate::cache::ShardLruCache;
use crate::db::comparator::{BytewiseComparator, Comparator};
use crate::filter::FilterPolicy;
use crate::sstable::block::Block;
use std::sync::Arc;

/// Block compression. The discriminants are stored in the one-byte
/// block trailer, so they are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
    Zstd = 2,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Option<CompressionType> {
        match byte {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            2 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// Cache shared between sstable readers; values are decoded blocks.
pub type BlockCache = ShardLruCache<Vec<u8>, Arc<Block>>;

#[derive(Clone)]
pub struct Options {
    pub comparator: Arc<dyn Comparator>,

    /// Approximate uncompressed size at which a data block is cut.
    pub block_size: usize,

    /// Entries between restart points in data blocks.
    pub block_restart_interval: usize,

    pub compression: CompressionType,
    pub zstd_compression_level: i32,

    /// Verify checksums on internal reads (index and metaindex blocks).
    pub paranoid_checks: bool,

    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            comparator: Arc::new(BytewiseComparator),
            block_size: 4096,
            block_restart_interval: 16,
            compression: CompressionType::None,
            zstd_compression_level: 3,
            paranoid_checks: false,
            filter_policy: None,
            block_cache: None,
        }
    }
}

#[derive(Clone, Copy)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> ReadOptions {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}
