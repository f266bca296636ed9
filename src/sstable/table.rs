//! The sstable reader.

use crate::db::comparator::BytewiseComparator;
use crate::db::options::{Options, ReadOptions};
use crate::env::RandomAccessFile;
use crate::filter::FilterPolicy;
use crate::iterator::KvIterator;
use crate::sstable::block::{Block, BlockIter};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::footer::{read_block, BlockHandle, Footer, FOOTER_ENCODED_LENGTH};
use crate::sstable::two_level_iterator::TwoLevelIterator;
use crate::{Error, Result};
use std::sync::Arc;

/// An immutable, ordered map from keys to values backed by one table
/// file. Safe for concurrent reads from multiple threads without
/// external synchronization.
pub struct Table {
    options: Options,
    file: Box<dyn RandomAccessFile>,
    metaindex_handle: BlockHandle,
    index_block: Arc<Block>,
    /// Partitions the shared block cache's key space between tables.
    cache_id: u64,
    filter: Option<FilterBlockReader>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("metaindex_handle", &self.metaindex_handle)
            .field("cache_id", &self.cache_id)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Open a table over the first `size` bytes of `file`. The footer
    /// and index block are read eagerly; the filter block is loaded
    /// best-effort and silently skipped on error.
    pub fn open(options: Options, file: Box<dyn RandomAccessFile>, size: u64) -> Result<Table> {
        if size < FOOTER_ENCODED_LENGTH as u64 {
            return Err(Error::corruption("file is too short to be an sstable"));
        }

        let footer_input = file.read(
            size - FOOTER_ENCODED_LENGTH as u64,
            FOOTER_ENCODED_LENGTH,
        )?;
        let footer = Footer::decode_from(&footer_input)?;

        let index_contents = read_block(
            file.as_ref(),
            options.paranoid_checks,
            &footer.index_handle,
        )?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let cache_id = options
            .block_cache
            .as_ref()
            .map_or(0, |cache| cache.new_id());

        let mut table = Table {
            options,
            file,
            metaindex_handle: footer.metaindex_handle,
            index_block,
            cache_id,
            filter: None,
        };
        table.read_meta(&footer);
        Ok(table)
    }

    fn read_meta(&mut self, footer: &Footer) {
        let policy = match &self.options.filter_policy {
            None => return, // Do not need any metadata.
            Some(policy) => policy.clone(),
        };

        // Do not propagate errors: meta info is not needed for
        // operation.
        let contents = match read_block(
            self.file.as_ref(),
            self.options.paranoid_checks,
            &footer.metaindex_handle,
        ) {
            Ok(contents) => contents,
            Err(e) => {
                log::debug!("skipping metaindex block: {}", e);
                return;
            }
        };
        let meta = match Block::new(contents) {
            Ok(block) => Arc::new(block),
            Err(_) => return,
        };

        // The metaindex maps well-known names, not user keys.
        let mut iter = BlockIter::new(meta, Arc::new(BytewiseComparator));
        let key = format!("filter.{}", policy.name());
        iter.seek(key.as_bytes());
        if iter.valid() && iter.key() == key.as_bytes() {
            let handle_value = iter.value().to_vec();
            self.read_filter(&handle_value, policy);
        }
    }

    fn read_filter(&mut self, filter_handle_value: &[u8], policy: Arc<dyn FilterPolicy>) {
        let mut input = filter_handle_value;
        let handle = match BlockHandle::decode_from(&mut input) {
            Ok(handle) => handle,
            Err(_) => return,
        };
        match read_block(self.file.as_ref(), self.options.paranoid_checks, &handle) {
            Ok(contents) => self.filter = Some(FilterBlockReader::new(policy, contents)),
            Err(e) => log::debug!("skipping filter block: {}", e),
        }
    }

    /// Turn an index-iterator value (an encoded BlockHandle) into an
    /// iterator over the contents of the corresponding block, going
    /// through the block cache when one is configured.
    pub(crate) fn block_reader(
        &self,
        options: &ReadOptions,
        index_value: &[u8],
    ) -> Result<BlockIter> {
        let mut input = index_value;
        let handle = BlockHandle::decode_from(&mut input)?;
        // We intentionally allow extra stuff in index_value so that we
        // can add more features in the future.

        let block = match &self.options.block_cache {
            Some(cache) => {
                let mut cache_key = Vec::with_capacity(16);
                cache_key.extend_from_slice(&self.cache_id.to_le_bytes());
                cache_key.extend_from_slice(&handle.offset.to_le_bytes());
                match cache.look_up(&cache_key) {
                    Some(block) => block,
                    None => {
                        let contents =
                            read_block(self.file.as_ref(), options.verify_checksums, &handle)?;
                        let block = Arc::new(Block::new(contents)?);
                        if options.fill_cache {
                            cache.insert(cache_key, block.clone(), block.size());
                        }
                        block
                    }
                }
            }
            None => {
                let contents = read_block(self.file.as_ref(), options.verify_checksums, &handle)?;
                Arc::new(Block::new(contents)?)
            }
        };
        Ok(BlockIter::new(block, self.options.comparator.clone()))
    }

    /// Point lookup: find the first entry with key >= `key` in the
    /// candidate block and hand it to `handler`. The filter may prove
    /// the key absent, in which case `handler` is never called.
    pub fn internal_get(
        &self,
        options: &ReadOptions,
        key: &[u8],
        handler: impl FnOnce(&[u8], &[u8]),
    ) -> Result<()> {
        let mut index_iter =
            BlockIter::new(self.index_block.clone(), self.options.comparator.clone());
        index_iter.seek(key);
        if index_iter.valid() {
            let mut handle_input = index_iter.value();
            let filtered_out = match (&self.filter, BlockHandle::decode_from(&mut handle_input)) {
                (Some(filter), Ok(handle)) => !filter.key_may_match(handle.offset, key),
                _ => false,
            };
            if !filtered_out {
                let mut block_iter = self.block_reader(options, index_iter.value())?;
                block_iter.seek(key);
                if block_iter.valid() {
                    handler(block_iter.key(), block_iter.value());
                }
                block_iter.status()?;
            }
        }
        index_iter.status()
    }

    /// Iterate over every key/value pair in the table in order.
    pub fn iter(
        &self,
        options: ReadOptions,
    ) -> TwoLevelIterator<BlockIter, impl FnMut(&[u8]) -> Result<BlockIter> + '_> {
        let index_iter =
            BlockIter::new(self.index_block.clone(), self.options.comparator.clone());
        TwoLevelIterator::new(index_iter, move |index_value| {
            self.block_reader(&options, index_value)
        })
    }

    /// Approximate file offset where the data for `key` begins. Keys
    /// past the end of the table map to the metaindex offset, which is
    /// near the end of the file.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter =
            BlockIter::new(self.index_block.clone(), self.options.comparator.clone());
        index_iter.seek(key);
        if index_iter.valid() {
            let mut input = index_iter.value();
            if let Ok(handle) = BlockHandle::decode_from(&mut input) {
                return handle.offset;
            }
        }
        self.metaindex_handle.offset
    }
}
