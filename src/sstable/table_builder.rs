use crate::crc32;
use crate::db::options::{CompressionType, Options};
use crate::env::WritableFile;
use crate::sstable::block_builder::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer, BLOCK_TRAILER_SIZE};
use crate::{Error, Result};
use std::cmp::Ordering;

/// Builds a table file from keys added in strictly increasing order.
///
/// Call `finish` when done, or `abandon` to discard; one of the two
/// must run before the builder is dropped. Errors stick: after the
/// first failed operation every later `add`/`flush` is a no-op and
/// `status` keeps returning the error.
pub struct TableBuilder<W: WritableFile> {
    options: Options,
    file: W,
    /// Offset where the next block will be written.
    offset: u64,
    status: Option<Error>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    num_entries: u64,
    /// Either finish() or abandon() has been called.
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,

    /// We do not emit the index entry for a block until we have seen
    /// the first key for the next data block. This allows us to use
    /// shorter keys in the index block. For example, consider a block
    /// boundary between the keys "the quick brown fox" and "the who".
    /// We can use "the r" as the key for the index block entry since
    /// it is >= all entries in the first block and < all entries in
    /// subsequent blocks.
    ///
    /// Invariant: `pending_index_entry` is true only if `data_block`
    /// is empty.
    pending_index_entry: bool,
    /// Handle to add to the index block.
    pending_handle: BlockHandle,
}

impl<W: WritableFile> TableBuilder<W> {
    pub fn new(options: Options, file: W) -> TableBuilder<W> {
        let filter_block = options
            .filter_policy
            .as_ref()
            .map(|policy| FilterBlockBuilder::new(policy.clone()));
        let mut builder = TableBuilder {
            data_block: BlockBuilder::new(options.block_restart_interval, options.comparator.clone()),
            // Index entries are never prefix-compressed; every one is
            // a restart point.
            index_block: BlockBuilder::new(1, options.comparator.clone()),
            options,
            file,
            offset: 0,
            status: None,
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
        };
        if let Some(filter_block) = builder.filter_block.as_mut() {
            filter_block.start_block(0);
        }
        builder
    }

    #[inline]
    fn ok(&self) -> bool {
        self.status.is_none()
    }

    pub fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Size of the file generated so far; accurate after a `finish`
    /// or `abandon`.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Requires: not closed, `key` larger than any previously added
    /// key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.closed);
        if !self.ok() {
            return;
        }
        if self.num_entries > 0 {
            debug_assert_eq!(
                self.options.comparator.compare(key, &self.last_key),
                Ordering::Greater
            );
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let handle_encoding = self.pending_handle.encoded();
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(filter_block) = self.filter_block.as_mut() {
            filter_block.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush();
        }
    }

    /// Write the buffered data block. Callable between entries to
    /// force a block boundary.
    pub fn flush(&mut self) {
        debug_assert!(!self.closed);
        if !self.ok() || self.data_block.is_empty() {
            return;
        }
        debug_assert!(!self.pending_index_entry);

        let raw = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.pending_handle = self.write_block(raw);
        if self.ok() {
            // The index entry's key is chosen once the next data
            // block's first key is known.
            self.pending_index_entry = true;
            if let Err(e) = self.file.flush() {
                self.status = Some(e);
            }
        }
        if let Some(filter_block) = self.filter_block.as_mut() {
            // The next filter covers data blocks ending at or past the
            // new file offset.
            filter_block.start_block(self.offset);
        }
    }

    /// Compress if configured and worthwhile, then write. Compressed
    /// output is kept only when it saves at least 12.5%.
    fn write_block(&mut self, raw: Vec<u8>) -> BlockHandle {
        debug_assert!(self.ok());
        let threshold = raw.len() - raw.len() / 8;
        let (contents, compression) = match self.options.compression {
            CompressionType::None => (raw, CompressionType::None),
            CompressionType::Snappy => match snap::raw::Encoder::new().compress_vec(&raw) {
                Ok(compressed) if compressed.len() < threshold => {
                    (compressed, CompressionType::Snappy)
                }
                _ => (raw, CompressionType::None),
            },
            CompressionType::Zstd => {
                match zstd::stream::encode_all(raw.as_slice(), self.options.zstd_compression_level)
                {
                    Ok(compressed) if compressed.len() < threshold => {
                        (compressed, CompressionType::Zstd)
                    }
                    _ => (raw, CompressionType::None),
                }
            }
        };
        self.write_raw_block(&contents, compression)
    }

    fn write_raw_block(&mut self, contents: &[u8], compression: CompressionType) -> BlockHandle {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        match self.append_with_trailer(contents, compression) {
            Ok(()) => self.offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64,
            Err(e) => self.status = Some(e),
        }
        handle
    }

    fn append_with_trailer(
        &mut self,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<()> {
        self.file.append(contents)?;
        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = compression as u8;
        // Extend the crc to cover the block type.
        let crc = crc32::mask(crc32::extend(crc32::value(contents), &trailer[..1]));
        trailer[1..].copy_from_slice(&crc.to_le_bytes());
        self.file.append(&trailer)?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.flush();
        debug_assert!(!self.closed);
        self.closed = true;

        let filter_name = self.options.filter_policy.as_ref().map(|p| p.name());

        // Write filter block.
        let mut filter_block_handle = BlockHandle::default();
        if self.ok() {
            if let Some(filter_block) = self.filter_block.take() {
                let contents = filter_block.finish();
                filter_block_handle = self.write_raw_block(&contents, CompressionType::None);
            }
        }

        // Write metaindex block.
        let mut metaindex_handle = BlockHandle::default();
        if self.ok() {
            let mut metaindex_block = BlockBuilder::new(
                self.options.block_restart_interval,
                self.options.comparator.clone(),
            );
            if let Some(name) = filter_name {
                // Map "filter.<name>" to the location of the filter
                // data.
                let key = format!("filter.{}", name);
                metaindex_block.add(key.as_bytes(), &filter_block_handle.encoded());
            }
            let raw = metaindex_block.finish().to_vec();
            metaindex_handle = self.write_block(raw);
        }

        // Write index block.
        let mut index_handle = BlockHandle::default();
        if self.ok() {
            if self.pending_index_entry {
                self.options.comparator.find_short_successor(&mut self.last_key);
                let handle_encoding = self.pending_handle.encoded();
                self.index_block.add(&self.last_key, &handle_encoding);
                self.pending_index_entry = false;
            }
            let raw = self.index_block.finish().to_vec();
            index_handle = self.write_block(raw);
        }

        // Write footer.
        if self.ok() {
            let footer = Footer {
                metaindex_handle,
                index_handle,
            };
            let mut footer_encoding = Vec::new();
            footer.encode_to(&mut footer_encoding);
            match self.file.append(&footer_encoding) {
                Ok(()) => self.offset += footer_encoding.len() as u64,
                Err(e) => self.status = Some(e),
            }
        }
        self.status()
    }

    /// Stop building and drop buffered state; the file contents are
    /// unspecified afterwards.
    pub fn abandon(&mut self) {
        debug_assert!(!self.closed);
        self.closed = true;
    }

    /// Force file contents to stable storage. Call after `finish`.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }
}

impl<W: WritableFile> Drop for TableBuilder<W> {
    fn drop(&mut self) {
        // Catch callers that forgot to call finish() or abandon().
        if !std::thread::panicking() {
            assert!(self.closed);
        }
    }
}
