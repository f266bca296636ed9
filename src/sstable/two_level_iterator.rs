//! An iterator that concatenates the entries of a sequence of blocks.
//!
//! The index iterator yields encoded block handles; the block
//! function turns a handle into an iterator over that block's
//! entries. The combined iterator presents one logical sequence over
//! every key/value pair in every block, skipping empty blocks in both
//! directions.

use crate::iterator::KvIterator;
use crate::sstable::block::BlockIter;
use crate::{Error, Result};

pub struct TwoLevelIterator<I, F> {
    index_iter: I,
    block_function: F,
    data_iter: Option<BlockIter>,
    /// Handle bytes of the block `data_iter` is positioned in, so a
    /// re-seek into the same block can reuse it.
    data_block_handle: Vec<u8>,
    status: Option<Error>,
}

impl<I, F> TwoLevelIterator<I, F>
where
    I: KvIterator,
    F: FnMut(&[u8]) -> Result<BlockIter>,
{
    pub fn new(index_iter: I, block_function: F) -> TwoLevelIterator<I, F> {
        TwoLevelIterator {
            index_iter,
            block_function,
            data_iter: None,
            data_block_handle: Vec::new(),
            status: None,
        }
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |iter| iter.valid())
    }

    fn set_data_iterator(&mut self, iter: Option<BlockIter>) {
        if let Some(old) = &self.data_iter {
            if self.status.is_none() {
                if let Err(e) = old.status() {
                    self.status = Some(e);
                }
            }
        }
        self.data_iter = iter;
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.set_data_iterator(None);
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_block_handle.as_slice() {
            // data_iter is already constructed with this iterator, so
            // no need to change anything.
            return;
        }
        let handle = handle.to_vec();
        match (self.block_function)(&handle) {
            Ok(iter) => {
                self.data_block_handle = handle;
                self.set_data_iterator(Some(iter));
            }
            Err(e) => {
                if self.status.is_none() {
                    self.status = Some(e);
                }
                self.set_data_iterator(None);
            }
        }
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while !self.data_valid() {
            // Move to next block.
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(iter) = self.data_iter.as_mut() {
                iter.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while !self.data_valid() {
            // Move to the preceding block.
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(iter) = self.data_iter.as_mut() {
                iter.seek_to_last();
            }
        }
    }
}

impl<I, F> KvIterator for TwoLevelIterator<I, F>
where
    I: KvIterator,
    F: FnMut(&[u8]) -> Result<BlockIter>,
{
    fn valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(iter) = self.data_iter.as_mut() {
            iter.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(iter) = self.data_iter.as_mut() {
            iter.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        // The index key of a block is >= every key it holds, so the
        // first index entry >= target names the candidate block.
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(iter) = self.data_iter.as_mut() {
            iter.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = self.data_iter.as_mut() {
            iter.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = self.data_iter.as_mut() {
            iter.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().expect("valid iterator").key()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().expect("valid iterator").value()
    }

    fn status(&self) -> Result<()> {
        // The first non-ok status among the sub-iterators wins.
        self.index_iter.status()?;
        if let Some(iter) = &self.data_iter {
            iter.status()?;
        }
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }
}
