//! File abstraction used by the WAL and sstable code. The core never
//! opens files on its own; callers hand in implementations of these
//! traits and keep them alive for as long as the consumer needs them.

pub mod file_system;

pub use file_system::{FsRandomAccessFile, FsSequentialFile, FsWritableFile};

use crate::Result;

/// A file read sequentially from the front. Not thread-safe.
pub trait SequentialFile {
    /// Read up to `buf.len()` bytes. A short count means end of file;
    /// it is not an error.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Skip `n` bytes from the current position.
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// A file supporting positional reads from many threads at once.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `n` bytes starting at `offset`. The result may be
    /// shorter than `n` if the range extends past end of file.
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>>;
}

/// A file written append-only. Not thread-safe.
pub trait WritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered bytes to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Force bytes to stable storage.
    fn sync(&mut self) -> Result<()>;
}
