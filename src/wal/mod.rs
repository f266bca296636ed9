//! Write-ahead log framing.
//!
//! A log file is a sequence of 32 KiB blocks. Each block holds
//! physical records; a record never crosses a block boundary, and a
//! block tail smaller than one header is zero-filled:
//!
//! ```text
//! +----------------+----------------+----------+----------------+
//! | checksum (u32) | length (u16)   | type(u8) | payload        |
//! +----------------+----------------+----------+----------------+
//! \------------------- 7-byte header ---------/
//! ```
//!
//! The checksum is a masked CRC32C of `type || payload`, all fields
//! little-endian. A logical record the caller appended is stored
//! either as one `Full` record or as a `First, Middle*, Last`
//! sequence when it has to be fragmented across blocks.

pub mod reader;
pub mod writer;

pub use reader::{CorruptionReporter, LogReader};
pub use writer::LogWriter;

pub const BLOCK_SIZE: usize = 32768;

/// Header: checksum (4) + length (2) + type (1).
pub const HEADER_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for preallocated (zero-filled) file regions.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

pub const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;
