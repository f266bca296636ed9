use crate::byteutils::u32_from_le_bytes;
use crate::crc32;
use crate::env::SequentialFile;
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};
use crate::Error;
use std::ops::Range;

/// Receives notice of byte ranges the reader had to drop. Drops that
/// lie entirely before the reader's initial offset are not reported.
pub trait CorruptionReporter {
    /// `bytes` is the approximate size of the dropped region.
    fn corruption(&mut self, bytes: u64, reason: &Error);
}

// Internal extension of RecordType with the two out-of-band results of
// read_physical_record.
const EOF: u8 = MAX_RECORD_TYPE + 1;
// Returned whenever we find an invalid physical record. Currently
// there are three situations in which this happens:
// * The record has an invalid CRC (read_physical_record reports a drop)
// * The record is a 0-length record (no drop is reported)
// * The record is below the reader's initial offset (no drop is
//   reported)
const BAD_RECORD: u8 = MAX_RECORD_TYPE + 2;

pub struct LogReader<F: SequentialFile> {
    file: F,
    reporter: Option<Box<dyn CorruptionReporter>>,
    checksum: bool,
    /// One block of backing storage; the unconsumed region is
    /// `buf[buffer_start..]`.
    buf: Vec<u8>,
    buffer_start: usize,
    /// Last read was < BLOCK_SIZE bytes (or hit a read error).
    eof: bool,

    /// Offset of the first location past the end of buf, in the file.
    end_of_buffer_offset: u64,
    /// Physical offset of the start of the last record returned.
    last_record_offset: u64,
    /// Offset at which to start looking for the first record.
    initial_offset: u64,

    /// True while skipping the tail of a logical record whose start
    /// lies before `initial_offset`. In this mode fragments are
    /// dropped silently until a record boundary is found.
    resyncing: bool,
}

impl<F: SequentialFile> LogReader<F> {
    /// Create a reader that returns logical records from `file`,
    /// starting at the first record whose physical position is at or
    /// past `initial_offset`.
    pub fn new(
        file: F,
        reporter: Option<Box<dyn CorruptionReporter>>,
        checksum: bool,
        initial_offset: u64,
    ) -> LogReader<F> {
        LogReader {
            file,
            reporter,
            checksum,
            buf: Vec::new(),
            buffer_start: 0,
            eof: false,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    /// Physical offset of the start of the last record returned by
    /// `read_record`. Undefined before the first call.
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Return the next complete logical record, or `None` at end of
    /// file. Corrupt regions are reported through the reporter and
    /// skipped; they do not end reading.
    pub fn read_record(&mut self) -> Option<Vec<u8>> {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return None;
        }

        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;
        // Physical offset of the First fragment of the record being
        // assembled.
        let mut prospective_record_offset = 0u64;

        loop {
            let (record_type, fragment) = self.read_physical_record();
            let fragment_len = fragment.len() as u64;

            // Offset of the physical record just returned. Wrapping:
            // meaningless (and unused) for EOF results.
            let physical_record_offset = self
                .end_of_buffer_offset
                .wrapping_sub(self.buffer_len() as u64)
                .wrapping_sub(HEADER_SIZE as u64)
                .wrapping_sub(fragment_len);

            if self.resyncing {
                if record_type == RecordType::Middle as u8 {
                    continue;
                } else if record_type == RecordType::Last as u8 {
                    self.resyncing = false;
                    continue;
                } else {
                    self.resyncing = false;
                }
            }

            if record_type == RecordType::Full as u8 {
                if in_fragmented_record && !scratch.is_empty() {
                    // An earlier writer could leave an empty First
                    // record at the tail of a block; only a non-empty
                    // partial body is worth reporting.
                    self.report_corruption(scratch.len() as u64, "partial record without end(1)");
                }
                self.last_record_offset = physical_record_offset;
                return Some(self.buf[fragment].to_vec());
            } else if record_type == RecordType::First as u8 {
                if in_fragmented_record && !scratch.is_empty() {
                    self.report_corruption(scratch.len() as u64, "partial record without end(2)");
                }
                prospective_record_offset = physical_record_offset;
                scratch.clear();
                scratch.extend_from_slice(&self.buf[fragment]);
                in_fragmented_record = true;
            } else if record_type == RecordType::Middle as u8 {
                if !in_fragmented_record {
                    self.report_corruption(fragment_len, "missing start of fragmented record(1)");
                } else {
                    scratch.extend_from_slice(&self.buf[fragment]);
                }
            } else if record_type == RecordType::Last as u8 {
                if !in_fragmented_record {
                    self.report_corruption(fragment_len, "missing start of fragmented record(2)");
                } else {
                    scratch.extend_from_slice(&self.buf[fragment]);
                    self.last_record_offset = prospective_record_offset;
                    return Some(scratch);
                }
            } else if record_type == EOF {
                // A fragment without its end can be left behind by a
                // writer that died mid-record; drop it without
                // reporting.
                return None;
            } else if record_type == BAD_RECORD {
                if in_fragmented_record {
                    self.report_corruption(scratch.len() as u64, "error in middle of record");
                    in_fragmented_record = false;
                    scratch.clear();
                }
            } else {
                let reported = fragment_len
                    + if in_fragmented_record {
                        scratch.len() as u64
                    } else {
                        0
                    };
                self.report_corruption(reported, &format!("unknown record type {}", record_type));
                in_fragmented_record = false;
                scratch.clear();
            }
        }
    }

    #[inline]
    fn buffer_len(&self) -> usize {
        self.buf.len() - self.buffer_start
    }

    fn clear_buffer(&mut self) {
        self.buf.clear();
        self.buffer_start = 0;
    }

    /// Skip to the start of the block containing `initial_offset`, or
    /// the next block if the offset lands in a block trailer.
    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = (self.initial_offset % BLOCK_SIZE as u64) as usize;
        let mut block_start_location = self.initial_offset - offset_in_block as u64;

        // Don't search a block if we'd be in the trailer.
        if offset_in_block > BLOCK_SIZE - 6 {
            block_start_location += BLOCK_SIZE as u64;
        }

        self.end_of_buffer_offset = block_start_location;

        if block_start_location > 0 {
            if let Err(e) = self.file.skip(block_start_location) {
                self.report_drop(block_start_location, &e);
                return false;
            }
        }
        true
    }

    /// Pull the next physical record out of the buffer, refilling it
    /// from the file one block at a time. Returns the record type (or
    /// `EOF`/`BAD_RECORD`) and the payload's range within `buf`.
    fn read_physical_record(&mut self) -> (u8, Range<usize>) {
        loop {
            if self.buffer_len() < HEADER_SIZE {
                if !self.eof {
                    // Last read was a full block; whatever is left is
                    // trailer padding. Skip it and read the next block.
                    self.clear_buffer();
                    self.buf.resize(BLOCK_SIZE, 0);
                    let read = self.file.read(&mut self.buf);
                    match read {
                        Ok(n) => {
                            self.buf.truncate(n);
                            self.end_of_buffer_offset += n as u64;
                            if n < BLOCK_SIZE {
                                self.eof = true;
                            }
                        }
                        Err(e) => {
                            self.clear_buffer();
                            self.report_drop(BLOCK_SIZE as u64, &e);
                            self.eof = true;
                            return (EOF, 0..0);
                        }
                    }
                    continue;
                } else {
                    // A non-empty buffer here is a truncated header
                    // left by a writer crash; report EOF rather than
                    // corruption.
                    self.clear_buffer();
                    return (EOF, 0..0);
                }
            }

            // Parse the header.
            let header_start = self.buffer_start;
            let a = self.buf[header_start + 4] as u32;
            let b = self.buf[header_start + 5] as u32;
            let record_type = self.buf[header_start + 6];
            let length = (a | (b << 8)) as usize;

            if HEADER_SIZE + length > self.buffer_len() {
                let drop_size = self.buffer_len() as u64;
                self.clear_buffer();
                if !self.eof {
                    self.report_corruption(drop_size, "bad record length");
                    return (BAD_RECORD, 0..0);
                }
                // The writer died before finishing this record; not a
                // corruption.
                return (EOF, 0..0);
            }

            if record_type == RecordType::Zero as u8 && length == 0 {
                // Zero-filled regions come from preallocated files;
                // skip them without reporting a drop.
                self.clear_buffer();
                return (BAD_RECORD, 0..0);
            }

            if self.checksum {
                let expected_crc = crc32::unmask(u32_from_le_bytes(&self.buf[header_start..]));
                let actual_crc =
                    crc32::value(&self.buf[header_start + 6..header_start + HEADER_SIZE + length]);
                if actual_crc != expected_crc {
                    // Drop the rest of the buffer: the length field
                    // itself may be corrupt, and trusting it could put
                    // us on bytes that happen to look like a record.
                    let drop_size = self.buffer_len() as u64;
                    self.clear_buffer();
                    self.report_corruption(drop_size, "checksum mismatch");
                    return (BAD_RECORD, 0..0);
                }
            }

            self.buffer_start += HEADER_SIZE + length;

            // Skip physical records that started before initial_offset.
            if (self.end_of_buffer_offset
                - self.buffer_len() as u64
                - HEADER_SIZE as u64
                - length as u64)
                < self.initial_offset
            {
                return (BAD_RECORD, 0..0);
            }

            let payload_start = header_start + HEADER_SIZE;
            return (record_type, payload_start..payload_start + length);
        }
    }

    fn report_corruption(&mut self, bytes: u64, reason: &str) {
        self.report_drop(bytes, &Error::corruption(reason));
    }

    fn report_drop(&mut self, bytes: u64, reason: &Error) {
        // Wrapping: when a read error is reported the dropped range
        // can extend before the start of the buffer; the wrapped value
        // compares high and the drop is reported.
        let drop_start = self
            .end_of_buffer_offset
            .wrapping_sub(self.buffer_len() as u64)
            .wrapping_sub(bytes);
        if drop_start >= self.initial_offset {
            if let Some(reporter) = self.reporter.as_mut() {
                log::warn!("dropping {} bytes of log: {}", bytes, reason);
                reporter.corruption(bytes, reason);
            }
        }
    }
}
