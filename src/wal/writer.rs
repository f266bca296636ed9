use crate::crc32;
use crate::env::WritableFile;
use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};
use crate::Result;

pub struct LogWriter<W: WritableFile> {
    dest: W,
    /// Current offset inside the current block, in `[0, BLOCK_SIZE)`.
    block_offset: usize,
    /// CRC of each record type, precomputed so the per-record checksum
    /// only has to be extended over the payload.
    type_crc: [u32; MAX_RECORD_TYPE as usize + 1],
}

fn init_type_crc() -> [u32; MAX_RECORD_TYPE as usize + 1] {
    let mut type_crc = [0u32; MAX_RECORD_TYPE as usize + 1];
    for (t, crc) in type_crc.iter_mut().enumerate() {
        *crc = crc32::value(&[t as u8]);
    }
    type_crc
}

impl<W: WritableFile> LogWriter<W> {
    pub fn new(dest: W) -> LogWriter<W> {
        LogWriter {
            dest,
            block_offset: 0,
            type_crc: init_type_crc(),
        }
    }

    /// Create a writer that appends to a destination which already has
    /// `dest_length` bytes of log data in it.
    pub fn new_with_dest_length(dest: W, dest_length: u64) -> LogWriter<W> {
        LogWriter {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
            type_crc: init_type_crc(),
        }
    }

    pub fn add_record(&mut self, payload: &[u8]) -> Result<()> {
        let mut left = payload;
        let mut begin = true;

        // Fragment the record if necessary and emit it. An empty
        // payload still emits a single zero-length Full record.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not enough room for a header; zero-fill the trailer
                // and switch to a new block.
                if leftover > 0 {
                    const ZEROES: [u8; HEADER_SIZE - 1] = [0; HEADER_SIZE - 1];
                    self.dest.append(&ZEROES[..leftover])?;
                }
                self.block_offset = 0;
            }

            // Invariant: we never leave < HEADER_SIZE bytes in a block.
            debug_assert!(BLOCK_SIZE - self.block_offset >= HEADER_SIZE);

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.len().min(avail);

            let end = fragment_length == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &left[..fragment_length])?;
            left = &left[fragment_length..];
            begin = false;
            if left.is_empty() {
                return Ok(());
            }
        }
    }

    fn emit_physical_record(&mut self, t: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= 0xffff); // Must fit in two bytes.
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let mut header = [0u8; HEADER_SIZE];
        header[4] = (payload.len() & 0xff) as u8;
        header[5] = (payload.len() >> 8) as u8;
        header[6] = t as u8;

        // Checksum covers the record type and the payload.
        let crc = crc32::mask(crc32::extend(self.type_crc[t as usize], payload));
        header[..4].copy_from_slice(&crc.to_le_bytes());

        self.dest.append(&header)?;
        self.dest.append(payload)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    /// Force log contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }
}

#[cfg(test)]
mod tests {
    use crate::env::mem::StringSink;
    use crate::wal::writer::LogWriter;
    use crate::wal::{RecordType, BLOCK_SIZE, HEADER_SIZE};
    use crate::{byteutils, crc32};

    fn written(records: &[&[u8]]) -> Vec<u8> {
        let sink = StringSink::default();
        let mut writer = LogWriter::new(sink.clone());
        for record in records {
            writer.add_record(record).unwrap();
        }
        let out = sink.contents.borrow().clone();
        out
    }

    #[test]
    fn test_single_record_layout() {
        let out = written(&[b"foo"]);
        assert_eq!(out.len(), HEADER_SIZE + 3);
        // length
        assert_eq!(out[4], 3);
        assert_eq!(out[5], 0);
        // type
        assert_eq!(out[6], RecordType::Full as u8);
        // masked crc over type || payload
        let expected = crc32::mask(crc32::value(b"\x01foo"));
        assert_eq!(byteutils::u32_from_le_bytes(&out[..4]), expected);
        assert_eq!(&out[7..], b"foo");
    }

    #[test]
    fn test_empty_record_emitted() {
        let out = written(&[b""]);
        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(out[6], RecordType::Full as u8);
    }

    #[test]
    fn test_fragmentation_types() {
        // Spans three blocks: First, Middle, Last.
        let big = vec![b'x'; 2 * BLOCK_SIZE];
        let out = written(&[&big]);
        assert_eq!(out[6], RecordType::First as u8);
        // Second fragment header sits at the start of block 1.
        assert_eq!(out[BLOCK_SIZE + 6], RecordType::Middle as u8);
        assert_eq!(out[2 * BLOCK_SIZE + 6], RecordType::Last as u8);
        // Total: 3 headers plus payload.
        assert_eq!(out.len(), 2 * BLOCK_SIZE + 3 * HEADER_SIZE);
    }

    #[test]
    fn test_block_trailer_zero_filled() {
        // First record leaves 3 bytes in the block; they must be
        // zeroed and the next record must start the next block.
        let first_len = BLOCK_SIZE - HEADER_SIZE - 3;
        let first = vec![b'a'; first_len];
        let out = written(&[&first, b"bb"]);
        assert_eq!(&out[BLOCK_SIZE - 3..BLOCK_SIZE], &[0, 0, 0]);
        assert_eq!(out[BLOCK_SIZE + 6], RecordType::Full as u8);
        assert_eq!(&out[BLOCK_SIZE + HEADER_SIZE..], b"bb");
    }

    #[test]
    fn test_exact_fit_leaves_no_trailer() {
        // A record of BLOCK_SIZE - HEADER_SIZE payload bytes exactly
        // fills one block.
        let payload = vec![b'y'; BLOCK_SIZE - HEADER_SIZE];
        let out = written(&[&payload, b"z"]);
        assert_eq!(out[6], RecordType::Full as u8);
        assert_eq!(out[BLOCK_SIZE + 6], RecordType::Full as u8);
        assert_eq!(out.len(), BLOCK_SIZE + HEADER_SIZE + 1);
    }

    #[test]
    fn test_reopen_continues_block() {
        let sink = StringSink::default();
        let mut writer = LogWriter::new(sink.clone());
        writer.add_record(b"first").unwrap();
        let len = sink.contents.borrow().len() as u64;
        drop(writer);

        let mut writer = LogWriter::new_with_dest_length(sink.clone(), len);
        writer.add_record(b"second").unwrap();
        let out = sink.contents.borrow().clone();
        // Second record follows the first inside the same block.
        assert_eq!(out[len as usize + 6], RecordType::Full as u8);
        assert_eq!(&out[len as usize + HEADER_SIZE..], b"second");
    }
}
