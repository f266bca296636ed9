//! Block handles, the fixed-size table footer, and the block read
//! path shared by the table reader.

use crate::byteutils::{decode_varint64, put_fixed32, put_varint64, u32_from_le_bytes};
use crate::crc32;
use crate::db::options::CompressionType;
use crate::env::RandomAccessFile;
use crate::{Error, Result};

/// `0xdb991122_c7b4e193`, picked when the format was defined.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb99_1122_c7b4_e193;

/// Maximum encoding length of a BlockHandle: two varint64s.
pub const MAX_ENCODED_LENGTH: usize = 10 + 10;

/// Encoded footer: two handles padded to their maximum length plus the
/// magic number.
pub const FOOTER_ENCODED_LENGTH: usize = 2 * MAX_ENCODED_LENGTH + 8;

/// 1-byte compression type + 32-bit crc.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block within the table file. `size` excludes the
/// trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(MAX_ENCODED_LENGTH);
        self.encode_to(&mut dst);
        dst
    }

    /// Decode a handle from the front of `input`, advancing it past
    /// the encoding. Trailing bytes are left in place, so callers may
    /// store extra data after a handle.
    pub fn decode_from(input: &mut &[u8]) -> Result<BlockHandle> {
        let (offset, n0) =
            decode_varint64(input).ok_or_else(|| Error::corruption("bad block handle"))?;
        let (size, n1) = decode_varint64(&input[n0..])
            .ok_or_else(|| Error::corruption("bad block handle"))?;
        *input = &input[n0 + n1..];
        Ok(BlockHandle::new(offset, size))
    }
}

/// The fixed-length footer at the tail of every table file:
///
/// ```text
/// +------------------+---------------+---------------+----------+
/// | metaindex handle | index handle  | zero padding  | magic u64|
/// +------------------+---------------+---------------+----------+
/// \------------------------ 48 bytes ------------------------—-/
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let original_size = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(original_size + 2 * MAX_ENCODED_LENGTH, 0); // Padding.
        put_fixed32(dst, (TABLE_MAGIC_NUMBER & 0xffff_ffff) as u32);
        put_fixed32(dst, (TABLE_MAGIC_NUMBER >> 32) as u32);
        debug_assert_eq!(dst.len(), original_size + FOOTER_ENCODED_LENGTH);
    }

    pub fn decode_from(input: &[u8]) -> Result<Footer> {
        if input.len() < FOOTER_ENCODED_LENGTH {
            return Err(Error::corruption("file is too short to be an sstable"));
        }
        let magic_lo = u32_from_le_bytes(&input[FOOTER_ENCODED_LENGTH - 8..]) as u64;
        let magic_hi = u32_from_le_bytes(&input[FOOTER_ENCODED_LENGTH - 4..]) as u64;
        let magic = (magic_hi << 32) | magic_lo;
        if magic != TABLE_MAGIC_NUMBER {
            return Err(Error::corruption("not an sstable (bad magic number)"));
        }

        let mut cursor = input;
        let metaindex_handle = BlockHandle::decode_from(&mut cursor)?;
        let index_handle = BlockHandle::decode_from(&mut cursor)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Read the block pointed at by `handle`, verify its trailer when
/// asked, and undo compression. Returns the raw block contents.
pub fn read_block(
    file: &dyn RandomAccessFile,
    verify_checksums: bool,
    handle: &BlockHandle,
) -> Result<Vec<u8>> {
    let n = handle.size as usize;
    let data = file.read(handle.offset, n + BLOCK_TRAILER_SIZE)?;
    if data.len() != n + BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("truncated block read"));
    }

    // Check the crc of the type and the block contents.
    if verify_checksums {
        let crc = crc32::unmask(u32_from_le_bytes(&data[n + 1..]));
        let actual = crc32::value(&data[..n + 1]);
        if actual != crc {
            return Err(Error::corruption("block checksum mismatch"));
        }
    }

    match CompressionType::from_u8(data[n]) {
        Some(CompressionType::None) => Ok(data[..n].to_vec()),
        Some(CompressionType::Snappy) => snap::raw::Decoder::new()
            .decompress_vec(&data[..n])
            .map_err(|_| Error::corruption("corrupted snappy compressed block contents")),
        Some(CompressionType::Zstd) => {
            zstd::stream::decode_all(&data[..n])
                .map_err(|_| Error::corruption("corrupted zstd compressed block contents"))
        }
        None => Err(Error::corruption("bad block type")),
    }
}
