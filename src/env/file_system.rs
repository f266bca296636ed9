use crate::env::{RandomAccessFile, SequentialFile, WritableFile};
use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub struct FsSequentialFile {
    reader: BufReader<File>,
}

impl FsSequentialFile {
    pub fn open(path: impl AsRef<Path>) -> Result<FsSequentialFile> {
        Ok(FsSequentialFile {
            reader: BufReader::new(File::open(path)?),
        })
    }
}

impl SequentialFile for FsSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // A single BufReader::read may return less than requested even
        // before end of file; loop until the buffer fills or EOF.
        let mut total = 0;
        while total < buf.len() {
            let n = self.reader.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

pub struct FsRandomAccessFile {
    file: File,
}

impl FsRandomAccessFile {
    pub fn open(path: impl AsRef<Path>) -> Result<FsRandomAccessFile> {
        Ok(FsRandomAccessFile {
            file: File::open(path)?,
        })
    }
}

impl RandomAccessFile for FsRandomAccessFile {
    #[cfg(unix)]
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;
        let mut buf = vec![0u8; n];
        let mut total = 0;
        while total < n {
            let read = self.file.read_at(&mut buf[total..], offset + total as u64)?;
            if read == 0 {
                break;
            }
            total += read;
        }
        buf.truncate(total);
        Ok(buf)
    }

    #[cfg(not(unix))]
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        use std::os::windows::fs::FileExt;
        let mut buf = vec![0u8; n];
        let mut total = 0;
        while total < n {
            let read = self
                .file
                .seek_read(&mut buf[total..], offset + total as u64)?;
            if read == 0 {
                break;
            }
            total += read;
        }
        buf.truncate(total);
        Ok(buf)
    }
}

pub struct FsWritableFile {
    writer: BufWriter<File>,
}

impl FsWritableFile {
    pub fn create(path: impl AsRef<Path>) -> Result<FsWritableFile> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FsWritableFile {
            writer: BufWriter::new(file),
        })
    }

    /// Open for append, keeping existing contents. Returns the file and
    /// its current length, which a log writer needs to resume block
    /// alignment.
    pub fn reopen(path: impl AsRef<Path>) -> Result<(FsWritableFile, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok((
            FsWritableFile {
                writer: BufWriter::new(file),
            },
            len,
        ))
    }
}

impl WritableFile for FsWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_mut().sync_data()?;
        Ok(())
    }
}
