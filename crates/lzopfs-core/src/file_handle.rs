//! Scoped ownership of an OS file descriptor with big-endian positioned reads.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Where a [`FileHandle::seek`] is relative to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A scoped acquisition of an OS file descriptor.
///
/// The underlying `File` is closed when this value is dropped, on every exit
/// path (including unwinding), which is simply what `std::fs::File`'s own
/// `Drop` impl already guarantees; this type exists to centralize the
/// big-endian read/write convention every archive format in this crate uses.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
}

impl FileHandle {
    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(Error::Io)?;
        Ok(Self { file })
    }

    /// Opens `path` for writing, creating or truncating it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(Error::Io)?;
        Ok(Self { file })
    }

    /// Reads exactly `buf.len()` bytes at the current position, advancing it.
    ///
    /// Raises [`Error::Eof`] on a short read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf).map_err(Error::from)
    }

    /// Reads exactly `n` bytes into a freshly allocated buffer.
    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read(&mut buf)?;
        Ok(buf)
    }

    /// Skips `n` bytes forward from the current position.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        self.seek(n as i64, Whence::Current)
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let pos = match whence {
            Whence::Start => SeekFrom::Start(offset as u64),
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        self.file.seek(pos).map_err(Error::from)
    }

    pub fn tell(&mut self) -> Result<u64> {
        self.file.stream_position().map_err(Error::from)
    }

    /// The file's current on-disk length, independent of the seek position.
    pub fn metadata_len(&self) -> Result<u64> {
        self.file.metadata().map(|m| m.len()).map_err(Error::from)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn write_u32_be(&mut self, v: u32) -> Result<()> {
        self.file.write_all(&v.to_be_bytes()).map_err(Error::from)
    }

    pub fn write_u64_be(&mut self, v: u64) -> Result<()> {
        self.file.write_all(&v.to_be_bytes()).map_err(Error::from)
    }

    /// Reads from the current position to the end of the file.
    pub fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn fixture(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_big_endian() {
        let (_dir, path) = fixture(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02]);
        let mut fh = FileHandle::open(&path).unwrap();
        assert_eq!(fh.read_u16_be().unwrap(), 1);
        assert_eq!(fh.read_u32_be().unwrap(), 2);
    }

    #[test]
    fn seek_and_tell() {
        let (_dir, path) = fixture(b"0123456789");
        let mut fh = FileHandle::open(&path).unwrap();
        fh.seek(5, Whence::Start).unwrap();
        assert_eq!(fh.tell().unwrap(), 5);
        assert_eq!(fh.read_u8().unwrap(), b'5');
        fh.seek(-2, Whence::Current).unwrap();
        assert_eq!(fh.tell().unwrap(), 4);
    }

    #[test]
    fn short_read_is_eof() {
        let (_dir, path) = fixture(&[0x01]);
        let mut fh = FileHandle::open(&path).unwrap();
        let err = fh.read_u32_be().unwrap_err();
        assert!(matches!(err, Error::Eof));
    }
}
