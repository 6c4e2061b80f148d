//! A single open instance of a registered archive: the read path that
//! clamps a request to EOF, walks the blocks it spans, and stitches their
//! decompressed bytes together (§4.F).

use crate::cache::{BlockCache, BlockSource};
use crate::error::Result;
use crate::file_handle::FileHandle;
use crate::file_list::FileId;
use crate::format::CompressedFile;
use std::sync::{Arc, Mutex};

/// Owns the dedicated [`FileHandle`] opened for this file descriptor and a
/// shared reference to the archive's block index, so concurrent opens of
/// the same archive never contend on one file position.
///
/// The `FileHandle` is wrapped in a `Mutex` rather than given `&mut self`
/// access because a single open file description can still receive
/// concurrent `read` dispatches from the kernel; the cache's single-flight
/// join already avoids redundant decompression for the common case where
/// those reads overlap a block.
pub struct OpenCompressedFile {
    file_id: FileId,
    compressed: Arc<CompressedFile>,
    fh: Mutex<FileHandle>,
}

impl OpenCompressedFile {
    pub fn open(file_id: FileId, compressed: Arc<CompressedFile>) -> Result<Self> {
        let fh = FileHandle::open(compressed.path())?;
        Ok(Self {
            file_id,
            compressed,
            fh: Mutex::new(fh),
        })
    }

    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Reads up to `size` bytes starting at `offset` into `out`, returning
    /// the number of bytes actually written. `offset` past end-of-file
    /// yields an empty read, and a request crossing EOF is clamped rather
    /// than erroring (§4.F edge cases).
    #[tracing::instrument(level = "trace", skip(self, cache, out), fields(file = ?self.file_id, offset, size))]
    pub fn read(&self, cache: &BlockCache, out: &mut [u8], size: usize, offset: u64) -> Result<usize> {
        let file_size = self.compressed.uncompressed_size();
        if offset >= file_size {
            return Ok(0);
        }
        let want = size.min(out.len()).min((file_size - offset) as usize);

        let mut written = 0;
        let mut cursor = offset;
        while written < want {
            let Some(block) = self.compressed.find_block(cursor) else {
                break;
            };
            let cached = cache.get(self, block)?;
            let bytes = cached.bytes();

            let block_rel = (cursor - block.uoff) as usize;
            let take = (bytes.len() - block_rel).min(want - written);
            out[written..written + take].copy_from_slice(&bytes[block_rel..block_rel + take]);

            written += take;
            cursor += take as u64;
        }
        Ok(written)
    }
}

impl BlockSource for OpenCompressedFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn decompress(&self, block: &crate::block::Block, out: &mut [u8]) -> Result<()> {
        let mut fh = self.fh.lock().unwrap();
        self.compressed.decompress_block(&mut fh, block, out)
    }

    fn source_path(&self) -> String {
        self.compressed.path().display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockList};
    use crate::cache::DEFAULT_MAX_SIZE;
    use crate::format::lzop::LzopFile;
    use std::io::Write;

    fn build_and_open(payload: &[u8], block_size: usize) -> (tempfile::TempDir, Arc<CompressedFile>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lzo");

        let mut buf = Vec::new();
        buf.extend_from_slice(&crate::format::lzop::MAGIC);
        let header_start = buf.len();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&0x1040u16.to_be_bytes());
        buf.extend_from_slice(&0x1010u16.to_be_bytes());
        buf.push(1);
        buf.push(5);
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 12]);
        buf.push(0);
        let header_bytes = buf[header_start..].to_vec();
        let cksum = adler::adler32_slice(&header_bytes);
        buf.extend_from_slice(&cksum.to_be_bytes());

        for chunk in payload.chunks(block_size) {
            buf.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            buf.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            buf.extend_from_slice(chunk);
        }
        buf.extend_from_slice(&0u32.to_be_bytes());

        std::fs::File::create(&path).unwrap().write_all(&buf).unwrap();
        let file = LzopFile::open(&path, u32::MAX).unwrap();
        (dir, Arc::new(CompressedFile::from_lzop(file)))
    }

    #[test]
    fn reads_across_block_boundary() {
        let payload = b"0123456789abcdef";
        let (_dir, compressed) = build_and_open(payload, 6);
        let opened = OpenCompressedFile::open(FileId::for_test(1), Arc::clone(&compressed)).unwrap();
        let cache = BlockCache::new(DEFAULT_MAX_SIZE);

        let mut out = vec![0u8; 5];
        let n = opened.read(&cache, &mut out, 5, 4).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&out, &payload[4..9]);
    }

    #[test]
    fn read_past_eof_clamps() {
        let payload = b"hello world";
        let (_dir, compressed) = build_and_open(payload, 4);
        let opened = OpenCompressedFile::open(FileId::for_test(1), Arc::clone(&compressed)).unwrap();
        let cache = BlockCache::new(DEFAULT_MAX_SIZE);

        let mut out = vec![0u8; 100];
        let n = opened.read(&cache, &mut out, 100, 9).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&out[..2], b"ld");

        let n = opened.read(&cache, &mut out, 10, payload.len() as u64).unwrap();
        assert_eq!(n, 0);
    }
}
