//! Parsing and block-level decoding of the LZOP archive format.
//!
//! Ground truth for the byte layout is `examples/original_source/LzopFile.cc`
//! (the C++ reference this crate's behavior is ported from) together with
//! `spec.md` §4.B.

use crate::block::{Block, BlockList};
use crate::error::{Error, Result};
use crate::file_handle::{FileHandle, Whence};
use std::path::{Path, PathBuf};

pub const MAGIC: [u8; 9] = [0x89, b'L', b'Z', b'O', 0x00, 0x0D, 0x0A, 0x1A, 0x0A];

/// Highest `min_decoder_version` this implementation can read.
const MAX_DECODE_VERSION: u16 = 0x1010;

mod flags {
    pub const ADLER_DEC: u32 = 0x0000_0001;
    pub const ADLER_COMP: u32 = 0x0000_0002;
    pub const EXTRA_FIELD: u32 = 0x0000_0040;
    pub const CRC_DEC: u32 = 0x0000_0100;
    pub const CRC_COMP: u32 = 0x0000_0200;
    pub const MULTI_PART: u32 = 0x0000_0400;
    pub const FILTER: u32 = 0x0000_0800;
    pub const HEADER_CRC: u32 = 0x0000_1000;
}

/// A parsed LZOP archive: header flags plus the block index built from (or
/// loaded as) a [`BlockList`].
#[derive(Debug)]
pub struct LzopFile {
    path: PathBuf,
    flags: u32,
    blocks: BlockList,
}

fn checksum(use_crc: bool, buf: &[u8]) -> u32 {
    if use_crc {
        let mut hasher = crc32fast::Hasher::new_with_initial(0);
        hasher.update(buf);
        hasher.finalize()
    } else {
        adler::adler32_slice(buf)
    }
}

impl LzopFile {
    /// Parses the header and scans every block, building the index from
    /// scratch. Use [`crate::index::IndexedFile::initialize`] to prefer a
    /// cached sidecar when one exists.
    #[tracing::instrument(level = "debug", skip(max_block), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, max_block: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut fh = FileHandle::open(&path)?;
        let flags = Self::check_header(&mut fh, &path)?;
        let blocks = Self::scan_blocks(&mut fh, flags, max_block, &path)?;
        Ok(Self {
            path,
            flags,
            blocks,
        })
    }

    /// Rebuilds a `LzopFile` around a [`BlockList`] already loaded from a
    /// sidecar index, re-reading just enough of the header to recover the
    /// flags needed for [`Self::decompress_block`]... except per-block
    /// checksum presence only matters during the initial scan (the sidecar
    /// already encodes `coff` directly), so no header re-read is needed here.
    pub(crate) fn from_parts(path: PathBuf, flags: u32, blocks: BlockList) -> Self {
        Self {
            path,
            flags,
            blocks,
        }
    }

    pub(crate) fn flags(&self) -> u32 {
        self.flags
    }

    fn throw_format(path: &Path, message: impl Into<String>) -> Error {
        Error::format(path.display().to_string(), message)
    }

    /// Validates the magic, reads the fixed-layout header, and checks the
    /// header checksum. Returns the archive's `flags` word.
    fn check_header(fh: &mut FileHandle, path: &Path) -> Result<u32> {
        let magic = fh.read_vec(MAGIC.len())?;
        if magic != MAGIC {
            return Err(Self::throw_format(path, "magic mismatch"));
        }
        let header_start = fh.tell()?;

        let _encoder_version = fh.read_u16_be()?;
        let _lzo_lib_version = fh.read_u16_be()?;
        let min_decoder_version = fh.read_u16_be()?;
        if min_decoder_version > MAX_DECODE_VERSION {
            return Err(Self::throw_format(path, "lzop version too new"));
        }

        let _method = fh.read_u8()?;
        let _level = fh.read_u8()?;

        let header_flags = fh.read_u32_be()?;
        if header_flags & flags::MULTI_PART != 0 {
            return Err(Self::throw_format(path, "multi-part archives not supported"));
        }
        if header_flags & flags::FILTER != 0 {
            return Err(Self::throw_format(path, "filtered archives not supported"));
        }

        // mode + mtime_low + mtime_high
        fh.skip(12)?;

        let filename_len = fh.read_u8()?;
        if filename_len > 0 {
            fh.skip(u64::from(filename_len))?;
        }

        let header_len = (fh.tell()? - header_start) as usize;
        fh.seek(header_start as i64, Whence::Start)?;
        let header_bytes = fh.read_vec(header_len)?;

        let stored_checksum = fh.read_u32_be()?;
        let computed = checksum(header_flags & flags::HEADER_CRC != 0, &header_bytes);
        if stored_checksum != computed {
            return Err(Self::throw_format(path, "checksum mismatch"));
        }

        if header_flags & flags::EXTRA_FIELD != 0 {
            let extra_size = fh.read_u32_be()?;
            fh.skip(u64::from(extra_size))?;
            let _unused_checksum = fh.read_u32_be()?;
        }

        Ok(header_flags)
    }

    /// Walks the block table, producing a [`BlockList`]. `max_block` bounds
    /// the uncompressed size of any single block (§4.C / §9's "maxBlock
    /// parameter"); a block that exceeds it fails registration.
    #[tracing::instrument(level = "trace", skip_all)]
    fn scan_blocks(
        fh: &mut FileHandle,
        header_flags: u32,
        max_block: u32,
        path: &Path,
    ) -> Result<BlockList> {
        let ucsums = usize::from(header_flags & flags::ADLER_DEC != 0)
            + usize::from(header_flags & flags::CRC_DEC != 0);
        let csums = usize::from(header_flags & flags::ADLER_COMP != 0)
            + usize::from(header_flags & flags::CRC_COMP != 0);

        let mut blocks = Vec::new();
        let mut uoff: u64 = 0;

        loop {
            let usize_ = fh.read_u32_be()?;
            if usize_ == 0 {
                break;
            }
            if usize_ > max_block {
                return Err(Self::throw_format(
                    path,
                    format!("block of {usize_} bytes exceeds configured maximum of {max_block}"),
                ));
            }
            let csize = fh.read_u32_be()?;

            let mut sum_words = ucsums;
            if csize != usize_ {
                sum_words += csums;
            }
            fh.skip((sum_words * std::mem::size_of::<u32>()) as u64)?;

            let coff = fh.tell()?;
            blocks.push(Block {
                usize: usize_,
                csize,
                coff,
                uoff,
            });

            fh.skip(u64::from(csize))?;
            uoff += u64::from(usize_);
        }

        Ok(BlockList::new(blocks))
    }

    #[must_use]
    pub fn uncompressed_size(&self) -> u64 {
        self.blocks.uncompressed_size()
    }

    #[must_use]
    pub fn find_block(&self, uoff: u64) -> Option<&Block> {
        self.blocks.find_block(uoff)
    }

    #[must_use]
    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decompresses a single block into `out`, which must be exactly
    /// `block.usize` bytes long.
    #[tracing::instrument(level = "trace", skip(self, fh, out), fields(uoff = block.uoff, csize = block.csize))]
    pub fn decompress_block(&self, fh: &mut FileHandle, block: &Block, out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out.len(), block.usize as usize);
        fh.seek(block.coff as i64, Whence::Start)?;

        if block.csize == block.usize {
            fh.read(out)?;
            return Ok(());
        }

        let compressed = fh.read_vec(block.csize as usize)?;
        let (decompressed, status) = rust_lzo::LZOContext::decompress_to_slice(&compressed, out);
        if status != rust_lzo::LZOError::OK {
            return Err(Error::decode(
                self.path.display().to_string(),
                format!("lzo1x_decompress_safe failed: {status:?}"),
            ));
        }
        if decompressed.len() != out.len() {
            return Err(Error::decode(
                self.path.display().to_string(),
                "decompressed size did not match block's recorded uncompressed size",
            ));
        }
        Ok(())
    }

    /// Rewrites `base`'s extension following lzop's convention:
    /// `*.tzo` -> `*.tar`, `*.lzo` -> stripped, anything else unchanged.
    #[must_use]
    pub fn dest_name_for(base: &str) -> String {
        if let Some(stem) = base.strip_suffix(".tzo") {
            return format!("{stem}.tar");
        }
        if let Some(stem) = base.strip_suffix(".lzo") {
            return stem.to_string();
        }
        base.to_string()
    }
}
