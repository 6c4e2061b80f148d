//! Building a [`BlockList`] from a fresh scan, or loading/saving it from a
//! sidecar index file next to the archive (§4.C).

use crate::block::{Block, BlockList};
use crate::error::{Error, Result};
use crate::file_handle::FileHandle;
use crate::format::lzop::LzopFile;
use crate::format::{CompressedFile, Kind};
use std::path::{Path, PathBuf};

fn sidecar_path(archive_path: &Path, kind: Kind) -> PathBuf {
    let mut s = archive_path.as_os_str().to_os_string();
    s.push(kind.index_suffix());
    PathBuf::from(s)
}

/// Reads `{u32 usize, u32 csize, u64 coff}` records (big-endian) terminated
/// by a `u32` zero, recomputing `uoff` by accumulation since it's never
/// stored (§4.C, §6 "Sidecar index format").
fn load_sidecar(path: &Path) -> Result<BlockList> {
    let mut fh = FileHandle::open(path)?;
    let mut blocks = Vec::new();
    let mut uoff = 0u64;
    loop {
        let usize_ = fh.read_u32_be()?;
        if usize_ == 0 {
            break;
        }
        let csize = fh.read_u32_be()?;
        let coff = fh.read_u64_be()?;
        blocks.push(Block {
            usize: usize_,
            csize,
            coff,
            uoff,
        });
        uoff += u64::from(usize_);
    }
    Ok(BlockList::new(blocks))
}

/// Cheaply checks a loaded sidecar against the archive it claims to index:
/// the last block's payload must actually fit inside the archive's current
/// on-disk length. Catches the common stale-sidecar case (a different or
/// truncated archive now sitting at the same path) without re-scanning the
/// whole block table.
fn validate_against_archive(archive_path: &Path, blocks: &BlockList) -> Result<()> {
    let Some(last) = blocks.as_slice().last() else {
        return Ok(());
    };
    let required = last.coff + u64::from(last.csize);
    let actual = FileHandle::open(archive_path)?.metadata_len()?;
    if actual < required {
        return Err(Error::format(
            archive_path.display().to_string(),
            format!("sidecar expects at least {required} bytes, archive is {actual}"),
        ));
    }
    Ok(())
}

fn save_sidecar(path: &Path, blocks: &BlockList) -> Result<()> {
    let mut fh = FileHandle::create(path)?;
    for block in blocks.as_slice() {
        fh.write_u32_be(block.usize)?;
        fh.write_u32_be(block.csize)?;
        fh.write_u64_be(block.coff)?;
    }
    fh.write_u32_be(0)?;
    tracing::debug!(path = %path.display(), "wrote index sidecar");
    Ok(())
}

/// Registers `archive_path` as a [`CompressedFile`] of the given `kind`,
/// preferring a cached sidecar index over a full rescan.
///
/// `max_block` bounds any single block's uncompressed size; scans that find
/// a larger block fail registration (§4.C, §9).
#[tracing::instrument(level = "debug", fields(path = %archive_path.display()))]
pub fn initialize(archive_path: &Path, kind: Kind, max_block: u32) -> Result<CompressedFile> {
    let sidecar = sidecar_path(archive_path, kind);
    if sidecar.exists() {
        match load_sidecar(&sidecar).and_then(|blocks| {
            validate_against_archive(archive_path, &blocks)?;
            Ok(blocks)
        }) {
            Ok(blocks) => {
                tracing::debug!("loaded index from sidecar");
                return Ok(build_compressed_file(archive_path, kind, 0, blocks));
            }
            Err(e) => {
                tracing::warn!(
                    sidecar = %sidecar.display(),
                    error = %e,
                    "sidecar index unreadable or stale, rebuilding"
                );
            }
        }
    }

    let compressed = build_fresh(archive_path, kind, max_block)?;
    if let Some(blocks) = blocks_of(&compressed) {
        if let Err(e) = save_sidecar(&sidecar, blocks) {
            tracing::warn!(error = %e, "failed to persist index sidecar");
        }
    }
    Ok(compressed)
}

fn build_fresh(path: &Path, kind: Kind, max_block: u32) -> Result<CompressedFile> {
    match kind {
        Kind::Lzop => Ok(CompressedFile::from_lzop(LzopFile::open(path, max_block)?)),
    }
}

fn build_compressed_file(
    path: &Path,
    kind: Kind,
    flags: u32,
    blocks: BlockList,
) -> CompressedFile {
    match kind {
        Kind::Lzop => {
            CompressedFile::from_lzop(LzopFile::from_parts(path.to_path_buf(), flags, blocks))
        }
    }
}

fn blocks_of(file: &CompressedFile) -> Option<&BlockList> {
    file.as_lzop().map(LzopFile::blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.idx");
        let blocks = BlockList::new(vec![
            Block { usize: 10, csize: 8, coff: 20, uoff: 0 },
            Block { usize: 6, csize: 6, coff: 28, uoff: 10 },
        ]);
        save_sidecar(&path, &blocks).unwrap();
        let loaded = load_sidecar(&path).unwrap();
        assert_eq!(loaded.as_slice(), blocks.as_slice());
    }

    #[test]
    fn sidecar_path_appends_suffix() {
        let p = sidecar_path(Path::new("/a/b/archive.lzo"), Kind::Lzop);
        assert_eq!(p, PathBuf::from("/a/b/archive.lzo.lzopfs-idx"));
    }

    #[test]
    fn validate_accepts_sidecar_within_archive_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.lzo");
        std::fs::write(&archive, vec![0u8; 30]).unwrap();
        let blocks = BlockList::new(vec![Block { usize: 10, csize: 8, coff: 20, uoff: 0 }]);
        assert!(validate_against_archive(&archive, &blocks).is_ok());
    }

    #[test]
    fn validate_rejects_sidecar_past_archive_end() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.lzo");
        std::fs::write(&archive, vec![0u8; 10]).unwrap();
        let blocks = BlockList::new(vec![Block { usize: 10, csize: 8, coff: 20, uoff: 0 }]);
        assert!(validate_against_archive(&archive, &blocks).is_err());
    }
}
