//! The block descriptor and the immutable, binary-searchable list of them.

/// One compressed unit within an archive.
///
/// Invariants (checked with `debug_assert!` when a [`BlockList`] is built,
/// the same trade-off the teacher codebase makes elsewhere for internal
/// consistency checks that shouldn't cost anything in release builds):
/// `usize > 0`; `csize <= usize`; blocks for a file are stored in strictly
/// increasing `uoff` with `uoff[i+1] == uoff[i] + usize[i]`; `coff` is
/// likewise strictly increasing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Block {
    /// Uncompressed byte count of this block.
    pub usize: u32,
    /// Compressed byte count of this block (`== usize` for a stored, i.e.
    /// incompressible, block).
    pub csize: u32,
    /// Absolute offset in the compressed file where the payload begins,
    /// past any per-block checksum words.
    pub coff: u64,
    /// Absolute offset in the virtual uncompressed file.
    pub uoff: u64,
}

impl Block {
    #[must_use]
    pub fn end_uoff(&self) -> u64 {
        self.uoff + u64::from(self.usize)
    }

    #[must_use]
    pub fn contains(&self, uoff: u64) -> bool {
        uoff >= self.uoff && uoff < self.end_uoff()
    }
}

/// An ordered, immutable sequence of [`Block`]s for a single archive.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    blocks: Vec<Block>,
    uncompressed_size: u64,
}

impl BlockList {
    #[must_use]
    pub fn new(blocks: Vec<Block>) -> Self {
        if cfg!(debug_assertions) {
            let mut last_uoff = 0u64;
            let mut last_coff = None;
            for b in &blocks {
                debug_assert!(b.usize > 0, "block with zero uncompressed size");
                debug_assert!(b.csize <= b.usize, "compressed size exceeds uncompressed");
                debug_assert_eq!(b.uoff, last_uoff, "non-contiguous uoff sequence");
                if let Some(last) = last_coff {
                    debug_assert!(b.coff > last, "coff not strictly increasing");
                }
                last_uoff = b.end_uoff();
                last_coff = Some(b.coff);
            }
        }
        let uncompressed_size = blocks.last().map_or(0, Block::end_uoff);
        Self {
            blocks,
            uncompressed_size,
        }
    }

    #[must_use]
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Block] {
        &self.blocks
    }

    /// Finds the unique block `b` such that `b.uoff <= uoff < b.uoff + b.usize`.
    ///
    /// Returns `None` when `uoff >= uncompressed_size()`.
    #[must_use]
    pub fn find_block(&self, uoff: u64) -> Option<&Block> {
        if uoff >= self.uncompressed_size {
            return None;
        }
        let idx = match self.blocks.binary_search_by_key(&uoff, |b| b.uoff) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let block = &self.blocks[idx];
        debug_assert!(block.contains(uoff));
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> BlockList {
        BlockList::new(vec![
            Block { usize: 10, csize: 5, coff: 0, uoff: 0 },
            Block { usize: 10, csize: 10, coff: 5, uoff: 10 },
            Block { usize: 7, csize: 3, coff: 15, uoff: 20 },
        ])
    }

    #[test]
    fn uncompressed_size_is_sum() {
        assert_eq!(list().uncompressed_size(), 27);
    }

    #[test]
    fn find_block_covers_every_offset() {
        let l = list();
        for uoff in 0..27 {
            let b = l.find_block(uoff).unwrap();
            assert!(b.contains(uoff), "uoff {uoff} not covered by {b:?}");
        }
    }

    #[test]
    fn find_block_past_end_is_none() {
        let l = list();
        assert!(l.find_block(27).is_none());
        assert!(l.find_block(1000).is_none());
    }

    #[test]
    fn find_block_on_empty_list() {
        let l = BlockList::new(vec![]);
        assert!(l.find_block(0).is_none());
    }
}
