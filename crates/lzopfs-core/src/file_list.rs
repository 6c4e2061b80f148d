//! The registry of archives exposed by the filesystem: virtual name to
//! [`CompressedFile`] (§4.D).

use crate::format::CompressedFile;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

/// Stable identity for a registered archive, used as half of the cache key
/// so two archives never collide even if their block layouts happen to
/// match (§4.E "Cache key").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileId(NonZeroU32);

impl FileId {
    /// Constructs a `FileId` directly. Exposed for tests and benchmarks;
    /// production code only ever gets one back from [`FileList::add`].
    #[doc(hidden)]
    #[must_use]
    pub fn for_test(n: u32) -> Self {
        Self(NonZeroU32::new(n).expect("FileId must be nonzero"))
    }
}

struct Entry {
    id: FileId,
    file: Arc<CompressedFile>,
}

/// Holds every archive registered with the filesystem, keyed by the virtual
/// name it's mounted under.
///
/// Insertion order is preserved for `readdir` (§6), and a destination name
/// collision (two source archives whose basenames collapse to the same
/// `dest_name`) is resolved by appending a numeric suffix, same as the
/// teacher's directory scanner disambiguates duplicate output names.
#[derive(Default)]
pub struct FileList {
    by_name: HashMap<String, Entry>,
    order: Vec<String>,
    next_id: u32,
}

impl FileList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under its natural `dest_name`, disambiguating with a
    /// `-2`, `-3`, ... suffix before the extension if that name is taken.
    /// Returns the assigned id and the name it was actually registered
    /// under.
    pub fn add(&mut self, file: CompressedFile) -> (FileId, String) {
        let base = file.dest_name();
        let name = self.disambiguate(&base);

        self.next_id += 1;
        let id = FileId(NonZeroU32::new(self.next_id).expect("next_id starts at 1"));
        self.by_name.insert(
            name.clone(),
            Entry {
                id,
                file: Arc::new(file),
            },
        );
        self.order.push(name.clone());
        (id, name)
    }

    fn disambiguate(&self, base: &str) -> String {
        if !self.by_name.contains_key(base) {
            return base.to_string();
        }
        let (stem, ext) = split_ext(base);
        for n in 2u32.. {
            let candidate = match ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            };
            if !self.by_name.contains_key(&candidate) {
                return candidate;
            }
        }
        unreachable!("u32 suffixes exhausted")
    }

    #[must_use]
    pub fn find(&self, vpath: &str) -> Option<(FileId, &Arc<CompressedFile>)> {
        let name = vpath.strip_prefix('/').unwrap_or(vpath);
        self.by_name.get(name).map(|e| (e.id, &e.file))
    }

    #[must_use]
    pub fn find_by_id(&self, id: FileId) -> Option<Arc<CompressedFile>> {
        self.by_name
            .values()
            .find(|e| e.id == id)
            .map(|e| Arc::clone(&e.file))
    }

    /// Visits every registered `(name, CompressedFile)` pair in the order
    /// they were added, for `readdir`.
    pub fn for_names(&self, mut visitor: impl FnMut(&str, FileId, &Arc<CompressedFile>)) {
        for name in &self.order {
            let entry = &self.by_name[name];
            visitor(name, entry.id, &entry.file);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn split_ext(name: &str) -> (&str, Option<&str>) {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => (stem.to_str().unwrap_or(name), ext.to_str()),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockList};
    use crate::format::lzop::LzopFile;
    use std::path::PathBuf;

    fn file(name: &str) -> CompressedFile {
        let blocks = BlockList::new(vec![Block { usize: 4, csize: 4, coff: 0, uoff: 0 }]);
        CompressedFile::from_lzop(LzopFile::from_parts(PathBuf::from(name), 0, blocks))
    }

    #[test]
    fn registers_under_dest_name() {
        let mut list = FileList::new();
        let (_, name) = list.add(file("a.lzo"));
        assert_eq!(name, "a");
        assert!(list.find("a").is_some());
        assert!(list.find("/a").is_some());
    }

    #[test]
    fn disambiguates_collisions() {
        let mut list = FileList::new();
        let (_, n1) = list.add(file("dir1/a.lzo"));
        let (_, n2) = list.add(file("dir2/a.lzo"));
        assert_eq!(n1, "a");
        assert_eq!(n2, "a-2");
    }

    #[test]
    fn preserves_insertion_order() {
        let mut list = FileList::new();
        list.add(file("c.lzo"));
        list.add(file("a.lzo"));
        list.add(file("b.lzo"));
        let mut seen = Vec::new();
        list.for_names(|name, _, _| seen.push(name.to_string()));
        assert_eq!(seen, vec!["c", "a", "b"]);
    }

    #[test]
    fn ids_are_unique_and_stable() {
        let mut list = FileList::new();
        let (id1, _) = list.add(file("a.lzo"));
        let (id2, _) = list.add(file("b.lzo"));
        assert_ne!(id1, id2);
        assert!(list.find_by_id(id1).is_some());
    }
}
