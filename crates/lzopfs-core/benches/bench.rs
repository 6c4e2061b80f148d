use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lzopfs_core::block::Block;
use lzopfs_core::cache::{BlockCache, BlockSource, DEFAULT_MAX_SIZE};
use lzopfs_core::file_list::FileId;

struct FixedSource {
    id: FileId,
    payload: Vec<u8>,
}

impl BlockSource for FixedSource {
    fn file_id(&self) -> FileId {
        self.id
    }

    fn decompress(&self, _block: &Block, out: &mut [u8]) -> lzopfs_core::Result<()> {
        out.copy_from_slice(&self.payload[..out.len()]);
        Ok(())
    }

    fn source_path(&self) -> String {
        "bench".to_string()
    }
}

fn bench_cache(c: &mut Criterion) {
    let cache = BlockCache::new(DEFAULT_MAX_SIZE);
    let source = FixedSource {
        id: FileId::for_test(1),
        payload: vec![0x42u8; 64 * 1024],
    };
    let block = Block { usize: 64 * 1024, csize: 64 * 1024, coff: 0, uoff: 0 };

    // Warm the cache once so the benchmark measures the hit path.
    cache.get(&source, &block).unwrap();

    c.bench_function("block_cache_hit", |b| {
        b.iter(|| cache.get(black_box(&source), black_box(&block)).unwrap())
    });
}

criterion_group!(benches, bench_cache);
criterion_main!(benches);
