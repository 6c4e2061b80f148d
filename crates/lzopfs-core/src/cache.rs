//! A bounded, key-addressable cache of decompressed blocks with per-key
//! single-flight decompression (§4.E).
//!
//! The reference implementation serializes every FUSE `read` behind one
//! global mutex and leaves the cache itself undocumented with respect to
//! concurrency (§9's Open Question). This implementation resolves that the
//! other way: `BlockCache` is thread-safe on its own, so the global FUSE
//! read mutex can be dropped and concurrent reads on distinct open files
//! proceed in parallel. The wait/notify shape for single-flight joins is the
//! `Arc<(Mutex<_>, Condvar)>` pattern used for completion-waiting in this
//! pack's `lz4r` thread pool (`threadpool.rs`).

use crate::block::Block;
use crate::error::{Error, Result};
use crate::file_list::FileId;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

/// Default aggregate size budget, per §6.
pub const DEFAULT_MAX_SIZE: u64 = 32 * 1024 * 1024;

/// A decompressed block, materialized in memory.
#[derive(Debug)]
pub struct CachedBlock {
    pub file_id: FileId,
    pub uoff: u64,
    data: Box<[u8]>,
}

impl CachedBlock {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Anything the cache can ask to produce a block's decompressed bytes on a
/// miss: a stable identity for the cache key, plus a way to decode.
///
/// Implemented by `OpenCompressedFile`, which owns the dedicated `FileHandle`
/// and a reference to the archive's `CompressedFile` capability that
/// `decompress_block` is defined on (§4.F).
pub trait BlockSource {
    fn file_id(&self) -> FileId;
    fn decompress(&self, block: &Block, out: &mut [u8]) -> Result<()>;
    fn source_path(&self) -> String;
}

type Key = (FileId, u64);

enum FlightOutcome {
    Pending,
    Ready(std::result::Result<Arc<CachedBlock>, String>),
}

struct Flight {
    state: Mutex<FlightOutcome>,
    condvar: Condvar,
}

enum Slot {
    InFlight(Arc<Flight>),
    Resident { block: Arc<CachedBlock>, epoch: u64 },
}

struct Inner {
    slots: HashMap<Key, Slot>,
    resident_bytes: u64,
    next_epoch: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Snapshot of cache activity, exposed purely for observability (ambient,
/// not gated by any Non-goal).
#[derive(Debug, Copy, Clone, Default)]
pub struct Stats {
    pub resident_bytes: u64,
    pub resident_blocks: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct BlockCache {
    max_size: u64,
    inner: Mutex<Inner>,
}

impl BlockCache {
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                resident_bytes: 0,
                next_epoch: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock().unwrap();
        Stats {
            resident_bytes: inner.resident_bytes,
            resident_blocks: inner
                .slots
                .values()
                .filter(|s| matches!(s, Slot::Resident { .. }))
                .count(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    /// Removes every cached block belonging to `file_id`, e.g. when an
    /// archive is unregistered.
    pub fn drop_file(&self, file_id: FileId) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.retain(|(id, _), slot| {
            if *id != file_id {
                return true;
            }
            if let Slot::Resident { block, .. } = slot {
                inner.resident_bytes -= block.bytes().len() as u64;
            }
            false
        });
    }

    /// Returns the decompressed bytes for `block`, decoding via `source` on
    /// a miss. Concurrent misses on the same key decode exactly once; the
    /// losers of the race wait for and share the winner's result.
    #[tracing::instrument(level = "trace", skip(self, source), fields(uoff = block.uoff))]
    pub fn get(&self, source: &impl BlockSource, block: &Block) -> Result<Arc<CachedBlock>> {
        let key = (source.file_id(), block.uoff);

        let flight = {
            let mut inner = self.inner.lock().unwrap();
            match inner.slots.get_mut(&key) {
                Some(Slot::Resident { block: cached, epoch }) => {
                    inner.hits += 1;
                    *epoch = Self::next_epoch(&mut inner.next_epoch);
                    return Ok(Arc::clone(cached));
                }
                Some(Slot::InFlight(flight)) => Arc::clone(flight),
                None => {
                    inner.misses += 1;
                    let flight = Arc::new(Flight {
                        state: Mutex::new(FlightOutcome::Pending),
                        condvar: Condvar::new(),
                    });
                    inner.slots.insert(key, Slot::InFlight(Arc::clone(&flight)));
                    return self.decode_and_install(source, block, key, flight);
                }
            }
        };

        self.join_flight(&flight)
    }

    fn next_epoch(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }

    fn join_flight(&self, flight: &Flight) -> Result<Arc<CachedBlock>> {
        let mut guard = flight.state.lock().unwrap();
        loop {
            match &*guard {
                FlightOutcome::Pending => {
                    guard = flight.condvar.wait(guard).unwrap();
                }
                FlightOutcome::Ready(Ok(block)) => return Ok(Arc::clone(block)),
                FlightOutcome::Ready(Err(message)) => {
                    return Err(Error::decode("<single-flight wait>", message.clone()))
                }
            }
        }
    }

    fn decode_and_install(
        &self,
        source: &impl BlockSource,
        block: &Block,
        key: Key,
        flight: Arc<Flight>,
    ) -> Result<Arc<CachedBlock>> {
        let mut buf = vec![0u8; block.usize as usize];
        let decode_result = source.decompress(block, &mut buf);

        let outcome = match decode_result {
            Ok(()) => {
                let cached = Arc::new(CachedBlock {
                    file_id: key.0,
                    uoff: key.1,
                    data: buf.into_boxed_slice(),
                });
                self.install(key, Arc::clone(&cached));
                Ok(cached)
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                inner.slots.remove(&key);
                Err(e)
            }
        };

        let mut guard = flight.state.lock().unwrap();
        *guard = FlightOutcome::Ready(match &outcome {
            Ok(block) => Ok(Arc::clone(block)),
            Err(e) => Err(e.to_string()),
        });
        drop(guard);
        flight.condvar.notify_all();

        outcome
    }

    fn install(&self, key: Key, block: Arc<CachedBlock>) {
        let mut inner = self.inner.lock().unwrap();
        let size = block.bytes().len() as u64;
        let epoch = Self::next_epoch(&mut inner.next_epoch);
        inner.resident_bytes += size;
        inner.slots.insert(key, Slot::Resident { block, epoch });
        self.evict_to_fit(&mut inner, key);
    }

    /// Evicts least-recently-used resident blocks until total resident bytes
    /// fits `max_size`, exempting `protected` (the block just inserted) even
    /// if it alone exceeds the budget.
    fn evict_to_fit(&self, inner: &mut Inner, protected: Key) {
        while inner.resident_bytes > self.max_size {
            let victim = inner
                .slots
                .iter()
                .filter(|(k, slot)| **k != protected && matches!(slot, Slot::Resident { .. }))
                .min_by_key(|(_, slot)| match slot {
                    Slot::Resident { epoch, .. } => *epoch,
                    Slot::InFlight(_) => u64::MAX,
                })
                .map(|(k, _)| *k);

            let Some(victim) = victim else { break };
            if let Some(Slot::Resident { block, .. }) = inner.slots.remove(&victim) {
                inner.resident_bytes -= block.bytes().len() as u64;
                inner.evictions += 1;
            }
        }
    }
}
