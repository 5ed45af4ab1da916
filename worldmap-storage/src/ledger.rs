//! Record of which chunks have already been delivered.
//!
//! The ledger is the only dedup authority: a chunk is skipped iff its key is
//! in here. It is loaded once at startup, mutated after each successful
//! delivery and written back through a [`LedgerStore`]. Writes that fail are
//! logged and the in-memory state stays authoritative, so the worst case
//! after a crash is resending a chunk, never losing one.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use worldmap_world::ChunkKey;

use crate::{LedgerSnapshot, LedgerStore};

/// When marks are written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Persist on every new mark.
    Immediate,
    /// Persist after every `n` new marks. Up to `n - 1` marks are only in
    /// memory until the next flush or [`Ledger::persist`].
    Every(usize),
}

impl FlushPolicy {
    pub fn from_interval(interval: usize) -> Self {
        if interval <= 1 {
            FlushPolicy::Immediate
        } else {
            FlushPolicy::Every(interval)
        }
    }

    fn due(&self, unflushed: usize) -> bool {
        match self {
            FlushPolicy::Immediate => true,
            FlushPolicy::Every(n) => unflushed >= *n,
        }
    }
}

struct LedgerState {
    first_load: bool,
    processed: HashSet<ChunkKey>,
    unflushed: usize,
}

impl LedgerState {
    fn fresh() -> Self {
        Self {
            first_load: true,
            processed: HashSet::new(),
            unflushed: 0,
        }
    }

    fn snapshot(&self) -> LedgerSnapshot {
        let mut keys: Vec<ChunkKey> = self.processed.iter().copied().collect();
        keys.sort();
        LedgerSnapshot {
            first_load: self.first_load,
            processed_chunks: keys.iter().map(ToString::to_string).collect(),
        }
    }
}

pub struct Ledger {
    store: Box<dyn LedgerStore>,
    policy: FlushPolicy,
    // Serializes every read-modify-persist sequence
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Load from `store`. Missing or unreadable state starts a first-load ledger.
    pub fn open(store: impl LedgerStore + 'static, policy: FlushPolicy) -> Self {
        let state = match store.load() {
            Ok(Some(snapshot)) => Self::restore(snapshot),
            Ok(None) => {
                log::info!("No ledger at {}, starting fresh", store.describe());
                LedgerState::fresh()
            }
            Err(e) => {
                log::warn!("Failed to load ledger from {}: {:#}", store.describe(), e);
                log::warn!("Treating as first load");
                LedgerState::fresh()
            }
        };

        Self {
            store: Box::new(store),
            policy,
            state: Mutex::new(state),
        }
    }

    fn restore(snapshot: LedgerSnapshot) -> LedgerState {
        let mut processed = HashSet::with_capacity(snapshot.processed_chunks.len());
        for entry in &snapshot.processed_chunks {
            match entry.parse::<ChunkKey>() {
                Ok(key) => {
                    processed.insert(key);
                }
                Err(e) => log::warn!("Ignoring ledger entry: {}", e),
            }
        }
        LedgerState {
            first_load: snapshot.first_load,
            processed,
            unflushed: 0,
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn is_processed(&self, key: ChunkKey) -> bool {
        self.state().processed.contains(&key)
    }

    /// Record a delivered chunk. Returns `false` if the key was already
    /// present, in which case nothing is written.
    pub fn mark_processed(&self, key: ChunkKey) -> bool {
        let mut state = self.state();
        if !state.processed.insert(key) {
            return false;
        }
        state.unflushed += 1;
        if self.policy.due(state.unflushed) {
            self.write_locked(&mut state);
        }
        true
    }

    pub fn processed_count(&self) -> usize {
        self.state().processed.len()
    }

    pub fn is_first_load(&self) -> bool {
        self.state().first_load
    }

    /// Clear the first-load flag once the initial enumeration has been queued.
    pub fn mark_loaded(&self) {
        let mut state = self.state();
        state.first_load = false;
        self.write_locked(&mut state);
    }

    /// Write the whole ledger now, regardless of the flush policy.
    pub fn persist(&self) {
        let mut state = self.state();
        self.write_locked(&mut state);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state().snapshot()
    }

    fn write_locked(&self, state: &mut LedgerState) {
        match self.store.save(&state.snapshot()) {
            Ok(()) => state.unflushed = 0,
            Err(e) => log::error!("Failed to save ledger to {}: {:#}", self.store.describe(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonFileStore, MemoryStore};
    use anyhow::Result;
    use std::sync::Arc;

    struct BrokenStore;

    impl LedgerStore for BrokenStore {
        fn load(&self) -> Result<Option<LedgerSnapshot>> {
            Ok(None)
        }
        fn save(&self, _snapshot: &LedgerSnapshot) -> Result<()> {
            anyhow::bail!("disk full")
        }
        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    #[test]
    fn test_fresh_ledger() {
        let ledger = Ledger::open(MemoryStore::new(), FlushPolicy::Immediate);
        assert!(ledger.is_first_load());
        assert_eq!(ledger.processed_count(), 0);
        assert!(!ledger.is_processed(ChunkKey::new(0, 0)));
    }

    #[test]
    fn test_mark_is_idempotent() {
        let store = MemoryStore::new();
        let ledger = Ledger::open(store.clone(), FlushPolicy::Immediate);

        assert!(ledger.mark_processed(ChunkKey::new(1, 2)));
        assert!(!ledger.mark_processed(ChunkKey::new(1, 2)));
        assert_eq!(ledger.processed_count(), 1);
        // The repeat mark did not write
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_round_trip_immediate() {
        let store = MemoryStore::new();
        let ledger = Ledger::open(store.clone(), FlushPolicy::Immediate);
        ledger.mark_processed(ChunkKey::new(0, 0));
        ledger.mark_processed(ChunkKey::new(-5, 7));
        ledger.mark_loaded();
        let before = ledger.snapshot();
        drop(ledger);

        let reopened = Ledger::open(store, FlushPolicy::Immediate);
        assert_eq!(reopened.snapshot(), before);
        assert!(!reopened.is_first_load());
        assert!(reopened.is_processed(ChunkKey::new(-5, 7)));
    }

    #[test]
    fn test_round_trip_batched() {
        let store = MemoryStore::new();
        let ledger = Ledger::open(store.clone(), FlushPolicy::Every(3));
        for x in 0..4 {
            ledger.mark_processed(ChunkKey::new(x, 0));
        }
        // Three marks flushed, the fourth is still pending
        assert_eq!(store.save_count(), 1);
        let on_disk = Ledger::open(store.clone(), FlushPolicy::Immediate);
        assert_eq!(on_disk.processed_count(), 3);

        ledger.persist();
        let before = ledger.snapshot();
        let reopened = Ledger::open(store, FlushPolicy::Every(3));
        assert_eq!(reopened.snapshot(), before);
        assert_eq!(reopened.processed_count(), 4);
    }

    #[test]
    fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(JsonFileStore::in_dir(dir.path()), FlushPolicy::Immediate);
        ledger.mark_processed(ChunkKey::new(10, -10));
        let before = ledger.snapshot();
        drop(ledger);

        let reopened = Ledger::open(JsonFileStore::in_dir(dir.path()), FlushPolicy::Immediate);
        assert_eq!(reopened.snapshot(), before);
        assert!(reopened.is_first_load());
    }

    #[test]
    fn test_corrupt_store_is_first_load() {
        let store = MemoryStore::with_contents("[[[");
        let ledger = Ledger::open(store, FlushPolicy::Immediate);
        assert!(ledger.is_first_load());
        assert_eq!(ledger.processed_count(), 0);
    }

    #[test]
    fn test_bad_entries_skipped() {
        let store = MemoryStore::with_contents(
            r#"{"firstLoad": false, "processedChunks": ["1,1", "nope", "2,x", "3,3"]}"#,
        );
        let ledger = Ledger::open(store, FlushPolicy::Immediate);
        assert!(!ledger.is_first_load());
        assert_eq!(ledger.processed_count(), 2);
        assert!(ledger.is_processed(ChunkKey::new(3, 3)));
    }

    #[test]
    fn test_failed_write_keeps_memory_state() {
        let ledger = Ledger::open(BrokenStore, FlushPolicy::Immediate);
        assert!(ledger.mark_processed(ChunkKey::new(4, 4)));
        assert!(ledger.is_processed(ChunkKey::new(4, 4)));
        ledger.persist();
        assert_eq!(ledger.processed_count(), 1);
    }

    #[test]
    fn test_concurrent_duplicate_marks() {
        let store = MemoryStore::new();
        let ledger = Arc::new(Ledger::open(store.clone(), FlushPolicy::Immediate));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    (0..50).filter(|&i| ledger.mark_processed(ChunkKey::new(i, i))).count()
                })
            })
            .collect();
        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(inserted, 50);
        assert_eq!(ledger.processed_count(), 50);
        assert_eq!(store.save_count(), 50);
    }

    #[test]
    fn test_snapshot_sorted() {
        let ledger = Ledger::open(MemoryStore::new(), FlushPolicy::Immediate);
        ledger.mark_processed(ChunkKey::new(2, 0));
        ledger.mark_processed(ChunkKey::new(-1, 5));
        ledger.mark_processed(ChunkKey::new(2, -3));
        assert_eq!(ledger.snapshot().processed_chunks, vec!["-1,5", "2,-3", "2,0"]);
    }

    #[test]
    fn test_flush_policy_from_interval() {
        assert_eq!(FlushPolicy::from_interval(0), FlushPolicy::Immediate);
        assert_eq!(FlushPolicy::from_interval(1), FlushPolicy::Immediate);
        assert_eq!(FlushPolicy::from_interval(25), FlushPolicy::Every(25));
    }
}
