use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

use crate::{LedgerSnapshot, LedgerStore};

/// In-process store. Clones share the same backing slot, so a ledger can be
/// dropped and reopened from a clone to simulate a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with raw (possibly corrupt) contents.
    pub fn with_contents(contents: &str) -> Self {
        let store = Self::default();
        *store.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(contents.to_string());
        store
    }

    pub fn contents(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>> {
        match self.contents() {
            Some(text) => {
                let snapshot = serde_json::from_str(&text).context("Stored ledger is not valid JSON")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize ledger")?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
