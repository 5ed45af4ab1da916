use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod json;
pub mod ledger;
pub mod memory;

pub use json::JsonFileStore;
pub use ledger::{FlushPolicy, Ledger};
pub use memory::MemoryStore;

/// Persisted form of the ledger.
///
/// Keys are stored as `"x,z"` strings so the file stays readable and
/// compatible with ledgers written by earlier deployments.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    #[serde(default = "default_first_load")]
    pub first_load: bool,
    #[serde(default)]
    pub processed_chunks: Vec<String>,
}

fn default_first_load() -> bool {
    true
}

impl Default for LedgerSnapshot {
    fn default() -> Self {
        Self {
            first_load: true,
            processed_chunks: Vec::new(),
        }
    }
}

/// Durable home of a [`Ledger`].
pub trait LedgerStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<LedgerSnapshot>>;
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()>;
    /// Human-readable location, for log lines.
    fn describe(&self) -> String;
}
