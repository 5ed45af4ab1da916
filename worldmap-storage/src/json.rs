use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{LedgerSnapshot, LedgerStore};

pub const LEDGER_FILE: &str = "worldmap_data.json";

/// Ledger kept as a pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the conventional file name inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(LEDGER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger {}", self.path.display()))?;
        let snapshot = serde_json::from_str(&text)
            .with_context(|| format!("Ledger {} is not valid JSON", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize ledger")?;

        // Write aside then rename, so a crash never leaves a truncated ledger
        let temp = self.temp_path();
        fs::write(&temp, json).with_context(|| format!("Failed to write {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
