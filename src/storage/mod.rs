//! Persistence layer.
//!
//! Keeps the last-known balance of every platform in a small JSON file
//! (`{"platform": "123", ...}`) so each run can report the change since
//! the previous one. Reads fail soft; writes go to a temp file that is
//! renamed over the destination, so a crash never leaves a half-written
//! state file behind.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::types::{Balance, RunResult};

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "last_coins.json";

/// Platform display name → last-known balance. Sorted for stable diffs.
pub type BalanceMap = BTreeMap<String, Balance>;

/// The on-disk record of last-known balances.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the balance map.
    ///
    /// A missing, unreadable or corrupt file yields an empty map.
    pub fn load(&self) -> BalanceMap {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved balances found, starting fresh");
                return BalanceMap::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read state file, ignoring it");
                return BalanceMap::new();
            }
        };

        match serde_json::from_str::<BalanceMap>(&json) {
            Ok(map) => {
                debug!(path = %self.path.display(), platforms = map.len(), "Balances loaded");
                map
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file is corrupt, ignoring it");
                BalanceMap::new()
            }
        }
    }

    /// Replace the state file with `balances`.
    pub fn save(&self, balances: &BalanceMap) -> Result<()> {
        let json =
            serde_json::to_string_pretty(balances).context("Failed to serialise balances")?;

        // The temp file must share the destination's filesystem for the
        // final rename to be atomic. It is deleted if anything fails.
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("Failed to flush {}", tmp.path().display()))?;
        tmp.persist(&self.path).map_err(|e| e.error).with_context(|| {
            format!("Failed to move state into place at {}", self.path.display())
        })?;

        debug!(path = %self.path.display(), platforms = balances.len(), "Balances saved");
        Ok(())
    }
}

/// Fold this run's freshly read balances into `balances`.
///
/// Only results that produced a balance overwrite; every other platform
/// keeps its stored value. Returns how many entries were updated.
pub fn merge_balances(balances: &mut BalanceMap, results: &[RunResult]) -> usize {
    let mut updated = 0;
    for result in results {
        if let Some(balance) = result.balance {
            balances.insert(result.platform.clone(), balance);
            updated += 1;
        }
    }
    updated
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
