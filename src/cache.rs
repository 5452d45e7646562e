use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{RepoId, RepositoryRecord};

/// One cached record plus the time it was written.
///
/// Entries are never evicted; a stale entry simply stops being returned by
/// [`RepoCache::get_fresh`] and is overwritten on the next probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: RepositoryRecord,
    pub cached_at: DateTime<Utc>,
}

/// Persistent repository cache keyed by identity.
///
/// In-memory map with JSON disk persistence. All mutation goes through
/// per-identity upsert under a write lock, so concurrent probe workers can
/// share one handle.
pub struct RepoCache {
    entries: RwLock<HashMap<RepoId, CacheEntry>>,
    persist_path: PathBuf,
    staleness: ChronoDuration,
}

impl RepoCache {
    pub fn open_or_create(path: &Path, staleness: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries: HashMap<RepoId, CacheEntry> = if path.exists() {
            let data = std::fs::read_to_string(path).context("Failed to read repo cache")?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path: path.to_path_buf(),
            staleness: ChronoDuration::from_std(staleness).unwrap_or(ChronoDuration::hours(24)),
        })
    }

    /// Return the cached record iff it is fresher than the staleness
    /// threshold. Stale entries return `None` but stay on disk.
    pub fn get_fresh(&self, id: &RepoId) -> Option<RepositoryRecord> {
        let entries = self.entries.read();
        let entry = entries.get(id)?;
        if Utc::now() - entry.cached_at < self.staleness {
            Some(entry.record.clone())
        } else {
            None
        }
    }

    /// Return the cached record regardless of freshness.
    pub fn get_any(&self, id: &RepoId) -> Option<RepositoryRecord> {
        self.entries.read().get(id).map(|e| e.record.clone())
    }

    /// Insert or replace the record for its identity with a fresh timestamp,
    /// then persist the whole map.
    pub fn upsert(&self, record: RepositoryRecord) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.write();
            entries.insert(
                record.id.clone(),
                CacheEntry { record, cached_at: Utc::now() },
            );
            serde_json::to_string(&*entries)?
        };
        self.write_atomic(&snapshot)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Atomic write via temp file + rename so a crash mid-write never leaves
    /// a truncated cache on disk.
    fn write_atomic(&self, data: &str) -> Result<()> {
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data).context("Failed to write repo cache")?;
        std::fs::rename(&tmp_path, &self.persist_path).context("Failed to replace repo cache")?;
        Ok(())
    }
}
