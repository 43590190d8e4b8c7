//! Composite-key stats cache.
//!
//! Every fetch is preceded by a lookup on `"{team_id}:{season_id}"` and
//! followed by a write of the flattened result. Entries never expire; a
//! force-refresh run simply skips the lookup.
//!
//! Two backends implement [`CacheStore`]:
//! - [`JsonFileCache`]: a flat JSON object rewritten whole on flush.
//! - [`crate::db::Database`]: SQLite, one upsert per key.
//!
//! Neither assumes concurrent writers. The enrichment loop is the only caller
//! of `put` during a run.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::db::models::{FlatStats, StatsJson, TeamSeasonKey};
use crate::persist;

/// get/put contract shared by every cache backend.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &TeamSeasonKey) -> Option<FlatStats>;

    fn put(&self, key: TeamSeasonKey, stats: &FlatStats) -> Result<()>;

    /// Number of cached keys.
    fn len(&self) -> usize;

    /// Make buffered writes durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// File-backed cache: one JSON object keyed by `"team_id:season_id"`.
pub struct JsonFileCache {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, FlatStats>>,
    dirty: AtomicBool,
}

impl JsonFileCache {
    /// Load the cache file. A missing or unreadable file is an empty cache.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, FlatStats>>(&raw) {
                Ok(entries) => {
                    info!("Loaded {} cached team-seasons from {:?}", entries.len(), path);
                    entries
                }
                Err(e) => {
                    warn!("Ignoring corrupt stats cache {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(_) => {
                info!("No stats cache found at {:?}, starting empty", path);
                BTreeMap::new()
            }
        };

        JsonFileCache {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    /// Rewrite the whole file at `path` (temp file + rename).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let out: BTreeMap<&String, StatsJson> = entries.iter().map(|(k, v)| (k, StatsJson(v))).collect();
            serde_json::to_string_pretty(&out).context("serialize stats cache")?
        };
        persist::write_atomic(path, json.as_bytes())
            .with_context(|| format!("save stats cache to {:?}", path))
    }
}

impl CacheStore for JsonFileCache {
    fn get(&self, key: &TeamSeasonKey) -> Option<FlatStats> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&key.cache_key()).cloned()
    }

    fn put(&self, key: TeamSeasonKey, stats: &FlatStats) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.cache_key(), stats.clone());
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            debug!("Stats cache unchanged, skipping rewrite");
            return Ok(());
        }
        if let Err(e) = self.save_to(&self.path) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        info!("Saved {} cached team-seasons to {:?}", self.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stats(pairs: &[(&str, f64)]) -> FlatStats {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_missing_file_is_empty_cache() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::load(dir.path().join("nope.json"));
        assert_eq!(cache.len(), 0);
        assert!(cache.get(&TeamSeasonKey::new(1, 2)).is_none());
    }

    #[test]
    fn test_corrupt_file_is_empty_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();
        let cache = JsonFileCache::load(&path);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_put_flush_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let cache = JsonFileCache::load(&path);
        cache
            .put(TeamSeasonKey::new(3169, 25673), &stats(&[("goals", 15.0)]))
            .unwrap();
        cache.put(TeamSeasonKey::new(1, 2), &FlatStats::new()).unwrap();
        cache.flush().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["3169:25673"]["goals"], serde_json::json!(15));

        let reloaded = JsonFileCache::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get(&TeamSeasonKey::new(3169, 25673)),
            Some(stats(&[("goals", 15.0)]))
        );
        // An empty result is still a cached result.
        assert_eq!(reloaded.get(&TeamSeasonKey::new(1, 2)), Some(FlatStats::new()));
    }

    #[test]
    fn test_put_overwrites_existing_key() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::load(dir.path().join("cache.json"));
        let key = TeamSeasonKey::new(1, 2);
        cache.put(key, &stats(&[("goals", 1.0)])).unwrap();
        cache.put(key, &stats(&[("goals", 2.0)])).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key), Some(stats(&[("goals", 2.0)])));
    }

    #[test]
    fn test_flush_without_changes_does_not_create_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = JsonFileCache::load(&path);
        cache.flush().unwrap();
        assert!(!path.exists());
    }
}
