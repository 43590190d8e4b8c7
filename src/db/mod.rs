use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub mod models;
use models::*;

use crate::cache::CacheStore;

/// Thread-safe SQLite store (single connection with mutex).
///
/// Holds the team-season stats cache and the upserted output records.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Cache ────────────────────────────────────────────────────────────────

    /// Look up cached stats. A row whose JSON no longer parses is treated as
    /// absent so the key is fetched again.
    pub fn get_cached_stats(&self, key: &TeamSeasonKey) -> Result<Option<FlatStats>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT stats_json FROM team_season_cache WHERE cache_key = ?1",
                params![key.cache_key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(team_id = key.team_id, season_id = key.season_id, "Corrupt cache row: {}", e);
                None
            }
        }))
    }

    /// Upsert one cache entry in its own transaction.
    pub fn put_cached_stats(&self, key: TeamSeasonKey, stats: &FlatStats) -> Result<()> {
        let json = serde_json::to_string(&StatsJson(stats))?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO team_season_cache (cache_key, team_id, season_id, stats_json, fetched_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(cache_key) DO UPDATE SET
                stats_json=excluded.stats_json,
                fetched_at=excluded.fetched_at",
            params![key.cache_key(), key.team_id, key.season_id, json, Utc::now()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn count_cached(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM team_season_cache", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    // ── Team season stats ─────────────────────────────────────────────────────

    /// Upsert output records by (team_id, season_id). Re-running with the same
    /// records leaves the table unchanged apart from `updated_at`.
    pub fn upsert_team_season_stats(&self, records: &[TeamSeasonStats]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO team_season_stats (team_id, season_id, team_name, stats_json, updated_at)
                 VALUES (?1,?2,?3,?4,?5)
                 ON CONFLICT(team_id, season_id) DO UPDATE SET
                    team_name=excluded.team_name,
                    stats_json=excluded.stats_json,
                    updated_at=excluded.updated_at",
            )?;
            let now = Utc::now();
            for record in records {
                stmt.execute(params![
                    record.team_id,
                    record.season_id,
                    record.team_name,
                    serde_json::to_string(&StatsJson(&record.stats))?,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// List stored records ordered by key.
    pub fn list_team_season_stats(&self) -> Result<Vec<TeamSeasonStats>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT team_id, season_id, team_name, stats_json
             FROM team_season_stats ORDER BY team_id, season_id",
        )?;
        let rows = stmt
            .query_map([], map_team_season_stats)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl CacheStore for Database {
    fn get(&self, key: &TeamSeasonKey) -> Option<FlatStats> {
        match self.get_cached_stats(key) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(team_id = key.team_id, season_id = key.season_id, "Cache lookup failed: {}", e);
                None
            }
        }
    }

    fn put(&self, key: TeamSeasonKey, stats: &FlatStats) -> Result<()> {
        self.put_cached_stats(key, stats)
    }

    fn len(&self) -> usize {
        self.count_cached().unwrap_or(0)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_team_season_stats(row: &rusqlite::Row) -> rusqlite::Result<TeamSeasonStats> {
    let json: String = row.get(3)?;
    let stats = serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(TeamSeasonStats {
        team_id: row.get(0)?,
        season_id: row.get(1)?,
        team_name: row.get(2)?,
        stats,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS team_season_cache (
    cache_key   TEXT    PRIMARY KEY,
    team_id     INTEGER NOT NULL,
    season_id   INTEGER NOT NULL,
    stats_json  TEXT    NOT NULL,
    fetched_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS team_season_stats (
    team_id     INTEGER NOT NULL,
    season_id   INTEGER NOT NULL,
    team_name   TEXT    NOT NULL DEFAULT '',
    stats_json  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL,
    PRIMARY KEY (team_id, season_id)
);

CREATE INDEX IF NOT EXISTS idx_team_season_stats_season ON team_season_stats(season_id);
"#;
