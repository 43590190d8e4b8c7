//! JSON files on disk: worklists and fixtures in, stats and enriched
//! fixtures out.
//!
//! Inputs must be JSON arrays; anything else is fatal and aborts the run
//! before any network access. Individual rows that do not fit the expected
//! shape are skipped with a warning.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::db::models::{TeamDetails, TeamSeasonRequest, TeamSeasonStats};

pub fn load_requests(path: &Path) -> Result<Vec<TeamSeasonRequest>> {
    let rows = load_array(path, "team-season requests")?;
    Ok(parse_rows(rows, path, "request"))
}

pub fn load_stats_records(path: &Path) -> Result<Vec<TeamSeasonStats>> {
    let rows = load_array(path, "team-season stats")?;
    Ok(parse_rows(rows, path, "stats record"))
}

/// Fixtures are kept as raw JSON so unknown fields survive the merge.
pub fn load_fixtures(path: &Path) -> Result<Vec<Value>> {
    load_array(path, "fixtures")
}

pub fn write_stats_records(path: &Path, records: &[TeamSeasonStats]) -> Result<()> {
    write_json(path, records)?;
    info!("Wrote {} team-season record(s) to {:?}", records.len(), path);
    Ok(())
}

pub fn write_team_details(path: &Path, details: &[TeamDetails]) -> Result<()> {
    write_json(path, details)?;
    info!("Wrote {} team profile(s) to {:?}", details.len(), path);
    Ok(())
}

/// Pretty-printed JSON, written atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).with_context(|| format!("serialize {:?}", path))?;
    write_atomic(path, json.as_bytes())
}

/// Write to a sibling temp file, then rename over `path`. Parent
/// directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create directory {:?}", dir))?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes).with_context(|| format!("write {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("move {:?} into place", path))?;
    Ok(())
}

fn load_array(path: &Path, what: &str) -> Result<Vec<Value>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {} from {:?}", what, path))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {} in {:?}", what, path))?;
    match value {
        Value::Array(rows) => Ok(rows),
        other => bail!(
            "{:?} must contain a JSON array of {}, found {}",
            path,
            what,
            json_kind(&other)
        ),
    }
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, path: &Path, what: &str) -> Vec<T> {
    let total = rows.len();
    let parsed: Vec<T> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(i, row)| match serde_json::from_value(row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping {} #{} in {:?}: {}", what, i, path, e);
                None
            }
        })
        .collect();
    if parsed.len() < total {
        warn!("{} of {} {}(s) in {:?} were malformed", total - parsed.len(), total, what, path);
    }
    parsed
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
