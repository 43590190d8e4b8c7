//! Statistic type catalog: `type_id` → canonical hyphenated name.
//!
//! Built from a small built-in table plus the optional SportMonks
//! `core/types` dump (`{"data": [{id, code, developer_name, name, model_type}]}`).
//! Entries from the dump override built-ins. Unknown ids resolve to their
//! decimal string so flattening never fails on a new type.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Baseline names for the statistic types we always care about.
const BUILTIN_TYPES: &[(i64, &str)] = &[
    (41, "shots-off-target"),
    (42, "shots-total"),
    (86, "shots-on-target"),
    (49, "shots-insidebox"),
    (50, "shots-outsidebox"),
    (58, "shots-blocked"),
    (53, "goals-kicks"),
    (54, "goal-attempts"),
    (64, "hit-woodwork"),
    (580, "big-chances-created"),
    (581, "big-chances-missed"),
    (43, "attacks"),
    (44, "dangerous-attacks"),
    (45, "ball-possession"),
    (80, "passes"),
    (81, "successful-passes"),
    (82, "successful-passes-percentage"),
    (116, "accurate-passes"),
    (117, "key-passes"),
    (62, "long-passes"),
    (63, "short-passes"),
    (122, "long-balls"),
    (123, "long-balls-won"),
    (124, "through-balls"),
    (125, "through-balls-won"),
    (98, "total-crosses"),
    (99, "accurate-crosses"),
    (78, "tackles"),
    (106, "duels-won"),
    (107, "aeriels-won"),
    (100, "interceptions"),
    (101, "clearances"),
    (102, "clearances-won"),
    (65, "successful-headers"),
    (105, "total-duels"),
    (84, "yellowcards"),
    (83, "redcards"),
    (85, "yellowred-cards"),
    (56, "fouls"),
    (51, "offsides"),
    (60, "throwins"),
    (34, "corners"),
    (55, "free-kicks"),
    (59, "substitutions"),
    (57, "saves"),
    (104, "saves-insidebox"),
    (103, "punches"),
    (79, "assists"),
    (87, "injuries"),
    (47, "penalties"),
    (46, "ball-safe"),
    (70, "headers"),
    (118, "rating"),
    (120, "touches"),
    (32, "probability"),
    (33, "valuebet"),
    (5304, "expected-goals"),
    (5305, "expected-goals-on-target"),
    (7939, "expected-points"),
    (7943, "expected-non-penalty-goals"),
    (7945, "expected-goals-open-play"),
    (7944, "expected-goals-set-play"),
    (7942, "expected-goals-corners"),
    (7941, "expected-goals-free-kicks"),
    (7940, "expected-goals-penalties"),
    (1584, "accurate-passes-percentage"),
    (1605, "successful-dribbles-percentage"),
];

/// Model type of the catalog rows that describe team/player statistics.
pub const STATISTIC_MODEL_TYPE: &str = "statistic";

/// One row of the external `core/types` catalog.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogEntry {
    pub id: i64,
    pub code: Option<String>,
    pub developer_name: Option<String>,
    pub name: Option<String>,
    pub model_type: Option<String>,
}

impl CatalogEntry {
    /// Canonical name from `code`, then `developer_name`, then `name`.
    pub fn canonical_name(&self) -> Option<String> {
        [&self.code, &self.developer_name, &self.name]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(normalize_code)
    }

    fn search_text(&self) -> String {
        [&self.code, &self.name, &self.developer_name]
            .into_iter()
            .map(|s| s.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    fn from_json(item: &Value) -> Option<Self> {
        let id = item["id"]
            .as_i64()
            .or_else(|| item["id"].as_str().and_then(|s| s.trim().parse().ok()))?;
        let text = |field: &str| item[field].as_str().map(str::to_string);
        Some(CatalogEntry {
            id,
            code: text("code"),
            developer_name: text("developer_name"),
            name: text("name"),
            model_type: text("model_type"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    data: Vec<Value>,
}

/// `"GOALS_SCORED"` → `"goals-scored"`, `"Ball Possession"` → `"ball-possession"`.
pub fn normalize_code(code: &str) -> String {
    code.trim().replace([' ', '_'], "-").to_lowercase()
}

/// Resolves statistic type ids to names. Constructed once per run and passed
/// to whoever needs it.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    names: HashMap<i64, String>,
    /// Rows of the external catalog, kept for type-filter selection.
    entries: Vec<CatalogEntry>,
}

impl TypeCatalog {
    /// A catalog with no names at all; every id resolves to itself.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        TypeCatalog {
            names: BUILTIN_TYPES
                .iter()
                .map(|(id, name)| (*id, name.to_string()))
                .collect(),
            entries: Vec::new(),
        }
    }

    /// Built-in table overlaid with external entries (external wins).
    pub fn with_external(entries: Vec<CatalogEntry>) -> Self {
        let mut catalog = Self::builtin();
        for entry in &entries {
            if let Some(name) = entry.canonical_name() {
                catalog.names.insert(entry.id, name);
            }
        }
        catalog.entries = entries;
        catalog
    }

    /// Build the run catalog. Without a path, or when the file is missing or
    /// unreadable, only the built-in table is used.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No type catalog configured, using {} built-in types", BUILTIN_TYPES.len());
            return Self::builtin();
        };
        match Self::read_entries(path) {
            Ok(entries) => {
                let catalog = Self::with_external(entries);
                info!(
                    "Loaded type catalog from {:?} ({} external rows, {} names)",
                    path,
                    catalog.entries.len(),
                    catalog.len()
                );
                catalog
            }
            Err(e) => {
                warn!("Type catalog unavailable ({:#}); using built-in types only", e);
                Self::builtin()
            }
        }
    }

    /// Read the external catalog rows. Rows without a usable id are skipped.
    pub fn read_entries(path: &Path) -> Result<Vec<CatalogEntry>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read type catalog {:?}", path))?;
        Self::parse_entries(&raw)
    }

    pub fn parse_entries(raw: &str) -> Result<Vec<CatalogEntry>> {
        let file: CatalogFile =
            serde_json::from_str(raw).context("type catalog is not a {\"data\": [...]} object")?;
        Ok(file.data.iter().filter_map(CatalogEntry::from_json).collect())
    }

    /// Resolved name, or the stringified id for unknown types.
    pub fn name(&self, type_id: i64) -> Cow<'_, str> {
        match self.names.get(&type_id) {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(type_id.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Every external id whose `model_type` is `statistic`, sorted.
    pub fn statistic_type_ids(&self) -> Vec<i64> {
        let ids: BTreeSet<i64> = self
            .entries
            .iter()
            .filter(|e| e.model_type.as_deref() == Some(STATISTIC_MODEL_TYPE))
            .map(|e| e.id)
            .collect();
        ids.into_iter().collect()
    }

    /// External ids whose code/name/developer_name contains any pattern
    /// (case-insensitive), optionally restricted to one `model_type`.
    pub fn type_ids_matching(&self, patterns: &[String], model_type: Option<&str>) -> Vec<i64> {
        if patterns.is_empty() {
            return Vec::new();
        }
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
        let ids: BTreeSet<i64> = self
            .entries
            .iter()
            .filter(|e| model_type.map_or(true, |mt| e.model_type.as_deref() == Some(mt)))
            .filter(|e| {
                let text = e.search_text();
                patterns.iter().any(|p| text.contains(p.as_str()))
            })
            .map(|e| e.id)
            .collect();
        ids.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<(i64, S)> for TypeCatalog {
    fn from_iter<I: IntoIterator<Item = (i64, S)>>(iter: I) -> Self {
        TypeCatalog {
            names: iter.into_iter().map(|(id, name)| (id, name.into())).collect(),
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_JSON: &str = r#"{
        "data": [
            {"id": 42, "code": "SHOTS_TOTAL_OVERRIDE", "name": "Shots", "model_type": "statistic"},
            {"id": 9000, "developer_name": "GOALS_HOME", "model_type": "statistic"},
            {"id": "9001", "name": "First Half Corners", "model_type": "statistic"},
            {"id": 9002, "code": "home-formation", "model_type": "lineup"},
            {"id": 9003, "code": "", "name": "  ", "model_type": "statistic"},
            {"code": "NO_ID"}
        ]
    }"#;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("GOALS_SCORED"), "goals-scored");
        assert_eq!(normalize_code(" Ball Possession "), "ball-possession");
        assert_eq!(normalize_code("shots-total"), "shots-total");
    }

    #[test]
    fn test_unknown_type_falls_back_to_id() {
        let catalog = TypeCatalog::empty();
        assert_eq!(catalog.name(52), "52");
        assert_eq!(TypeCatalog::builtin().name(45), "ball-possession");
        assert_eq!(TypeCatalog::builtin().name(-1), "-1");
    }

    #[test]
    fn test_external_entries_override_builtin() {
        let entries = TypeCatalog::parse_entries(CATALOG_JSON).unwrap();
        assert_eq!(entries.len(), 5);
        let catalog = TypeCatalog::with_external(entries);
        assert_eq!(catalog.name(42), "shots-total-override");
        assert_eq!(catalog.name(9000), "goals-home");
        assert_eq!(catalog.name(9001), "first-half-corners");
        // Blank names do not shadow the id fallback.
        assert_eq!(catalog.name(9003), "9003");
        // Untouched built-ins survive.
        assert_eq!(catalog.name(86), "shots-on-target");
    }

    #[test]
    fn test_statistic_ids_and_pattern_selection() {
        let catalog = TypeCatalog::with_external(TypeCatalog::parse_entries(CATALOG_JSON).unwrap());
        assert_eq!(catalog.statistic_type_ids(), vec![42, 9000, 9001, 9003]);

        let patterns = vec!["HOME".to_string(), "half".to_string()];
        assert_eq!(
            catalog.type_ids_matching(&patterns, Some(STATISTIC_MODEL_TYPE)),
            vec![9000, 9001]
        );
        assert_eq!(catalog.type_ids_matching(&patterns, None), vec![9000, 9001, 9002]);
        assert!(catalog.type_ids_matching(&[], None).is_empty());
    }

    #[test]
    fn test_load_degrades_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TypeCatalog::load(Some(dir.path().join("missing.json").as_path()));
        assert_eq!(missing.len(), BUILTIN_TYPES.len());

        let corrupt_path = dir.path().join("corrupt.json");
        std::fs::write(&corrupt_path, "[1, 2").unwrap();
        let corrupt = TypeCatalog::load(Some(corrupt_path.as_path()));
        assert_eq!(corrupt.name(42), "shots-total");
        assert!(corrupt.statistic_type_ids().is_empty());

        assert_eq!(TypeCatalog::load(None).len(), BUILTIN_TYPES.len());
    }

    #[test]
    fn test_from_iter() {
        let catalog: TypeCatalog = [(42, "shots-total")].into_iter().collect();
        assert_eq!(catalog.name(42), "shots-total");
        assert_eq!(catalog.len(), 1);
    }
}
