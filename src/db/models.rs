use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Flattened statistics for one team in one season.
///
/// Keys are open-ended (`"shots-total"`, `"shots-total.home"`, ...) because
/// both the type catalog and the remote schema can grow without notice.
pub type FlatStats = BTreeMap<String, f64>;

/// Largest magnitude below which every integer is exact in an `f64`.
pub const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// JSON form of one stat: counts are written as integers (`15`, not `15.0`).
pub fn stat_value(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < MAX_EXACT_INTEGER {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

/// Serializes a [`FlatStats`] map with [`stat_value`] applied to every entry.
pub struct StatsJson<'a>(pub &'a FlatStats);

impl Serialize for StatsJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, stat_value(*v))))
    }
}

fn serialize_stats<S: Serializer>(stats: &FlatStats, serializer: S) -> Result<S::Ok, S::Error> {
    StatsJson(stats).serialize(serializer)
}

/// Identity of one team's performance in one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamSeasonKey {
    pub team_id: i64,
    pub season_id: i64,
}

impl TeamSeasonKey {
    pub fn new(team_id: i64, season_id: i64) -> Self {
        TeamSeasonKey { team_id, season_id }
    }

    /// Canonical cache key, `"{team_id}:{season_id}"`.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TeamSeasonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.team_id, self.season_id)
    }
}

impl FromStr for TeamSeasonKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (team, season) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("cache key '{}' is not in team:season form", s))?;
        Ok(TeamSeasonKey {
            team_id: team.trim().parse()?,
            season_id: season.trim().parse()?,
        })
    }
}

/// One "team to enrich" entry, produced upstream by scanning raw fixtures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeasonRequest {
    pub team_id: i64,
    pub season_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    /// Older worklists carry the team name under `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// "home" | "away" at the time the team was discovered (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TeamSeasonRequest {
    pub fn key(&self) -> TeamSeasonKey {
        TeamSeasonKey::new(self.team_id, self.season_id)
    }

    /// Team name as recorded in the worklist, or an empty string.
    pub fn display_name(&self) -> &str {
        self.team_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.name.as_deref())
            .unwrap_or("")
    }
}

/// One statistic entry as returned by the remote API.
///
/// `value` is kept as raw JSON: it can be a bare number, a mapping of
/// sub-metrics, or something unexpected that the flattener will drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStatDetail {
    pub type_id: i64,
    #[serde(default)]
    pub value: Value,
}

impl RawStatDetail {
    pub fn new(type_id: i64, value: Value) -> Self {
        RawStatDetail { type_id, value }
    }

    /// Lenient parse of a single `details[]` item. Entries without an
    /// integer `type_id` are malformed and yield `None`.
    pub fn from_json(item: &Value) -> Option<Self> {
        let type_id = item.get("type_id")?.as_i64()?;
        Some(RawStatDetail {
            type_id,
            value: item.get("value").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Parse a `details` array, dropping malformed entries.
pub fn parse_details(raw: &Value) -> Vec<RawStatDetail> {
    raw.as_array()
        .map(|items| items.iter().filter_map(RawStatDetail::from_json).collect())
        .unwrap_or_default()
}

/// Output record: flattened stats for one (team, season).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeasonStats {
    pub team_id: i64,
    pub season_id: i64,
    #[serde(default)]
    pub team_name: String,
    #[serde(default, serialize_with = "serialize_stats")]
    pub stats: FlatStats,
}

impl TeamSeasonStats {
    pub fn key(&self) -> TeamSeasonKey {
        TeamSeasonKey::new(self.team_id, self.season_id)
    }
}

/// Team profile returned by the team-details lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamDetails {
    pub team_id: Option<i64>,
    pub name: Option<String>,
    pub short_code: Option<String>,
    pub image_path: Option<String>,
    pub founded: Option<i64>,
    /// "domestic" | "national"
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub placeholder: bool,
    pub country: Option<Country>,
    pub venue: Option<Venue>,
    pub coach: Option<Coach>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub capacity: Option<i64>,
    pub image_path: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coach {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub nationality: Option<String>,
    pub image_path: Option<String>,
}

impl TeamDetails {
    /// Reduce the raw `data` object of `/teams/{id}` to the fields we keep.
    pub fn from_api(data: &Value) -> Self {
        let country = non_empty_object(&data["country"]).map(|c| Country {
            id: c["id"].as_i64(),
            name: str_field(c, "name"),
            image_path: str_field(c, "image_path"),
        });
        let venue = non_empty_object(&data["venue"]).map(|v| Venue {
            id: v["id"].as_i64(),
            name: str_field(v, "name"),
            city: str_field(v, "city_name"),
            capacity: v["capacity"].as_i64(),
            image_path: str_field(v, "image_path"),
            address: str_field(v, "address"),
        });
        let coach = non_empty_object(&data["coach"]).map(|c| Coach {
            id: c["id"].as_i64(),
            name: str_field(c, "common_name").or_else(|| str_field(c, "display_name")),
            full_name: str_field(c, "display_name"),
            nationality: str_field(c, "nationality"),
            image_path: str_field(c, "image_path"),
        });

        TeamDetails {
            team_id: data["id"].as_i64(),
            name: str_field(data, "name"),
            short_code: str_field(data, "short_code"),
            image_path: str_field(data, "image_path"),
            founded: data["founded"].as_i64(),
            kind: str_field(data, "type"),
            placeholder: data["placeholder"].as_bool().unwrap_or(false),
            country,
            venue,
            coach,
        }
    }
}

fn non_empty_object(v: &Value) -> Option<&Value> {
    match v.as_object() {
        Some(map) if !map.is_empty() => Some(v),
        _ => None,
    }
}

fn str_field(v: &Value, field: &str) -> Option<String> {
    v[field].as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integral_stats_serialize_as_integers() {
        let record = TeamSeasonStats {
            team_id: 1,
            season_id: 2,
            team_name: "a".into(),
            stats: FlatStats::from([
                ("goals".to_string(), 15.0),
                ("ball-possession".to_string(), 56.5),
                ("cleansheets".to_string(), -0.0),
            ]),
        };
        let raw = serde_json::to_string(&record).unwrap();
        assert!(raw.contains(r#""goals":15,"#) || raw.contains(r#""goals":15}"#));
        assert!(raw.contains(r#""ball-possession":56.5"#));

        let back: TeamSeasonStats = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, record);
        assert_eq!(stat_value(1e20), json!(1e20));
    }

    #[test]
    fn test_cache_key_round_trips_through_display() {
        let key = TeamSeasonKey::new(3169, 25673);
        assert_eq!(key.cache_key(), "3169:25673");
        assert_eq!("3169:25673".parse::<TeamSeasonKey>().unwrap(), key);
        assert!("3169-25673".parse::<TeamSeasonKey>().is_err());
        assert!("abc:1".parse::<TeamSeasonKey>().is_err());
    }

    #[test]
    fn test_request_name_falls_back_to_legacy_field() {
        let req: TeamSeasonRequest = serde_json::from_value(json!({
            "team_id": 1, "season_id": 2, "name": "Albacete", "location": "away"
        }))
        .unwrap();
        assert_eq!(req.display_name(), "Albacete");
        assert_eq!(req.key(), TeamSeasonKey::new(1, 2));

        let bare: TeamSeasonRequest =
            serde_json::from_value(json!({"team_id": 1, "season_id": 2})).unwrap();
        assert_eq!(bare.display_name(), "");
    }

    #[test]
    fn test_parse_details_drops_entries_without_type_id() {
        let raw = json!([
            {"type_id": 42, "value": {"total": 15}},
            {"value": 3},
            {"type_id": "52", "value": 1},
            {"type_id": 86}
        ]);
        let details = parse_details(&raw);
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].type_id, 42);
        assert_eq!(details[1], RawStatDetail::new(86, Value::Null));
        assert!(parse_details(&json!(null)).is_empty());
    }

    #[test]
    fn test_team_details_from_api() {
        let data = json!({
            "id": 3169,
            "name": "Albacete",
            "short_code": "ALB",
            "founded": 1940,
            "type": "domestic",
            "country": {"id": 32, "name": "Spain", "image_path": "es.png"},
            "venue": {"id": 7, "name": "Carlos Belmonte", "city_name": "Albacete", "capacity": 17524},
            "coach": {"id": 9, "display_name": "Alberto González", "nationality": "Spain"}
        });
        let details = TeamDetails::from_api(&data);
        assert_eq!(details.team_id, Some(3169));
        assert_eq!(details.kind.as_deref(), Some("domestic"));
        assert!(!details.placeholder);
        assert_eq!(details.venue.as_ref().unwrap().city.as_deref(), Some("Albacete"));
        let coach = details.coach.unwrap();
        assert_eq!(coach.name.as_deref(), Some("Alberto González"));
        assert_eq!(coach.full_name.as_deref(), Some("Alberto González"));

        let bare = TeamDetails::from_api(&json!({"id": 1, "country": {}}));
        assert!(bare.country.is_none());
        assert!(bare.venue.is_none());
    }
}
