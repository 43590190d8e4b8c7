use serde_json::Value;
use std::collections::HashMap;

use crate::db::models::{stat_value, FlatStats, TeamSeasonKey, TeamSeasonStats, MAX_EXACT_INTEGER};

pub const HOME_PREFIX: &str = "home_season_";
pub const AWAY_PREFIX: &str = "away_season_";

pub type StatsIndex = HashMap<TeamSeasonKey, FlatStats>;

/// Index stats records by (team, season). Later records replace earlier ones.
pub fn build_index(records: &[TeamSeasonStats]) -> StatsIndex {
    records.iter().map(|r| (r.key(), r.stats.clone())).collect()
}

/// Lenient id coercion for fixture fields: integers, integral floats
/// (`100.0`, as spreadsheet exports write them) and numeric strings
/// (surrounding whitespace allowed). Zero and anything else are absent.
pub fn coerce_id(v: &Value) -> Option<i64> {
    let id = match v {
        Value::Number(n) => match n.as_i64() {
            Some(id) => id,
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER)
                .map(|f| f as i64)?,
        },
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (id != 0).then_some(id)
}

/// Inject season stats into each fixture as `home_season_{k}` and
/// `away_season_{k}`, in place.
///
/// Returns the fixtures and the number of injections: one per matched side,
/// even when the matched stats are empty. Fixtures that are not objects, or
/// lack a usable season or team id, pass through untouched.
pub fn merge(mut fixtures: Vec<Value>, index: &StatsIndex) -> (Vec<Value>, usize) {
    let mut injections = 0;

    for fixture in fixtures.iter_mut() {
        let Some(fields) = fixture.as_object_mut() else {
            continue;
        };
        let Some(season_id) = fields.get("season_id").and_then(coerce_id) else {
            continue;
        };

        for (id_field, prefix) in [("home_team_id", HOME_PREFIX), ("away_team_id", AWAY_PREFIX)] {
            let Some(team_id) = fields.get(id_field).and_then(coerce_id) else {
                continue;
            };
            if let Some(stats) = index.get(&TeamSeasonKey::new(team_id, season_id)) {
                for (k, v) in stats {
                    fields.insert(format!("{}{}", prefix, k), stat_value(*v));
                }
                injections += 1;
            }
        }
    }

    (fixtures, injections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> StatsIndex {
        build_index(&[
            TeamSeasonStats {
                team_id: 1,
                season_id: 10,
                team_name: "Home".into(),
                stats: FlatStats::from([("goals".to_string(), 20.0)]),
            },
            TeamSeasonStats {
                team_id: 2,
                season_id: 10,
                team_name: "Away".into(),
                stats: FlatStats::from([
                    ("goals".to_string(), 12.0),
                    ("shots-total.home".to_string(), 8.5),
                ]),
            },
        ])
    }

    #[test]
    fn test_only_known_side_is_injected() {
        let fixtures = vec![json!({"season_id": 10, "home_team_id": 1, "away_team_id": 3})];
        let (merged, count) = merge(fixtures, &index());
        assert_eq!(count, 1);
        assert_eq!(
            merged[0],
            json!({"season_id": 10, "home_team_id": 1, "away_team_id": 3, "home_season_goals": 20})
        );
    }

    #[test]
    fn test_both_sides_with_string_season() {
        let fixtures = vec![json!({"id": 99, "season_id": " 10 ", "home_team_id": 1, "away_team_id": "2"})];
        let (merged, count) = merge(fixtures, &index());
        assert_eq!(count, 2);
        assert_eq!(merged[0]["home_season_goals"], json!(20));
        assert_eq!(merged[0]["away_season_goals"], json!(12));
        assert_eq!(merged[0]["away_season_shots-total.home"], json!(8.5));
        assert_eq!(merged[0]["id"], json!(99));
    }

    #[test]
    fn test_unusable_season_or_shape_passes_through() {
        let fixtures = vec![
            json!({"season_id": "2023/24", "home_team_id": 1}),
            json!({"season_id": null, "home_team_id": 1}),
            json!({"home_team_id": 1}),
            json!("not a fixture"),
            json!(42),
        ];
        let (merged, count) = merge(fixtures.clone(), &index());
        assert_eq!(count, 0);
        assert_eq!(merged, fixtures);
    }

    #[test]
    fn test_float_ids_from_spreadsheet_exports_match() {
        let fixtures = vec![json!({"season_id": 10.0, "home_team_id": 1.0, "away_team_id": 7})];
        let (merged, count) = merge(fixtures, &index());
        assert_eq!(count, 1);
        assert_eq!(merged[0]["home_season_goals"], json!(20));
        assert!(merged[0].get("away_season_goals").is_none());
    }

    #[test]
    fn test_matched_empty_stats_still_counts() {
        let index = build_index(&[TeamSeasonStats {
            team_id: 5,
            season_id: 10,
            team_name: String::new(),
            stats: FlatStats::new(),
        }]);
        let (merged, count) = merge(vec![json!({"season_id": 10, "home_team_id": 5})], &index);
        assert_eq!(count, 1);
        assert_eq!(merged[0], json!({"season_id": 10, "home_team_id": 5}));
    }

    #[test]
    fn test_coerce_id() {
        assert_eq!(coerce_id(&json!(12)), Some(12));
        assert_eq!(coerce_id(&json!("12")), Some(12));
        assert_eq!(coerce_id(&json!(" 12\n")), Some(12));
        assert_eq!(coerce_id(&json!(0)), None);
        assert_eq!(coerce_id(&json!(12.0)), Some(12));
        assert_eq!(coerce_id(&json!(-3.0)), Some(-3));
        assert_eq!(coerce_id(&json!(0.0)), None);
        assert_eq!(coerce_id(&json!(12.5)), None);
        assert_eq!(coerce_id(&json!(1e300)), None);
        assert_eq!(coerce_id(&json!(true)), None);
        assert_eq!(coerce_id(&json!("abc")), None);
    }
}
