use serde_json::{Map, Value};

use super::catalog::TypeCatalog;
use crate::db::models::{FlatStats, RawStatDetail};

/// Sub-keys probed, in order, for the aggregate value when `total` is absent.
const AGGREGATE_FALLBACKS: [&str; 6] = ["average", "goals", "in", "out", "highest", "lowest"];

/// Flatten raw statistic details into a single-level numeric map.
///
/// With `name = catalog.name(type_id)`:
/// - a numeric `value` becomes `name`;
/// - a mapping becomes `name.subkey` for each numeric sub-value, plus an
///   aggregate `name` taken from `total`, else the first numeric of
///   [`AGGREGATE_FALLBACKS`]; no aggregate when none is present;
/// - any other shape is skipped.
///
/// Details are applied in order, so two details deriving the same key keep
/// the later value.
pub fn flatten(details: &[RawStatDetail], catalog: &TypeCatalog) -> FlatStats {
    let mut flat = FlatStats::new();

    for detail in details {
        let name = catalog.name(detail.type_id);
        match &detail.value {
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    flat.insert(name.into_owned(), v);
                }
            }
            Value::Object(fields) => {
                for (subkey, sub) in fields {
                    if let Some(v) = numeric(sub) {
                        flat.insert(format!("{}.{}", name, subkey), v);
                    }
                }
                if let Some(v) = aggregate(fields) {
                    flat.insert(name.into_owned(), v);
                }
            }
            _ => {}
        }
    }

    flat
}

fn aggregate(fields: &Map<String, Value>) -> Option<f64> {
    fields.get("total").and_then(numeric).or_else(|| {
        AGGREGATE_FALLBACKS
            .iter()
            .find_map(|k| fields.get(*k).and_then(numeric))
    })
}

// JSON booleans are not numbers, unlike in some dynamic languages.
fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
