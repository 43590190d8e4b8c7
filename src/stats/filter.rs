use std::collections::BTreeSet;

use super::catalog::{TypeCatalog, STATISTIC_MODEL_TYPE};

/// Name fragments that identify home/away and half-time splits.
pub const DEFAULT_SPLIT_PATTERNS: &[&str] = &[
    "home",
    "away",
    "first-half",
    "second-half",
    "1st",
    "2nd",
    "half",
    "ht",
    "ft",
];

/// Which statistic detail types to ask the API for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    /// No filter; the API decides what to return.
    FullDetails,
    /// Restrict to these ids. Empty means no filter parameter is sent.
    Types(Vec<i64>),
}

impl TypeFilter {
    /// Value of the `filters` query parameter, if one should be sent.
    pub fn query_value(&self) -> Option<String> {
        match self {
            TypeFilter::FullDetails => None,
            TypeFilter::Types(ids) if ids.is_empty() => None,
            TypeFilter::Types(ids) => {
                let joined = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
                Some(format!("teamstatisticdetailTypes:{}", joined))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypeFilter::FullDetails => 0,
            TypeFilter::Types(ids) => ids.len(),
        }
    }
}

/// How the type filter is assembled for a run.
#[derive(Debug, Clone)]
pub struct TypeFilterSettings {
    pub full_details: bool,
    /// Explicit ids; when set, catalog-wide selection is skipped.
    pub explicit_ids: Vec<i64>,
    pub use_all_statistic_types: bool,
    pub split_patterns: Vec<String>,
}

impl Default for TypeFilterSettings {
    fn default() -> Self {
        TypeFilterSettings {
            full_details: false,
            explicit_ids: Vec::new(),
            use_all_statistic_types: true,
            split_patterns: DEFAULT_SPLIT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl TypeFilterSettings {
    /// Union of the explicit (or all statistic) ids with the split-pattern
    /// ids, sorted and deduplicated.
    ///
    /// The API has no "return everything" switch for these endpoints, so the
    /// widest filter the catalog allows is the best coverage we can get.
    pub fn resolve(&self, catalog: &TypeCatalog) -> TypeFilter {
        if self.full_details {
            return TypeFilter::FullDetails;
        }

        let mut ids: BTreeSet<i64> = self.explicit_ids.iter().copied().collect();
        if ids.is_empty() && self.use_all_statistic_types {
            ids.extend(catalog.statistic_type_ids());
        }
        ids.extend(catalog.type_ids_matching(&self.split_patterns, Some(STATISTIC_MODEL_TYPE)));

        TypeFilter::Types(ids.into_iter().collect())
    }
}
