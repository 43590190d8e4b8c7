use async_trait::async_trait;

use super::client::FetchOptions;
use crate::db::models::{RawStatDetail, TeamSeasonKey};

/// Where a set of season details came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailsOrigin {
    /// The direct team/season endpoint had values.
    Direct,
    /// Collected from the paginated team listing.
    Fallback { pages: u32 },
    /// Neither endpoint could be reached; the details are empty because of
    /// the failure, not because the season has no data.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonDetails {
    pub details: Vec<RawStatDetail>,
    pub origin: DetailsOrigin,
}

impl SeasonDetails {
    pub fn unavailable() -> Self {
        SeasonDetails {
            details: Vec::new(),
            origin: DetailsOrigin::Unavailable,
        }
    }
}

/// Source of raw team-season statistics.
///
/// Implementations never fail: an unreachable upstream is reported through
/// [`DetailsOrigin::Unavailable`].
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_season_details(&self, key: TeamSeasonKey, options: &FetchOptions) -> SeasonDetails;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
