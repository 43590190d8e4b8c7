use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::db::models::{FlatStats, TeamSeasonRequest, TeamSeasonStats};
use crate::sportmonks::{DetailsOrigin, FetchOptions, StatsSource};
use crate::stats::{flatten, TypeCatalog};

/// Drop repeated (team, season) pairs, keeping the first occurrence and its
/// metadata. Returns the unique requests in first-seen order and the number
/// of duplicates removed.
pub fn dedup_requests(requests: Vec<TeamSeasonRequest>) -> (Vec<TeamSeasonRequest>, usize) {
    let total = requests.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<_> = requests.into_iter().filter(|r| seen.insert(r.key())).collect();
    let duplicates = total - unique.len();
    (unique, duplicates)
}

#[derive(Debug, Clone)]
pub struct EnrichSettings {
    /// Ignore cached entries and fetch everything again.
    pub force_refresh: bool,
    /// Number of keys fetched concurrently.
    pub concurrency: usize,
    pub fetch: FetchOptions,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        EnrichSettings {
            force_refresh: false,
            concurrency: 4,
            fetch: FetchOptions::default(),
        }
    }
}

/// Per-run counters, logged when a run finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub requested: usize,
    pub unique: usize,
    pub duplicates: usize,
    /// Served from the cache.
    pub cached: usize,
    /// Fetched with at least one stat.
    pub fetched: usize,
    /// Fetched, but the season has no stats.
    pub empty: usize,
    /// Upstream unreachable; recorded with empty stats and not cached.
    pub unavailable: usize,
    /// Not attempted because the run was cancelled.
    pub skipped: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested, {} unique ({} duplicates): {} cached, {} fetched, {} empty, {} unavailable, {} skipped",
            self.requested,
            self.unique,
            self.duplicates,
            self.cached,
            self.fetched,
            self.empty,
            self.unavailable,
            self.skipped
        )
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentRun {
    /// One record per processed key, in first-seen order.
    pub records: Vec<TeamSeasonStats>,
    pub summary: RunSummary,
}

enum Outcome {
    Cached(FlatStats),
    Fetched(FlatStats),
    Unavailable,
    Skipped,
}

/// Resolves team-season worklists into flattened stats:
/// cache first, then the remote source, then the flattener.
pub struct Enricher {
    source: Arc<dyn StatsSource>,
    catalog: TypeCatalog,
    settings: EnrichSettings,
}

impl Enricher {
    pub fn new(source: Arc<dyn StatsSource>, catalog: TypeCatalog, settings: EnrichSettings) -> Self {
        Enricher {
            source,
            catalog,
            settings,
        }
    }

    /// Process a worklist.
    ///
    /// Lookups and fetches run on a bounded pool, but results are consumed
    /// here in input order, and this loop is the only place that writes to
    /// `cache`. Once `cancel` fires, keys that still need a fetch are skipped;
    /// requests already in flight finish and are cached. The cache is
    /// flushed before returning.
    pub async fn process(
        &self,
        requests: Vec<TeamSeasonRequest>,
        cache: &dyn CacheStore,
        cancel: &CancellationToken,
    ) -> EnrichmentRun {
        let requested = requests.len();
        let (unique, duplicates) = dedup_requests(requests);
        let mut summary = RunSummary {
            requested,
            unique: unique.len(),
            duplicates,
            ..Default::default()
        };
        info!(
            "Processing {} team-season(s) ({} duplicates dropped) via {}",
            summary.unique,
            duplicates,
            self.source.name()
        );

        let total = unique.len();
        let source = self.source.as_ref();
        let catalog = &self.catalog;
        let settings = &self.settings;

        let mut results = stream::iter(unique.into_iter().enumerate())
            .map(move |(idx, request)| async move {
                let key = request.key();
                if !settings.force_refresh {
                    if let Some(stats) = cache.get(&key) {
                        debug!("[{}/{}] {}: cache hit", idx + 1, total, key);
                        return (request, Outcome::Cached(stats));
                    }
                }
                if cancel.is_cancelled() {
                    return (request, Outcome::Skipped);
                }

                let season = source.fetch_season_details(key, &settings.fetch).await;
                let via = match season.origin {
                    DetailsOrigin::Unavailable => return (request, Outcome::Unavailable),
                    DetailsOrigin::Direct => "season endpoint".to_string(),
                    DetailsOrigin::Fallback { pages } => format!("{} listing page(s)", pages),
                };
                let stats = flatten(&season.details, catalog);
                info!(
                    "[{}/{}] team {} ({}) season {}: {} stats from {}",
                    idx + 1,
                    total,
                    key.team_id,
                    request.display_name(),
                    key.season_id,
                    stats.len(),
                    via
                );
                (request, Outcome::Fetched(stats))
            })
            .buffered(settings.concurrency.max(1));

        let mut records = Vec::with_capacity(total);
        while let Some((request, outcome)) = results.next().await {
            let key = request.key();
            let stats = match outcome {
                Outcome::Cached(stats) => {
                    summary.cached += 1;
                    stats
                }
                Outcome::Fetched(stats) => {
                    if stats.is_empty() {
                        summary.empty += 1;
                    } else {
                        summary.fetched += 1;
                    }
                    if let Err(e) = cache.put(key, &stats) {
                        warn!("team {} season {}: failed to cache stats: {:#}", key.team_id, key.season_id, e);
                    }
                    stats
                }
                Outcome::Unavailable => {
                    summary.unavailable += 1;
                    warn!(
                        "team {} season {}: no stats (upstream unavailable), will retry next run",
                        key.team_id, key.season_id
                    );
                    FlatStats::new()
                }
                Outcome::Skipped => {
                    summary.skipped += 1;
                    continue;
                }
            };
            records.push(TeamSeasonStats {
                team_id: key.team_id,
                season_id: key.season_id,
                team_name: request.display_name().to_string(),
                stats,
            });
        }

        if summary.skipped > 0 {
            warn!("Run cancelled, {} team-season(s) skipped", summary.skipped);
        }
        if let Err(e) = cache.flush() {
            warn!("Failed to flush stats cache: {:#}", e);
        }
        info!("Enrichment finished: {}", summary);

        EnrichmentRun { records, summary }
    }
}
