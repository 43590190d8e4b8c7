use anyhow::{Context, Result};
use clap::Parser;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cache;
mod config;
mod db;
mod enrich;
mod join;
mod persist;
mod sportmonks;
mod stats;

use cache::JsonFileCache;
use config::{CacheBackend, Command, Config, EnrichArgs, JoinArgs, TeamDetailsArgs};
use db::models::TeamSeasonStats;
use db::Database;
use enrich::{EnrichSettings, Enricher};
use sportmonks::{FetchOptions, RateLimitGate, Retrier, SportmonksClient};
use stats::TypeCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    match &config.command {
        Command::Enrich(args) => run_enrich(&config, args).await,
        Command::Join(args) => run_join(&config, args),
        Command::TeamDetails(args) => run_team_details(&config, args).await,
    }
}

fn build_client(config: &Config) -> Result<SportmonksClient> {
    let token = config
        .api_token()
        .context("SPORTMONKS_API_TOKEN is required")?;
    let retrier = Retrier::new(config.retry_policy(), Arc::new(RateLimitGate::new()));
    let client = SportmonksClient::new(&config.api_url, token, config.timeout(), retrier)?;
    Ok(client.with_request_interval(config.request_interval()))
}

/// Ctrl-C stops new work; whatever is in flight finishes and gets saved.
/// A second Ctrl-C exits at once without saving.
fn spawn_interrupt_watcher(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing in-flight requests before saving (Ctrl-C again to abort)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, exiting without saving");
            std::process::exit(130);
        }
    })
}

async fn run_enrich(config: &Config, args: &EnrichArgs) -> Result<()> {
    // Everything that can fail fatally happens before the first request.
    let requests = persist::load_requests(&args.input)?;
    info!("Loaded {} team-season request(s) from {:?}", requests.len(), args.input);

    let catalog = TypeCatalog::load(Some(args.catalog.as_path()));
    let type_filter = args.type_filter_settings().resolve(&catalog);
    match type_filter.query_value() {
        None => info!("Requesting without a statistic type filter"),
        Some(_) => info!("Requesting {} statistic type(s)", type_filter.len()),
    }

    let client = build_client(config)?;
    let settings = EnrichSettings {
        force_refresh: args.force_refresh,
        concurrency: config.concurrency,
        fetch: FetchOptions {
            type_filter,
            max_fallback_pages: args.max_fallback_pages,
            retry_requests: !args.no_retry,
        },
    };
    if settings.force_refresh {
        info!("Force refresh: cached entries will be ignored");
    }
    let enricher = Enricher::new(Arc::new(client), catalog, settings);

    let cancel = CancellationToken::new();
    let watcher = spawn_interrupt_watcher(cancel.clone());

    let db = match config.cache_backend {
        CacheBackend::Json => None,
        CacheBackend::Sqlite => {
            let db = Database::open(&config.database_path)?;
            info!("Database opened: {}", config.database_path);
            Some(db)
        }
    };
    let run = match &db {
        Some(db) => enricher.process(requests, db, &cancel).await,
        None => {
            let cache = JsonFileCache::load(&config.cache_path);
            enricher.process(requests, &cache, &cancel).await
        }
    };
    watcher.abort();

    save_enrich_outputs(&args.output, &run.records, db.as_ref())?;
    info!("Done: {}", run.summary);
    Ok(())
}

/// The stats file goes to disk first, so a failing database upsert never
/// loses what the run gathered.
fn save_enrich_outputs(output: &Path, records: &[TeamSeasonStats], db: Option<&Database>) -> Result<()> {
    persist::write_stats_records(output, records)?;
    if let Some(db) = db {
        let stored = db
            .upsert_team_season_stats(records)
            .with_context(|| format!("stats written to {:?}, but the database upsert failed", output))?;
        info!("Upserted {} team-season record(s) into the database", stored);
    }
    Ok(())
}

fn run_join(config: &Config, args: &JoinArgs) -> Result<()> {
    let fixtures = persist::load_fixtures(&args.fixtures)?;
    let records = if args.from_database {
        Database::open(&config.database_path)?.list_team_season_stats()?
    } else {
        persist::load_stats_records(&args.stats)?
    };
    info!(
        "Joining {} team-season record(s) onto {} fixture(s)",
        records.len(),
        fixtures.len()
    );

    let index = join::build_index(&records);
    let (merged, injections) = join::merge(fixtures, &index);

    persist::write_json(&args.output, &merged)?;
    info!(
        "Merge complete: {} season-stat injection(s), saved to {:?}",
        injections, args.output
    );
    Ok(())
}

async fn run_team_details(config: &Config, args: &TeamDetailsArgs) -> Result<()> {
    let requests = persist::load_requests(&args.input)?;
    let mut seen = HashSet::new();
    let team_ids: Vec<i64> = requests
        .iter()
        .map(|r| r.team_id)
        .filter(|id| seen.insert(*id))
        .collect();
    info!("Looking up {} team(s)", team_ids.len());

    let client = build_client(config)?;
    let cancel = CancellationToken::new();
    let watcher = spawn_interrupt_watcher(cancel.clone());

    let client = &client;
    let cancel_ref = &cancel;
    let include = args.include.as_str();
    let locale = args.locale.as_str();
    let results: Vec<_> = stream::iter(team_ids)
        .map(move |team_id| async move {
            if cancel_ref.is_cancelled() {
                return (team_id, None);
            }
            (team_id, client.fetch_team_details(team_id, include, locale).await)
        })
        .buffered(config.concurrency)
        .collect()
        .await;
    watcher.abort();

    let total = results.len();
    let details: Vec<_> = results
        .into_iter()
        .filter_map(|(team_id, details)| {
            if details.is_none() {
                warn!("team {}: no details, skipping", team_id);
            }
            details
        })
        .collect();
    if details.len() < total {
        warn!("{} of {} team(s) had no details", total - details.len(), total);
    }

    persist::write_team_details(&args.output, &details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::FlatStats;

    fn records() -> Vec<TeamSeasonStats> {
        vec![TeamSeasonStats {
            team_id: 1,
            season_id: 10,
            team_name: "a".into(),
            stats: FlatStats::from([("goals".to_string(), 3.0)]),
        }]
    }

    #[test]
    fn test_stats_file_survives_failed_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stats.db");
        let db = Database::open(db_path.to_str().unwrap()).unwrap();
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute_batch("DROP TABLE team_season_stats;")
            .unwrap();

        let output = dir.path().join("out").join("stats.json");
        let result = save_enrich_outputs(&output, &records(), Some(&db));

        assert!(result.is_err());
        assert_eq!(persist::load_stats_records(&output).unwrap(), records());
    }

    #[test]
    fn test_outputs_without_database() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("stats.json");
        save_enrich_outputs(&output, &records(), None).unwrap();
        assert_eq!(persist::load_stats_records(&output).unwrap().len(), 1);
    }
}
