use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::sportmonks::client::{DEFAULT_API_URL, DEFAULT_LOCALE, DEFAULT_TEAM_INCLUDE};
use crate::sportmonks::RetryPolicy;
use crate::stats::filter::DEFAULT_SPLIT_PATTERNS;
use crate::stats::TypeFilterSettings;

/// SportMonks team-season statistics: fetch, flatten, cache and join onto fixtures
#[derive(Parser, Debug, Clone)]
#[command(name = "season-stats", version, about)]
pub struct Config {
    /// SportMonks API token (required by `enrich` and `team-details`)
    #[arg(long, env = "SPORTMONKS_API_TOKEN", global = true, hide_env_values = true)]
    pub api_token: Option<String>,

    /// SportMonks football API base URL
    #[arg(long, env = "SPORTMONKS_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Per-request HTTP timeout (seconds)
    #[arg(long, env = "TIMEOUT_SECS", default_value = "8", global = true)]
    pub timeout_secs: u64,

    /// Attempts per request on timeouts, transport errors and 5xx
    #[arg(long, env = "MAX_RETRIES", default_value = "3", global = true)]
    pub max_retries: u32,

    /// Rate-limit (429) cooldowns allowed per request; defaults to --max-retries
    #[arg(long, env = "MAX_RATE_LIMIT_WAITS", global = true)]
    pub max_rate_limit_waits: Option<u32>,

    /// Base delay of the exponential backoff (milliseconds)
    #[arg(long, env = "BACKOFF_BASE_MS", default_value = "1000", global = true)]
    pub backoff_base_ms: u64,

    /// Team-seasons fetched concurrently
    #[arg(long, env = "CONCURRENCY", default_value = "4", global = true)]
    pub concurrency: usize,

    /// Minimum spacing between request starts, across all workers (milliseconds; 0 = unpaced)
    #[arg(long, env = "REQUEST_INTERVAL_MS", default_value = "0", global = true)]
    pub request_interval_ms: u64,

    /// Where cached team-season stats live
    #[arg(long, env = "CACHE_BACKEND", value_enum, default_value_t = CacheBackend::Json, global = true)]
    pub cache_backend: CacheBackend,

    /// JSON cache file (json backend)
    #[arg(
        long,
        env = "CACHE_PATH",
        default_value = "output/cache_team_season.json",
        global = true
    )]
    pub cache_path: PathBuf,

    /// SQLite database path (sqlite backend)
    #[arg(long, env = "DATABASE_PATH", default_value = "season_stats.db", global = true)]
    pub database_path: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch, flatten and cache stats for every team-season in a worklist
    Enrich(EnrichArgs),
    /// Inject season stats into fixtures as home_season_* / away_season_*
    Join(JoinArgs),
    /// Look up team profiles for every team in a worklist
    TeamDetails(TeamDetailsArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    Json,
    Sqlite,
}

#[derive(Args, Debug, Clone)]
pub struct EnrichArgs {
    /// JSON array of {team_id, season_id, team_name, location}
    #[arg(long, default_value = "output/teams_to_enrich.json")]
    pub input: PathBuf,

    /// Where to write the flattened stats records
    #[arg(long, default_value = "output/teams_season_stats.json")]
    pub output: PathBuf,

    /// Statistic type catalog ({"data": [{id, code, model_type}]}); built-in names are used when missing
    #[arg(long, env = "TYPE_CATALOG_PATH", default_value = "json/core_types_all_pages.json")]
    pub catalog: PathBuf,

    /// Send no type filter and take whatever the API returns
    #[arg(long)]
    pub full_details: bool,

    /// Explicit statistic type ids to request (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub type_ids: Vec<i64>,

    /// Do not request every statistic type listed in the catalog
    #[arg(long)]
    pub no_all_statistic_types: bool,

    /// Name fragments selecting home/away and half splits (comma separated)
    #[arg(long, value_delimiter = ',', default_values_t = default_split_patterns())]
    pub split_patterns: Vec<String>,

    /// Ignore cached entries and fetch everything again
    #[arg(long, env = "FORCE_REFRESH")]
    pub force_refresh: bool,

    /// Listing pages read when the direct season endpoint has no values
    #[arg(long, default_value = "2")]
    pub max_fallback_pages: u32,

    /// One attempt per stats request instead of the retry policy
    #[arg(long)]
    pub no_retry: bool,
}

fn default_split_patterns() -> Vec<String> {
    DEFAULT_SPLIT_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl EnrichArgs {
    pub fn type_filter_settings(&self) -> TypeFilterSettings {
        TypeFilterSettings {
            full_details: self.full_details,
            explicit_ids: self.type_ids.clone(),
            use_all_statistic_types: !self.no_all_statistic_types,
            split_patterns: self.split_patterns.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct JoinArgs {
    /// JSON array of fixtures with season_id, home_team_id, away_team_id
    #[arg(long, default_value = "output/fixtures_expandidos.json")]
    pub fixtures: PathBuf,

    /// Stats records written by `enrich`
    #[arg(long, default_value = "output/teams_season_stats.json")]
    pub stats: PathBuf,

    /// Read stats records from the SQLite database instead of --stats
    #[arg(long)]
    pub from_database: bool,

    #[arg(long, default_value = "output/fixtures_expandidos_enriched.json")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct TeamDetailsArgs {
    /// Worklist to take team ids from
    #[arg(long, default_value = "output/teams_to_enrich.json")]
    pub input: PathBuf,

    #[arg(long, default_value = "output/teams_details.json")]
    pub output: PathBuf,

    /// Related resources to include
    #[arg(long, default_value = DEFAULT_TEAM_INCLUDE)]
    pub include: String,

    /// Response language
    #[arg(long, default_value = DEFAULT_LOCALE)]
    pub locale: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let needs_token = matches!(self.command, Command::Enrich(_) | Command::TeamDetails(_));
        if needs_token && self.api_token().is_none() {
            anyhow::bail!("SPORTMONKS_API_TOKEN is required (set it in the environment or pass --api-token)");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be positive");
        }
        if !(1..=10).contains(&self.max_retries) {
            anyhow::bail!("max_retries must be between 1 and 10");
        }
        if self.max_rate_limit_waits.is_some_and(|w| w > 20) {
            anyhow::bail!("max_rate_limit_waits must be at most 20");
        }
        if !(1..=64).contains(&self.concurrency) {
            anyhow::bail!("concurrency must be between 1 and 64");
        }
        if let Command::Enrich(args) = &self.command {
            if args.max_fallback_pages > 100 {
                anyhow::bail!("max_fallback_pages must be at most 100");
            }
            if args.full_details && !args.type_ids.is_empty() {
                anyhow::bail!("--full-details and --type-ids are mutually exclusive");
            }
        }
        Ok(())
    }

    /// Token with surrounding whitespace removed; blank counts as missing.
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            max_rate_limit_waits: self.max_rate_limit_waits.unwrap_or(self.max_retries),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            ..RetryPolicy::default()
        }
    }
}
