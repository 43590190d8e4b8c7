use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::error::FetchError;
use super::provider::{DetailsOrigin, SeasonDetails, StatsSource};
use super::retry::Retrier;
use crate::db::models::{parse_details, RawStatDetail, TeamDetails, TeamSeasonKey};
use crate::stats::TypeFilter;

pub const DEFAULT_API_URL: &str = "https://api.sportmonks.com/v3/football";
/// Page size requested from the per-team season listing.
pub const FALLBACK_PAGE_SIZE: u32 = 25;
pub const DEFAULT_TEAM_INCLUDE: &str = "country,venue,coach,sidelined";
pub const DEFAULT_LOCALE: &str = "pt";

type QueryParams = Vec<(&'static str, String)>;

/// Spaces out request starts across every worker sharing the client.
type RequestPacer = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Per-run knobs for statistics requests.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub type_filter: TypeFilter,
    /// Upper bound on listing pages read when the direct endpoint misses.
    pub max_fallback_pages: u32,
    /// Wrap every request in the retry controller. Off means one attempt
    /// per request (the shared rate-limit cooldown still applies).
    pub retry_requests: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            type_filter: TypeFilter::FullDetails,
            max_fallback_pages: 2,
            retry_requests: true,
        }
    }
}

/// Client for the SportMonks v3 football API.
#[derive(Clone)]
pub struct SportmonksClient {
    http: Client,
    base_url: String,
    api_token: String,
    retrier: Retrier,
    pacer: Option<Arc<RequestPacer>>,
}

impl SportmonksClient {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration, retrier: Retrier) -> Result<Self> {
        let parsed = Url::parse(base_url).with_context(|| format!("Invalid API URL '{}'", base_url))?;
        if parsed.cannot_be_a_base() {
            anyhow::bail!("API URL '{}' cannot carry a path", base_url);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(SportmonksClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            retrier,
            pacer: None,
        })
    }

    /// Let at most one request start per `interval`, counted over all clones
    /// of this client. A zero interval leaves requests unpaced.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.pacer = Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::direct(quota)));
        self
    }

    /// Raw details for one team-season.
    ///
    /// Tries `/statistics/seasons/teams/{team}/{season}` first. When that
    /// fails or reports no values, walks `/statistics/seasons/teams/{team}`
    /// (newest first, at most `max_fallback_pages` pages) and keeps the rows
    /// for the wanted season. Never returns an error; see [`DetailsOrigin`].
    pub async fn fetch_team_season_statistics(
        &self,
        key: TeamSeasonKey,
        options: &FetchOptions,
    ) -> SeasonDetails {
        let label = format!("team {} season {}", key.team_id, key.season_id);
        let params = self.stats_params(&options.type_filter);

        let direct_path = format!("statistics/seasons/teams/{}/{}", key.team_id, key.season_id);
        let mut direct_failed = false;
        match self.endpoint(&direct_path, &params) {
            Ok(url) => match self.request(&label, &url, options.retry_requests).await {
                Some(body) => {
                    let data = &body["data"];
                    if data["has_values"].as_bool() == Some(true) {
                        let details = parse_details(&data["details"]);
                        debug!("{}: {} details from direct endpoint", label, details.len());
                        return SeasonDetails {
                            details,
                            origin: DetailsOrigin::Direct,
                        };
                    }
                    debug!("{}: direct endpoint has no values, trying season listing", label);
                }
                None => direct_failed = true,
            },
            Err(e) => {
                warn!("{}: {}", label, e);
                direct_failed = true;
            }
        }

        let (details, pages, listing_failed) = self.collect_from_listing(key, &label, &params, options).await;

        if pages == 0 && (direct_failed || listing_failed) {
            warn!("{}: statistics unavailable, continuing without them", label);
            return SeasonDetails::unavailable();
        }

        info!(
            "{}: {} details from season listing ({} page(s))",
            label,
            details.len(),
            pages
        );
        SeasonDetails {
            details,
            origin: DetailsOrigin::Fallback { pages },
        }
    }

    /// Returns the gathered details, the number of pages read and whether a
    /// page request failed.
    async fn collect_from_listing(
        &self,
        key: TeamSeasonKey,
        label: &str,
        params: &QueryParams,
        options: &FetchOptions,
    ) -> (Vec<RawStatDetail>, u32, bool) {
        let mut listing_params = params.clone();
        listing_params.push(("order", "desc".to_string()));
        listing_params.push(("per_page", FALLBACK_PAGE_SIZE.to_string()));

        let mut details = Vec::new();
        let mut pages = 0u32;

        let listing_path = format!("statistics/seasons/teams/{}", key.team_id);
        let mut next = match self.endpoint(&listing_path, &listing_params) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("{}: {}", label, e);
                return (details, pages, true);
            }
        };

        while let Some(url) = next.take() {
            if pages >= options.max_fallback_pages {
                debug!("{}: page budget of {} reached", label, options.max_fallback_pages);
                break;
            }
            let page_label = format!("{} page {}", label, pages + 1);
            let Some(body) = self.request(&page_label, &url, options.retry_requests).await else {
                return (details, pages, true);
            };
            pages += 1;

            if let Some(rows) = body["data"].as_array() {
                for row in rows {
                    if row["season_id"].as_i64() == Some(key.season_id)
                        && row["has_values"].as_bool() == Some(true)
                    {
                        details.extend(parse_details(&row["details"]));
                    }
                }
            }

            let pagination = &body["pagination"];
            if pagination["has_more"].as_bool() == Some(true) {
                next = pagination["next_page"]
                    .as_str()
                    .and_then(|raw| next_page_url(raw, &listing_params));
            }
        }

        (details, pages, false)
    }

    /// Team profile from `/teams/{id}`, retried under the shared policy.
    /// `None` on 404, on exhausted retries and on an empty `data` object.
    pub async fn fetch_team_details(&self, team_id: i64, include: &str, locale: &str) -> Option<TeamDetails> {
        let label = format!("team {}", team_id);
        let params: QueryParams = vec![
            ("api_token", self.api_token.clone()),
            ("include", include.to_string()),
            ("locale", locale.to_string()),
        ];
        let url = match self.endpoint(&format!("teams/{}", team_id), &params) {
            Ok(url) => url,
            Err(e) => {
                warn!("{}: {}", label, e);
                return None;
            }
        };

        let url = &url;
        let data = self
            .retrier
            .run(&label, move || async move {
                let body = self.get_json(url).await?;
                match body.get("data") {
                    Some(data) if has_content(data) => Ok(data.clone()),
                    _ => Err(FetchError::EmptyPayload),
                }
            })
            .await?;

        Some(TeamDetails::from_api(&data))
    }

    fn stats_params(&self, filter: &TypeFilter) -> QueryParams {
        let mut params = vec![("api_token", self.api_token.clone())];
        if let Some(filters) = filter.query_value() {
            params.push(("filters", filters));
        }
        params
    }

    fn endpoint(&self, path: &str, params: &QueryParams) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| FetchError::Transport(format!("bad request URL: {}", e)))?;
        append_params(&mut url, params);
        Ok(url)
    }

    async fn request(&self, label: &str, url: &Url, retry: bool) -> Option<Value> {
        if retry {
            return self.retrier.run(label, move || self.get_json(url)).await;
        }
        match self.retrier.once(self.get_json(url)).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("{}: {}", label, e);
                None
            }
        }
    }

    async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        // The query carries the token, so only the path is logged.
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }
        debug!("GET {}", url.path());
        let resp = self.http.get(url.clone()).send().await?;
        if let Some(err) = FetchError::from_status(resp.status()) {
            return Err(err);
        }
        resp.json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StatsSource for SportmonksClient {
    async fn fetch_season_details(&self, key: TeamSeasonKey, options: &FetchOptions) -> SeasonDetails {
        self.fetch_team_season_statistics(key, options).await
    }

    fn name(&self) -> &str {
        "SportMonks"
    }
}

/// Pagination links that already carry the token are followed verbatim;
/// anything else gets the original query parameters re-applied.
fn next_page_url(raw: &str, params: &QueryParams) -> Option<Url> {
    match Url::parse(raw) {
        Ok(mut url) => {
            if !url.query_pairs().any(|(k, _)| k == "api_token") {
                append_params(&mut url, params);
            }
            Some(url)
        }
        Err(e) => {
            warn!("Ignoring unparsable next_page link: {}", e);
            None
        }
    }
}

fn append_params(url: &mut Url, params: &QueryParams) {
    if params.is_empty() {
        return;
    }
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
}

fn has_content(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}
