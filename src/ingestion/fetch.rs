//! Fetch functions - page through the listings API

use crate::config::ApiConfig;
use crate::ingestion::types::RawData;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor for the 429 backoff when no Retry-After is sent
const MIN_RETRY_DELAY: Duration = Duration::from_secs(2);

const RATE_LIMIT_HEADERS: &[&str] = &[
    "x-ratelimit-requests-limit",
    "x-ratelimit-requests-remaining",
    "x-ratelimit-requests-reset",
];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Listings API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Listings API still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Listings API page {page} has no hits array")]
    MalformedPage { page: u32 },
}

/// Bounds for one fetch run
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Stop after this many pages
    pub max_pages: Option<u32>,
    /// Stop once this many unique listings are collected
    pub limit: Option<usize>,
}

pub struct ListingsApiClient {
    client: Client,
    config: ApiConfig,
}

impl ListingsApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(ListingsApiClient { client, config })
    }

    /// Fetch pages until the API runs out, or the options cut the run short.
    ///
    /// Failures after the first page end the run early with what was
    /// collected so far.
    pub async fn fetch_listings(&self, options: &FetchOptions) -> Result<RawData, FetchError> {
        info!(
            "Fetching listings from {} (locations {}, purpose {})",
            self.config.url, self.config.location_ids, self.config.purpose
        );

        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        let mut collected = 0usize;
        let mut total_pages: Option<u32> = None;
        let mut page = 1u32;

        loop {
            if options.max_pages.map_or(false, |max| page > max) {
                info!("Reached max pages ({})", page - 1);
                break;
            }
            if total_pages.map_or(false, |total| page > total) {
                break;
            }

            let body = match self.fetch_page(page).await {
                Ok(body) => body,
                Err(e) if pages.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Stopping at page {} with partial results: {}", page, e);
                    break;
                }
            };

            if total_pages.is_none() {
                total_pages = total_pages_of(&body, self.config.hits_per_page);
                if let Some(total) = total_pages {
                    info!("API reports {} pages", total);
                }
            }

            let empty_page = body
                .get("hits")
                .and_then(Value::as_array)
                .map_or(true, Vec::is_empty);
            if empty_page {
                info!("Page {} returned no listings, stopping", page);
                break;
            }

            let remaining = options.limit.map(|limit| limit.saturating_sub(collected));
            let (body, added) = keep_new_hits(body, &mut seen, remaining);
            collected += added;
            debug!("Page {}: {} new listings", page, added);

            if added > 0 {
                pages.push(body);
            }

            if options.limit.map_or(false, |limit| collected >= limit) {
                info!("Reached listing limit ({})", collected);
                break;
            }

            page += 1;
            if total_pages.map_or(true, |total| page <= total) {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        info!("Fetched {} unique listings across {} pages", collected, pages.len());

        Ok(RawData::Json(pages))
    }

    /// One request against the list endpoint, retrying on HTTP 429
    async fn fetch_page(&self, page: u32) -> Result<Value, FetchError> {
        let query = build_query(&self.config, page);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let response = self
                .client
                .get(&self.config.url)
                .header("X-RapidAPI-Key", &self.config.api_key)
                .header("X-RapidAPI-Host", &self.config.host)
                .query(&query)
                .send()
                .await?;

            log_rate_limit(response.headers());
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.config.max_retries {
                    return Err(FetchError::RateLimited { attempts: attempt });
                }

                let delay = retry_delay(response.headers(), self.config.page_delay, attempt);
                warn!(
                    "Rate limited on page {} (attempt {}), retrying in {:?}",
                    page, attempt, delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Status { status, body });
            }

            let body: Value = response.json().await?;
            if !body.get("hits").map_or(false, Value::is_array) {
                return Err(FetchError::MalformedPage { page });
            }

            return Ok(body);
        }
    }
}

/// Query parameters for one page. Pages are 1-based.
pub fn build_query(config: &ApiConfig, page: u32) -> Vec<(&'static str, String)> {
    vec![
        ("locationExternalIDs", config.location_ids.clone()),
        ("purpose", config.purpose.clone()),
        ("categoryExternalID", config.category_id.clone()),
        ("sort", config.sort.clone()),
        ("hitsPerPage", config.hits_per_page.to_string()),
        ("page", page.to_string()),
    ]
}

/// Total page count from `nbPages`, or `ceil(count / hits_per_page)`
pub fn total_pages_of(body: &Value, hits_per_page: u32) -> Option<u32> {
    if let Some(pages) = body.get("nbPages").and_then(Value::as_u64) {
        return u32::try_from(pages).ok();
    }

    let count = body
        .get("count")
        .or_else(|| body.get("nbHits"))
        .and_then(Value::as_u64)?;
    let hits_per_page = u64::from(hits_per_page.max(1));

    u32::try_from(count.div_ceil(hits_per_page)).ok()
}

/// Drop hits whose id was already seen, keeping at most `remaining`.
/// Returns the rewritten page and the number of hits kept.
fn keep_new_hits(
    mut body: Value,
    seen: &mut HashSet<String>,
    remaining: Option<usize>,
) -> (Value, usize) {
    let Some(hits) = body.get_mut("hits").and_then(Value::as_array_mut) else {
        return (body, 0);
    };

    let mut kept = Vec::with_capacity(hits.len());
    for hit in hits.drain(..) {
        if remaining.map_or(false, |r| kept.len() >= r) {
            break;
        }

        // Hits without an id are left for the parser to reject
        let fresh = match hit.get("id") {
            Some(id) => seen.insert(id.to_string().trim_matches('"').to_string()),
            None => true,
        };
        if fresh {
            kept.push(hit);
        }
    }

    let added = kept.len();
    *hits = kept;
    (body, added)
}

fn retry_delay(headers: &HeaderMap, page_delay: Duration, attempt: u32) -> Duration {
    let retry_after = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    retry_after.unwrap_or_else(|| {
        let backoff = page_delay.saturating_mul(2u32.saturating_pow(attempt));
        backoff.max(MIN_RETRY_DELAY)
    })
}

fn log_rate_limit(headers: &HeaderMap) {
    for name in RATE_LIMIT_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            debug!("{}: {}", name, value);
        }
    }
}
