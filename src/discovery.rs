//! Source discovery via the GitHub repository search API.
//!
//! Queries `GET {api_url}/search/repositories` for repositories matching
//! the configured topical filter, most recently updated first, and keeps
//! only those updated inside the trailing window (30 days by default).
//!
//! Discovery is best-effort: every failure surfaces as
//! [`HarvestError::Discovery`], which the pipeline logs before continuing
//! with the registry it already has.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::error::{HarvestError, Result};
use crate::traits::SourceDiscovery;

const USER_AGENT: &str = concat!("rule-harvest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    pub clone_url: String,
    pub updated_at: DateTime<Utc>,
}

pub struct GitHubDiscovery {
    client: reqwest::Client,
    api_url: String,
    query: String,
    token: Option<String>,
    per_page: u32,
    pages: u32,
    window: ChronoDuration,
}

impl GitHubDiscovery {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT);
        if let Some(proxy) = config.proxy.active() {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| HarvestError::Config(format!("invalid proxy.address: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| HarvestError::Discovery(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.sync.api_url.trim_end_matches('/').to_string(),
            query: config.sync.discovery_query.clone(),
            token: config.sync.resolved_token(),
            per_page: config.sync.per_page,
            pages: config.sync.discovery_pages.max(1),
            window: ChronoDuration::days(config.sync.discovery_window_days),
        })
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<SearchItem>> {
        let url = format!("{}/search/repositories", self.api_url);
        let per_page = self.per_page.to_string();
        let page = page.to_string();

        let mut request = self
            .client
            .get(&url)
            .query(&[
                ("q", self.query.as_str()),
                ("sort", "updated"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ])
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| HarvestError::Discovery(format!("search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvestError::Discovery(format!(
                "search API returned {}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Discovery(format!("invalid search response: {}", e)))?;
        Ok(parsed.items)
    }
}

#[async_trait]
impl SourceDiscovery for GitHubDiscovery {
    async fn discover(&self) -> Result<Vec<String>> {
        let items = collect_pages(self.pages, self.per_page, move |page| self.fetch_page(page)).await?;
        let urls = filter_recent(&items, Utc::now(), self.window);
        tracing::info!(
            found = items.len(),
            recent = urls.len(),
            "discovery query completed"
        );
        Ok(urls)
    }
}

/// Fetch pages `1..=pages` until a short page. A failure on the first page
/// is an error; a later failure keeps the pages already fetched.
async fn collect_pages<F, Fut>(pages: u32, per_page: u32, mut fetch: F) -> Result<Vec<SearchItem>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<SearchItem>>>,
{
    let mut items = Vec::new();
    for page in 1..=pages {
        let batch = match fetch(page).await {
            Ok(batch) => batch,
            Err(e) if page == 1 => return Err(e),
            Err(e) => {
                tracing::warn!(page, kept = items.len(), error = %e, "search page failed, keeping earlier pages");
                break;
            }
        };
        let last_page = (batch.len() as u32) < per_page;
        items.extend(batch);
        if last_page {
            break;
        }
    }
    Ok(items)
}

/// Clone URLs of items updated strictly within `window` before `now`.
pub fn filter_recent(
    items: &[SearchItem],
    now: DateTime<Utc>,
    window: ChronoDuration,
) -> Vec<String> {
    items
        .iter()
        .filter(|item| now.signed_duration_since(item.updated_at) < window)
        .map(|item| item.clone_url.clone())
        .collect()
}
