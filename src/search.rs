use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;

use crate::config::{Config, SearchProvider};
use crate::errors::AppError;
use crate::retry::RetryPolicy;

pub const DEFAULT_RESULT_COUNT: u32 = 5;

/// One normalized web search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BingResponse {
    web_pages: Option<BingWebPages>,
}

#[derive(Debug, Deserialize)]
struct BingWebPages {
    value: Option<Vec<BingPage>>,
}

#[derive(Debug, Deserialize)]
struct BingPage {
    url: Option<String>,
    name: Option<String>,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    items: Option<Vec<GoogleItem>>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    link: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
}

/// Web search over Bing Web Search v7 or Google Custom Search.
pub struct SearchClient {
    client: Client,
    provider: SearchProvider,
    bing_key: Option<String>,
    bing_endpoint: String,
    google_key: Option<String>,
    google_cse_id: Option<String>,
    google_endpoint: String,
    retry: RetryPolicy,
}

impl SearchClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build search client: {}", e)))?;

        Ok(Self {
            client,
            provider: config.search_provider,
            bing_key: config.bing_subscription_key.clone(),
            bing_endpoint: config.bing_endpoint.clone(),
            google_key: config.google_api_key.clone(),
            google_cse_id: config.google_cse_id.clone(),
            google_endpoint: config.google_cse_endpoint.clone(),
            retry: RetryPolicy::exponential(3, Duration::from_millis(500)),
        })
    }

    pub fn provider(&self) -> SearchProvider {
        self.provider
    }

    pub async fn search(&self, query: &str, count: u32) -> Result<Vec<SearchHit>, AppError> {
        tracing::debug!("Searching ({:?}): {}", self.provider, query);
        let hits = self
            .retry
            .run("Web search", || async {
                match self.provider {
                    SearchProvider::Bing => self.bing(query, count).await,
                    SearchProvider::Google => self.google(query, count).await,
                }
            })
            .await?;
        tracing::debug!("Search returned {} results", hits.len());
        Ok(hits)
    }

    async fn bing(&self, query: &str, count: u32) -> Result<Vec<SearchHit>, AppError> {
        let key = self.bing_key.as_deref().ok_or_else(|| {
            AppError::Config("BING_SEARCH_V7_SUBSCRIPTION_KEY is required for web search".into())
        })?;

        let url = Url::parse_with_params(
            &self.bing_endpoint,
            &[
                ("q", query),
                ("count", &count.to_string()),
                ("offset", "0"),
                ("mkt", "en-US"),
            ],
        )
        .map_err(|e| AppError::InternalError(format!("Failed to build search URL: {}", e)))?;

        let response = self
            .client
            .get(url)
            .header("Ocp-Apim-Subscription-Key", key)
            .send()
            .await
            .map_err(|e| AppError::from_request("Bing search", e))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!("Bing search returned error {}", status);
            return Err(AppError::from_status("Bing search", status));
        }

        let body: BingResponse = response
            .json()
            .await
            .map_err(|e| AppError::from_request("Bing search", e))?;

        Ok(body
            .web_pages
            .and_then(|p| p.value)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|page| {
                Some(SearchHit {
                    url: page.url?,
                    title: page.name,
                    snippet: page.snippet,
                })
            })
            .collect())
    }

    async fn google(&self, query: &str, count: u32) -> Result<Vec<SearchHit>, AppError> {
        let key = self
            .google_key
            .as_deref()
            .ok_or_else(|| AppError::Config("GOOGLE_API_KEY is required for web search".into()))?;
        let cx = self
            .google_cse_id
            .as_deref()
            .ok_or_else(|| AppError::Config("GOOGLE_CSE_ID is required for web search".into()))?;

        // Custom Search caps `num` at 10
        let num = count.clamp(1, 10).to_string();
        let url = Url::parse_with_params(
            &self.google_endpoint,
            &[("key", key), ("cx", cx), ("q", query), ("num", num.as_str())],
        )
        .map_err(|e| AppError::InternalError(format!("Failed to build search URL: {}", e)))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::from_request("Google search", e))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!("Google search returned error {}", status);
            return Err(AppError::from_status("Google search", status));
        }

        let body: GoogleResponse = response
            .json()
            .await
            .map_err(|e| AppError::from_request("Google search", e))?;

        Ok(body
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| {
                Some(SearchHit {
                    url: item.link?,
                    title: item.title,
                    snippet: item.snippet,
                })
            })
            .collect())
    }
}
