use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{ApolloRateLimitPolicy, Config};
use crate::errors::AppError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PrimaryPhone {
    pub number: Option<String>,
}

/// Organization record returned by the enrichment API.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Organization {
    pub id: Option<String>,
    pub name: Option<String>,
    pub website_url: Option<String>,
    pub blog_url: Option<String>,
    pub angellist_url: Option<String>,
    pub linkedin_url: Option<String>,
    pub twitter_url: Option<String>,
    pub facebook_url: Option<String>,
    pub primary_phone: Option<PrimaryPhone>,
    pub alexa_ranking: Option<Value>,
    pub phone: Option<String>,
    pub linkedin_uid: Option<String>,
    pub founded_year: Option<Value>,
    pub publicly_traded_symbol: Option<String>,
    pub publicly_traded_exchange: Option<String>,
    pub logo_url: Option<String>,
    pub crunchbase_url: Option<String>,
    pub primary_domain: Option<String>,
    pub industry: Option<String>,
    pub estimated_num_employees: Option<i64>,
    pub snippets_loaded: Option<Value>,
    pub industry_tag_id: Option<String>,
    pub retail_location_count: Option<Value>,
    pub raw_address: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub owned_by_organization_id: Option<String>,
    pub num_suborganizations: Option<Value>,
    pub seo_description: Option<String>,
    pub short_description: Option<String>,
    pub annual_revenue_printed: Option<String>,
    pub annual_revenue: Option<f64>,
    pub total_funding: Option<Value>,
    pub total_funding_printed: Option<String>,
    pub latest_funding_round_date: Option<String>,
    pub latest_funding_stage: Option<String>,
    pub suborganizations: Option<Value>,
    pub funding_events: Option<Value>,
    pub account_id: Option<String>,
    pub departmental_head_count: Option<Value>,
    pub account: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApolloEnrichment {
    pub organization: Organization,
    /// Full response body, stored verbatim.
    pub raw: Value,
}

pub struct ApolloClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    rate_limit_policy: ApolloRateLimitPolicy,
    retry: RetryPolicy,
}

impl ApolloClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build Apollo client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.apollo_api_url.clone(),
            api_key: config.apollo_api_key.clone(),
            rate_limit_policy: config.apollo_rate_limit_policy,
            retry: RetryPolicy::exponential(3, Duration::from_millis(500)),
        })
    }

    /// Connection failures and gateway statuses come back as transient
    /// errors; any other response is returned for the caller to judge.
    async fn send(&self, url: &Url, api_key: &str) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .get(url.clone())
            .header("Cache-Control", "no-cache")
            .header("X-Api-Key", api_key)
            .send()
            .await
            .map_err(|e| AppError::from_request("Apollo", e))?;

        let status = response.status();
        if status.is_server_error() {
            let err = AppError::from_status("Apollo", status);
            if err.is_transient() {
                return Err(err);
            }
        }
        Ok(response)
    }

    /// Enriches one domain.
    ///
    /// `Ok(None)` means the API knows no organization for the domain. A 429
    /// is handled per [`ApolloRateLimitPolicy`]; once it gives up, and on any
    /// other non-success status, the error is fatal to the run since every
    /// further request would only burn quota. Gateway failures that outlast
    /// the retries fail only the current record.
    pub async fn enrich(&self, domain: &str) -> Result<Option<ApolloEnrichment>, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("APOLLO_API_KEY is required for this stage".into()))?;

        let url = Url::parse_with_params(&self.api_url, &[("domain", domain)])
            .map_err(|e| AppError::InternalError(format!("Failed to build Apollo URL: {}", e)))?;

        let (max_attempts, retry_delay) = match self.rate_limit_policy {
            ApolloRateLimitPolicy::Abort => (1, Duration::ZERO),
            ApolloRateLimitPolicy::Retry {
                attempts,
                delay_secs,
            } => (attempts.max(1), Duration::from_secs(delay_secs)),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!("Fetching Apollo organization for domain: {}", domain);

            let response = self
                .retry
                .run("Apollo request", || self.send(&url, api_key))
                .await?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(
                    "Apollo rate limit reached for {} (attempt {}/{}): {:?}",
                    domain,
                    attempt,
                    max_attempts,
                    response.headers()
                );
                if attempt < max_attempts {
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
                return Err(AppError::QuotaExhausted(format!(
                    "Apollo rate limit reached after {} attempt(s)",
                    attempt
                )));
            }

            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                tracing::error!("Apollo returned error {}: {}", status, body);
                return Err(AppError::QuotaExhausted(format!(
                    "Apollo refused request with status {}",
                    status
                )));
            }

            let raw: Value = response
                .json()
                .await
                .map_err(|e| AppError::from_request("Apollo", e))?;

            let organization = match raw.get("organization") {
                Some(org) if !org.is_null() => serde_json::from_value::<Organization>(org.clone())
                    .map_err(|e| {
                        AppError::Decode(format!("Failed to parse Apollo organization: {}", e))
                    })?,
                _ => {
                    tracing::info!("Apollo has no organization for {}", domain);
                    return Ok(None);
                }
            };

            return Ok(Some(ApolloEnrichment { organization, raw }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_organization_decodes_partial_payload() {
        let org: Organization = serde_json::from_value(json!({
            "id": "5f2",
            "name": "Acme Medical",
            "estimated_num_employees": 420,
            "annual_revenue": 35000000.0,
            "primary_phone": {"number": "+43 1 234"},
            "funding_events": [],
            "unknown_field": true
        }))
        .unwrap();

        assert_eq!(org.estimated_num_employees, Some(420));
        assert_eq!(org.annual_revenue, Some(35_000_000.0));
        assert_eq!(org.primary_phone.unwrap().number.as_deref(), Some("+43 1 234"));
        assert!(org.website_url.is_none());
    }
}
