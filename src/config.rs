use serde::Deserialize;

use crate::errors::AppError;

/// Web search backend used by the website and employee stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProvider {
    Bing,
    Google,
}

/// What to do when the company-enrichment API answers 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ApolloRateLimitPolicy {
    /// Stop the run on the first 429 so no further quota is burned.
    Abort,
    /// Wait and retry a bounded number of times, then stop the run.
    Retry { attempts: u32, delay_secs: u64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub eudamed_base_url: String,
    pub registry_retry_delay_secs: u64,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub search_provider: SearchProvider,
    pub bing_subscription_key: Option<String>,
    pub bing_endpoint: String,
    pub google_api_key: Option<String>,
    pub google_cse_id: Option<String>,
    pub google_cse_endpoint: String,
    pub apollo_api_key: Option<String>,
    pub apollo_api_url: String,
    pub apollo_rate_limit_policy: ApolloRateLimitPolicy,
}

fn optional_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url_or(name: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(name).unwrap_or_else(|_| default.to_string());
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            eudamed_base_url: http_url_or(
                "EUDAMED_BASE_URL",
                "https://ec.europa.eu/tools/eudamed/api",
            )?,
            registry_retry_delay_secs: std::env::var("REGISTRY_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("REGISTRY_RETRY_DELAY_SECS must be a number"))?,
            openai_api_key: optional_secret("OPENAI_API_KEY"),
            openai_base_url: http_url_or("OPENAI_BASE_URL", "https://api.openai.com/v1")?,
            openai_model: std::env::var("OPENAI_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            search_provider: match std::env::var("SEARCH_PROVIDER")
                .unwrap_or_else(|_| "bing".to_string())
                .to_lowercase()
                .as_str()
            {
                "bing" => SearchProvider::Bing,
                "google" => SearchProvider::Google,
                other => anyhow::bail!("SEARCH_PROVIDER must be bing or google, got {}", other),
            },
            bing_subscription_key: optional_secret("BING_SEARCH_V7_SUBSCRIPTION_KEY"),
            bing_endpoint: http_url_or(
                "BING_SEARCH_V7_ENDPOINT",
                "https://api.bing.microsoft.com/v7.0/search",
            )?,
            google_api_key: optional_secret("GOOGLE_API_KEY"),
            google_cse_id: optional_secret("GOOGLE_CSE_ID"),
            google_cse_endpoint: http_url_or(
                "GOOGLE_CSE_ENDPOINT",
                "https://www.googleapis.com/customsearch/v1",
            )?,
            apollo_api_key: optional_secret("APOLLO_API_KEY"),
            apollo_api_url: http_url_or(
                "APOLLO_API_URL",
                "https://api.apollo.io/v1/organizations/enrich",
            )?,
            apollo_rate_limit_policy: match std::env::var("APOLLO_RATE_LIMIT_POLICY")
                .unwrap_or_else(|_| "abort".to_string())
                .to_lowercase()
                .as_str()
            {
                "abort" => ApolloRateLimitPolicy::Abort,
                "retry" => ApolloRateLimitPolicy::Retry {
                    attempts: 3,
                    delay_secs: 10,
                },
                other => anyhow::bail!(
                    "APOLLO_RATE_LIMIT_POLICY must be abort or retry, got {}",
                    other
                ),
            },
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("EUDAMED Base URL: {}", config.eudamed_base_url);
        tracing::debug!("OpenAI model: {}", config.openai_model);
        tracing::debug!("Search provider: {:?}", config.search_provider);
        tracing::debug!("Apollo rate limit policy: {:?}", config.apollo_rate_limit_policy);

        Ok(config)
    }

    pub fn require_openai_key(&self) -> Result<&str, AppError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY is required for this stage".into()))
    }

    pub fn require_apollo_key(&self) -> Result<&str, AppError> {
        self.apollo_api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("APOLLO_API_KEY is required for this stage".into()))
    }
}
