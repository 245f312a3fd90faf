//! Page fetching and HTML → visible text extraction.

use std::time::Duration;

use reqwest::Client;
use scraper::node::Node;
use scraper::Html;

use crate::errors::AppError;
use crate::retry::RetryPolicy;

/// Characters kept per fetched page.
pub const MAX_PAGE_CHARS: usize = 5000;

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Visible text of an HTML document, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let text: &str = text;
        words.extend(text.split_whitespace());
    }

    words.join(" ")
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

pub struct ContentExtractor {
    client: Client,
    retry: RetryPolicy,
    max_chars: usize,
}

impl ContentExtractor {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build content client: {}", e)))?;

        Ok(Self {
            client,
            retry: RetryPolicy::exponential(2, Duration::from_millis(300)),
            max_chars: MAX_PAGE_CHARS,
        })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::from_request("Page fetch", e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::Transport(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(AppError::ExternalApiError(format!(
                "{} returned {}",
                url, status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::from_request("Page fetch", e))
    }

    /// Fetches a page and returns its truncated visible text.
    pub async fn extract(&self, url: &str) -> Result<String, AppError> {
        let html = self
            .retry
            .run("Page fetch", || self.fetch_html(url))
            .await?;
        Ok(truncate_chars(&html_to_text(&html), self.max_chars))
    }
}
