//! OpenAI-compatible chat-completion client and answer parsers.
//!
//! The model answers in free text; every answer goes through one of the
//! parsers below, and anything that does not parse becomes `None`.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::AppError;
use crate::retry::RetryPolicy;

const VERIFY_WEBSITE_SYSTEM: &str = "You are a helpful assistant that verifies company websites.";

const VERIFY_WEBSITE_PROMPT: &str = "Given the company name '{name}' and the following list of URLs:\n\n{urls}\n\nWhich URL is most likely to be the official website for the company? If none of them seem to be the official website, respond with 'N/A'. Please provide only the domain (with the format 'example.com' (no www and no http)) or 'N/A' as your answer, with no additional explanation.";

const CLEAN_WEBSITE_SYSTEM: &str = "You are a helpful assistant that cleans up website URLs but does not change the url itself. \
You will be provided with a value such as \"http://www.domain.com\" or \"domain.at\" and should only return 1 url that looks like this: domain.com. \
Do not change the name or spelling of the domain itself, just clean it up. \
If the value contains more than one domain, pick the more international one and always return only one.";

const EMPLOYEE_COUNT_SYSTEM: &str =
    "You are a helpful assistant that extracts employee counts from text.";

const EMPLOYEE_COUNT_PROMPT: &str = "Based on the following text, how many employees work at {website} worldwide? Please respond with only a number. If you can't find a specific number, respond with 'Unknown'.\n\n{text}";

static SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9+.\-]*://").unwrap());

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9\-]*[a-z0-9]$").unwrap()
});

/// Deterministic reduction of a website value to a bare domain.
///
/// `"HTTPS://www.Acme-Med.at/de/kontakt"` becomes `"acme-med.at"`. When the
/// value lists several sites only the first is kept.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let first = raw
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';' || c == '|')
        .map(|s| s.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '<' | '>' | '(' | ')')))
        .find(|s| !s.is_empty())?
        .to_lowercase();

    let without_scheme = SCHEME.replace(&first, "");
    let host = without_scheme
        .split(|c: char| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    // Drop credentials and port
    let host = host.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    if DOMAIN.is_match(host) {
        Some(host.to_string())
    } else {
        None
    }
}

/// Parses a "pick the domain" answer; `N/A`-style answers are `None`.
pub fn parse_domain_answer(answer: &str) -> Option<String> {
    let trimmed = answer
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.'))
        .trim();
    let lower = trimmed.to_lowercase();
    if lower.is_empty() || matches!(lower.as_str(), "n/a" | "na" | "none" | "unknown") {
        return None;
    }
    normalize_domain(trimmed)
}

/// Parses a bare-number employee answer. `Unknown`, prose and zero are `None`.
pub fn parse_employee_count(answer: &str) -> Option<i64> {
    let digits: String = answer
        .trim()
        .trim_end_matches('.')
        .chars()
        .filter(|c| !matches!(c, ',' | '\'' | '_' | ' ' | '\u{a0}' | '\u{202f}'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok().filter(|n| *n > 0)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build LLM client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            retry: RetryPolicy::exponential(3, Duration::from_millis(500)),
        })
    }

    /// Sends one system/user prompt pair and returns the trimmed answer.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY is required for this stage".into()))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let chat = self
            .retry
            .run("LLM completion", || self.send(&url, api_key, &request))
            .await?;

        let content = chat
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| AppError::Decode("LLM response contained no message".into()))?;

        tracing::debug!("LLM answer: {}", content.trim());
        Ok(content.trim().to_string())
    }

    async fn send(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatRequest<'_>,
    ) -> Result<ChatResponse, AppError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::from_request("LLM", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("LLM returned error {}: {}", status, body);
            return Err(AppError::from_status("LLM", status));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::from_request("LLM", e))
    }

    /// Picks the official domain of `company_name` among candidate URLs.
    pub async fn verify_website(
        &self,
        company_name: &str,
        urls: &[String],
    ) -> Result<Option<String>, AppError> {
        let prompt = VERIFY_WEBSITE_PROMPT
            .replace("{name}", company_name)
            .replace("{urls}", &urls.join("\n"));
        let answer = self.complete(VERIFY_WEBSITE_SYSTEM, &prompt).await?;
        Ok(parse_domain_answer(&answer))
    }

    /// Reduces a free-form website field to a single bare domain.
    pub async fn clean_website(&self, website: &str) -> Result<Option<String>, AppError> {
        let answer = self.complete(CLEAN_WEBSITE_SYSTEM, website).await?;
        Ok(parse_domain_answer(&answer))
    }

    /// Extracts a worldwide employee count for `website` from page text.
    pub async fn employee_count(&self, website: &str, text: &str) -> Result<Option<i64>, AppError> {
        let prompt = EMPLOYEE_COUNT_PROMPT
            .replace("{website}", website)
            .replace("{text}", text);
        let answer = self.complete(EMPLOYEE_COUNT_SYSTEM, &prompt).await?;
        Ok(parse_employee_count(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain_strips_scheme_www_and_path() {
        assert_eq!(
            normalize_domain("HTTPS://www.Acme-Med.at/de/kontakt?x=1"),
            Some("acme-med.at".to_string())
        );
        assert_eq!(normalize_domain("acme.co.uk"), Some("acme.co.uk".to_string()));
        assert_eq!(
            normalize_domain("http://www.acme.de:8080/"),
            Some("acme.de".to_string())
        );
    }

    #[test]
    fn test_normalize_domain_takes_first_of_many() {
        assert_eq!(
            normalize_domain("www.acme.at, www.acme.com"),
            Some("acme.at".to_string())
        );
    }

    #[test]
    fn test_normalize_domain_rejects_garbage() {
        assert_eq!(normalize_domain(""), None);
        assert_eq!(normalize_domain("not a website"), None);
        assert_eq!(normalize_domain("localhost"), None);
        assert_eq!(normalize_domain("http://"), None);
    }

    #[test]
    fn test_parse_domain_answer() {
        assert_eq!(parse_domain_answer("N/A"), None);
        assert_eq!(parse_domain_answer("n/a."), None);
        assert_eq!(parse_domain_answer("'resmed.com'"), Some("resmed.com".to_string()));
        assert_eq!(
            parse_domain_answer("https://www.zeiss.com/"),
            Some("zeiss.com".to_string())
        );
    }

    #[test]
    fn test_parse_employee_count() {
        assert_eq!(parse_employee_count("450"), Some(450));
        assert_eq!(parse_employee_count(" 12,000 "), Some(12000));
        assert_eq!(parse_employee_count("3500."), Some(3500));
        assert_eq!(parse_employee_count("Unknown"), None);
        assert_eq!(parse_employee_count("about 300"), None);
        assert_eq!(parse_employee_count("0"), None);
        assert_eq!(parse_employee_count(""), None);
        assert_eq!(parse_employee_count("-5"), None);
    }
}
