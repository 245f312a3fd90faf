use async_trait::async_trait;

use crate::errors::AppError;
use crate::llm::normalize_domain;
use crate::models::Company;
use crate::payload::UpdatePayload;
use crate::runner::{Outcome, StageWorker};
use crate::search::DEFAULT_RESULT_COUNT;
use crate::status::Stage;

use super::{non_blank, PipelineContext};

/// Web-searches companies that have no website yet and lets the LLM pick
/// the official domain among the hits.
pub struct SearchWebsiteStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> SearchWebsiteStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<'a> StageWorker for SearchWebsiteStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::SearchedForWebsite
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        if company.known_website().is_some() {
            return Ok(Outcome::NoInput);
        }
        let Some(name) = non_blank(company.name.as_deref()) else {
            return Ok(Outcome::NoInput);
        };

        let hits = self
            .ctx
            .search
            .search(&format!("{} official website", name), DEFAULT_RESULT_COUNT)
            .await?;
        if hits.is_empty() {
            tracing::info!("No search results for {}", name);
            return Ok(Outcome::Advance(UpdatePayload::new()));
        }

        let urls: Vec<String> = hits.into_iter().map(|hit| hit.url).collect();
        let mut payload = UpdatePayload::new();
        match self.ctx.llm.verify_website(name, &urls).await? {
            Some(domain) => {
                tracing::info!("Website for {}: {}", name, domain);
                payload.set("website", domain);
            }
            None => tracing::info!("Could not verify a website for {}", name),
        }
        Ok(Outcome::Advance(payload))
    }
}

/// Reduces the known website of a company to a single bare domain.
pub struct CleanWebsiteStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> CleanWebsiteStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<'a> StageWorker for CleanWebsiteStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::CleanedWebsite
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        let Some(raw) = company.known_website() else {
            return Ok(Outcome::NoInput);
        };

        let cleaned = match self.ctx.llm.clean_website(raw).await? {
            Some(domain) => Some(domain),
            None => {
                tracing::debug!("LLM gave no domain for {:?}, normalizing locally", raw);
                normalize_domain(raw)
            }
        };

        let mut payload = UpdatePayload::new();
        if non_blank(company.original_website.as_deref()).is_none() {
            payload.set("original_website", raw);
        }
        match cleaned {
            Some(domain) => {
                tracing::debug!("Cleaned website {:?} -> {}", raw, domain);
                payload.set("website", domain);
            }
            None => tracing::warn!("Website {:?} of {} is not a domain", raw, company.display_name()),
        }
        Ok(Outcome::Advance(payload))
    }
}
