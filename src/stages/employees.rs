use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::Company;
use crate::payload::UpdatePayload;
use crate::runner::{Outcome, StageWorker};
use crate::search::DEFAULT_RESULT_COUNT;
use crate::status::Stage;

use super::{non_blank, PipelineContext};

/// Estimates headcount from the text of pages that mention the company's
/// website.
pub struct EmployeesStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> EmployeesStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    /// Visible text of every hit that could be fetched, pages separated by a
    /// blank line.
    async fn collect_text(&self, urls: &[String]) -> String {
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            match self.ctx.content.extract(url).await {
                Ok(text) if !text.trim().is_empty() => pages.push(text),
                Ok(_) => tracing::debug!("No visible text at {}", url),
                Err(e) => tracing::warn!("Skipping {}: {}", url, e),
            }
        }
        pages.join("\n\n")
    }
}

#[async_trait]
impl<'a> StageWorker for EmployeesStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::GotEmplWebsite
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        let Some(website) = non_blank(company.website.as_deref()) else {
            return Ok(Outcome::NoInput);
        };

        let hits = self
            .ctx
            .search
            .search(&format!("How many people work at {}", website), DEFAULT_RESULT_COUNT)
            .await?;
        let urls: Vec<String> = hits.into_iter().map(|hit| hit.url).collect();

        let text = self.collect_text(&urls).await;
        if text.is_empty() {
            tracing::info!("No page text to count employees of {}", website);
            return Ok(Outcome::Advance(UpdatePayload::new()));
        }

        let mut payload = UpdatePayload::new();
        match self.ctx.llm.employee_count(website, &text).await? {
            Some(count) => {
                tracing::info!("{} has about {} employees", website, count);
                payload.set("empl_website", count);
            }
            None => tracing::info!("No employee count found for {}", website),
        }
        Ok(Outcome::Advance(payload))
    }
}
