use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::Company;
use crate::payload::UpdatePayload;
use crate::runner::{Outcome, StageWorker};
use crate::scoring::ranking_score;
use crate::status::Stage;

use super::PipelineContext;

/// Scores every company from its products and firmographics.
pub struct RankingStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> RankingStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<'a> StageWorker for RankingStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::UpdatedRankingScore
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        let store = self.ctx.store.as_ref();
        let products = store.scoring_products(company.id).await?;
        let partner = store.partner_company(company.id).await?;

        let score = ranking_score(
            &products,
            partner.as_ref(),
            company.empl_website.unwrap_or(0),
        );
        tracing::debug!(
            "{}: score {} from {} product(s)",
            company.display_name(),
            score,
            products.len()
        );

        let mut payload = UpdatePayload::new();
        payload.set("ranking_score", score);
        Ok(Outcome::Advance(payload))
    }
}
