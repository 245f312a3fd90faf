use async_trait::async_trait;

use crate::apollo::Organization;
use crate::errors::AppError;
use crate::models::Company;
use crate::payload::UpdatePayload;
use crate::runner::{Outcome, StageWorker};
use crate::status::Stage;
use crate::store::Table;

use super::{non_blank, PipelineContext};

/// Fetches the firmographic record of a company's domain, at most once per
/// company.
pub struct ApolloStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> ApolloStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }
}

/// Partner-company columns for an organization record.
pub fn partner_fields(company: &Company, org: &Organization) -> UpdatePayload {
    let mut payload = UpdatePayload::new();
    payload
        .set("eudamed_company_id", company.id.to_string())
        .set_opt("apollo_id", org.id.clone())
        .set_opt("name", org.name.clone())
        .set_opt("website_url", org.website_url.clone())
        .set_opt("blog_url", org.blog_url.clone())
        .set_opt("angellist_url", org.angellist_url.clone())
        .set_opt("linkedin_url", org.linkedin_url.clone())
        .set_opt("twitter_url", org.twitter_url.clone())
        .set_opt("facebook_url", org.facebook_url.clone())
        .set_opt(
            "primary_phone",
            org.primary_phone.as_ref().and_then(|p| p.number.clone()),
        )
        .set_opt("alexa_ranking", org.alexa_ranking.clone())
        .set_opt("phone", org.phone.clone())
        .set_opt("linkedin_uid", org.linkedin_uid.clone())
        .set_opt("founded_year", org.founded_year.clone())
        .set_opt("publicly_traded_symbol", org.publicly_traded_symbol.clone())
        .set_opt("publicly_traded_exchange", org.publicly_traded_exchange.clone())
        .set_opt("logo_url", org.logo_url.clone())
        .set_opt("crunchbase_url", org.crunchbase_url.clone())
        .set_opt("primary_domain", org.primary_domain.clone())
        .set_opt("industry", org.industry.clone())
        .set_opt("estimated_num_employees", org.estimated_num_employees)
        .set_opt("snippets_loaded", org.snippets_loaded.clone())
        .set_opt("industry_tag_id", org.industry_tag_id.clone())
        .set_opt("retail_location_count", org.retail_location_count.clone())
        .set_opt("raw_address", org.raw_address.clone())
        .set_opt("street_address", org.street_address.clone())
        .set_opt("city", org.city.clone())
        .set_opt("state", org.state.clone())
        .set_opt("postal_code", org.postal_code.clone())
        .set_opt("country", org.country.clone())
        .set_opt("owned_by_organization_id", org.owned_by_organization_id.clone())
        .set_opt("num_suborganizations", org.num_suborganizations.clone())
        .set_opt("seo_description", org.seo_description.clone())
        .set_opt("short_description", org.short_description.clone())
        .set_opt("annual_revenue_printed", org.annual_revenue_printed.clone())
        .set_opt("annual_revenue", org.annual_revenue)
        .set_opt("total_funding", org.total_funding.clone())
        .set_opt("total_funding_printed", org.total_funding_printed.clone())
        .set_opt("latest_funding_round_date", org.latest_funding_round_date.clone())
        .set_opt("latest_funding_stage", org.latest_funding_stage.clone())
        .set_opt("suborganizations", org.suborganizations.clone())
        .set_opt("funding_events", org.funding_events.clone())
        .set_opt("account_id", org.account_id.clone())
        .set_opt("departmental_head_count", org.departmental_head_count.clone())
        .set_opt("account", org.account.clone());
    payload
}

#[async_trait]
impl<'a> StageWorker for ApolloStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::EnrichedApollo
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        let Some(domain) = non_blank(company.website.as_deref()) else {
            return Ok(Outcome::NoInput);
        };
        let store = self.ctx.store.as_ref();

        if store.partner_company(company.id).await?.is_some() {
            tracing::debug!("{} already enriched", company.display_name());
            return Ok(Outcome::Advance(UpdatePayload::new()));
        }

        match self.ctx.apollo.enrich(domain).await? {
            Some(enrichment) => {
                let mut payload = partner_fields(company, &enrichment.organization);
                payload.set("json_dump", enrichment.raw);
                let id = store.insert(Table::PartnerCompanies, &payload).await?;
                tracing::info!("Enriched {} as partner company {}", domain, id);
            }
            None => tracing::info!("No organization found for {}", domain),
        }
        Ok(Outcome::Advance(UpdatePayload::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apollo::PrimaryPhone;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_partner_fields() {
        let company = Company {
            id: Uuid::nil(),
            eudamed_uuid: None,
            name: Some("Acme".into()),
            iso_code: None,
            eudamed_type: None,
            eudamed_identifier: None,
            website: Some("acme.at".into()),
            original_website: None,
            empl_website: None,
            scraping_status: None,
            error_stage: None,
        };
        let org = Organization {
            id: Some("5f1".into()),
            estimated_num_employees: Some(120),
            annual_revenue: Some(2.5e7),
            primary_phone: Some(PrimaryPhone { number: Some("+43 1 000".into()) }),
            ..Default::default()
        };

        let payload = partner_fields(&company, &org);
        assert_eq!(payload.get("apollo_id"), Some(&json!("5f1")));
        assert_eq!(payload.get("eudamed_company_id"), Some(&json!(Uuid::nil().to_string())));
        assert_eq!(payload.get("estimated_num_employees"), Some(&json!(120)));
        assert_eq!(payload.get("primary_phone"), Some(&json!("+43 1 000")));
        assert!(payload.get("industry").is_none());
    }
}
