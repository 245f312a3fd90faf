use async_trait::async_trait;
use serde_json::Value;

use crate::dedup::insert_contact_if_absent;
use crate::errors::AppError;
use crate::models::{Company, ContactKey};
use crate::payload::UpdatePayload;
use crate::registry::{ActorDetails, ActorPublicView, CodeRef};
use crate::runner::{Outcome, StageWorker};
use crate::status::Stage;

use super::{non_blank, PipelineContext};

/// Fetches the registry's public actor record and merges it into the
/// company, together with its city and regulatory contact persons.
pub struct CompanyDetailsStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> CompanyDetailsStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }
}

fn srn_code(value: &Option<CodeRef>) -> Option<String> {
    value.as_ref().and_then(|c| c.srn_code.clone())
}

fn code(value: &Option<CodeRef>) -> Option<String> {
    value.as_ref().and_then(|c| c.code.clone())
}

/// Company columns derived from an actor record (city excluded).
pub fn company_fields(details: &ActorDetails, view: &ActorPublicView) -> UpdatePayload {
    let mut payload = UpdatePayload::new();
    let address = view.actor_address.as_ref();

    payload
        .set("json_dump", details.raw.clone())
        .set_opt("importers", details.importers.clone())
        .set_opt("non_eu_manufacturers", details.non_eu_manufacturers.clone())
        .set_opt("eudamed_status", code(&view.actor_status))
        .set_opt(
            "iso_code",
            address
                .and_then(|a| a.country.as_ref())
                .and_then(|c| c.iso2_code.clone()),
        )
        .set_opt("eudamed_type", srn_code(&view.actor_type))
        .set_opt("trade_register", view.trade_register.clone())
        .set_opt("eori", view.eori.clone())
        .set_opt("european_vat_number", view.european_vat_number.clone())
        .set_opt("eudamed_identifier", view.eudamed_identifier.clone())
        .set_opt("phone", view.telephone.clone())
        .set_opt("email", view.electronic_mail.clone())
        .set_opt("original_website", non_blank(view.website.as_deref()))
        .set_opt("validator_name", view.validator_name.clone())
        .set_opt("validator_uuid", view.validator_uuid.clone())
        .set_opt("validator_type", srn_code(&view.validator_type))
        .set_opt("validator_srn", view.validator_srn.clone())
        .set_opt("validator_email", view.validator_email.clone())
        .set_opt("validator_phone", view.validator_telephone.clone())
        .set_opt("actor_ulid", view.ulid.clone())
        .set_opt("actor_version_number", view.version_number.clone())
        .set_opt("actor_version_state", view.version_state.clone())
        .set_opt("actor_latest_version", view.latest_version)
        .set_opt("actor_last_update_date", view.last_update_date.clone())
        .set_opt("actor_names", view.name.clone())
        .set_opt("actor_abbreviated_names", view.abbreviated_name.clone())
        .set_opt("actor_status_from_date", view.actor_status_from_date.clone())
        .set_opt(
            "actor_country_name",
            view.country.as_ref().and_then(|c| c.name.clone()),
        )
        .set_opt(
            "actor_country_type",
            view.country.as_ref().and_then(|c| c.kind.clone()),
        )
        .set_opt("actor_geographical_address", view.geographical_address.clone())
        .set_opt(
            "european_vat_number_applicable",
            view.european_vat_number_applicable,
        )
        .set_opt(
            "organization_identification_documents",
            view.organization_identification_documents.clone(),
        )
        .set_opt(
            "authorised_representatives",
            view.authorised_representatives.clone(),
        )
        .set_opt(
            "competent_authority_responsibility",
            view.competent_authority_responsibility.clone(),
        )
        .set_opt("legislation_links", view.legislation_links.clone())
        .set_opt("latest_subsidiary", view.latest_subsidiary.clone())
        .set_opt("certificates", view.certificates.clone())
        .set_opt("accuracy_data", view.accuracy_data.clone())
        .set_opt("last_accuracy_date", view.last_accuracy_date.clone());

    for (column, key) in [
        ("actor_address", "actorAddress"),
        ("validator_address", "validatorAddress"),
        ("regulatory_compliance_responsibles", "regulatoryComplianceResponsibles"),
    ] {
        payload.set(column, raw_section(&details.raw, key));
    }

    payload
}

fn raw_section(raw: &Value, key: &str) -> Value {
    raw.get("actorDataPublicView")
        .and_then(|view| view.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

#[async_trait]
impl<'a> StageWorker for CompanyDetailsStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::GotCompanyDetails
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        let Some(uuid) = non_blank(company.eudamed_uuid.as_deref()) else {
            return Ok(Outcome::NoInput);
        };

        let details = self.ctx.registry.actor_details(uuid).await?;
        let view = details.actor_data_public_view.as_ref().ok_or_else(|| {
            AppError::ExternalApiError(format!("No actorDataPublicView for actor {}", uuid))
        })?;

        let mut inserted = 0;
        for contact in view.regulatory_compliance_responsibles.iter().flatten() {
            let address = contact.geographical_address.as_ref();
            let key = ContactKey {
                company_id: company.id,
                email: contact.electronic_mail.clone(),
                phone: contact.telephone.clone(),
                first_name: contact.first_name.clone(),
                family_name: contact.family_name.clone(),
                position: contact.position.clone(),
            };
            let iso_code = address
                .and_then(|a| a.country.as_ref())
                .and_then(|c| c.iso2_code.clone());
            if insert_contact_if_absent(
                self.ctx.store.as_ref(),
                &self.ctx.cities,
                key,
                address.and_then(|a| a.city_name.as_deref()),
                iso_code,
            )
            .await?
            {
                inserted += 1;
            }
        }
        if inserted > 0 {
            tracing::debug!("Inserted {} contact(s) for {}", inserted, company.display_name());
        }

        let city_name = view
            .actor_address
            .as_ref()
            .and_then(|a| a.city_name.as_deref());
        let city_id = self.ctx.cities.get_or_create(city_name).await?;

        let mut payload = company_fields(&details, view);
        payload.set("city_id", city_id.to_string());
        Ok(Outcome::Advance(payload))
    }
}
