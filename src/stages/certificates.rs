//! Certificate discovery per company and certificate detail enrichment.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::dedup::{find_by_registry_id, REGISTRY_ID_COLUMN};
use crate::errors::AppError;
use crate::models::{Certificate, Company};
use crate::payload::UpdatePayload;
use crate::registry::{CertificateDetails, CertificateSummary, CodeRef, Document, NotifiedBody, Scope};
use crate::runner::{Outcome, StageWorker};
use crate::status::Stage;
use crate::store::Table;

use super::{non_blank, PipelineContext, MAX_LISTING_PAGES};

fn code(value: &Option<CodeRef>) -> Option<String> {
    value.as_ref().and_then(|c| c.code.clone())
}

fn codes(values: &Option<Vec<CodeRef>>) -> Option<Value> {
    values
        .as_ref()
        .filter(|v| !v.is_empty())
        .map(|v| v.iter().filter_map(|c| c.code.clone()).collect::<Vec<_>>().into())
}

/// Lists the certificates held by a company's SRN and stores unseen ones.
pub struct CertificateIdsStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> CertificateIdsStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    async fn store_certificate(
        &self,
        company: &Company,
        summary: &CertificateSummary,
    ) -> Result<bool, AppError> {
        let Some(uuid) = non_blank(summary.uuid.as_deref()) else {
            return Ok(false);
        };
        let store = self.ctx.store.as_ref();
        if find_by_registry_id(store, Table::Certificates, uuid).await?.is_some() {
            return Ok(false);
        }

        let mut payload = UpdatePayload::new();
        payload
            .set("eudamed_uuid", uuid)
            .set("company_id", company.id.to_string())
            .set_opt("certificate_number", summary.certificate_number.clone());
        store
            .insert(Table::Certificates, &payload.with_status(Stage::GotCertificateId))
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl<'a> StageWorker for CertificateIdsStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::GotCertificateId
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        let Some(srn) = non_blank(company.eudamed_identifier.as_deref()) else {
            return Ok(Outcome::NoInput);
        };

        let mut inserted = 0;
        for page in 0..MAX_LISTING_PAGES {
            let listing = self.ctx.registry.list_certificates(srn, page).await?;
            let last = listing.is_last();
            let certificates = listing.into_items();
            if certificates.is_empty() {
                break;
            }
            for summary in &certificates {
                if self.store_certificate(company, summary).await? {
                    inserted += 1;
                }
            }
            if last {
                break;
            }
        }

        tracing::info!("{}: {} new certificate(s)", company.display_name(), inserted);
        Ok(Outcome::Advance(UpdatePayload::new()))
    }
}

/// Certificate columns derived from a certificate record, excluding the
/// owner and notified-body links.
pub fn certificate_fields(details: &CertificateDetails) -> UpdatePayload {
    let mut payload = UpdatePayload::new();
    let legislation = details.applicable_legislation.as_ref();

    payload
        .set_opt("ulid", details.ulid.clone())
        .set_opt("certificate_number", details.certificate_number.clone())
        .set_opt("revision_number", details.revision_number.clone())
        .set_opt("issue_date", details.issue_date.clone())
        .set_opt("decision_date", details.decision_date.clone())
        .set_opt("starting_validity_date", details.starting_validity_date.clone())
        .set_opt("expiry_date", details.expiry_date.clone())
        .set_opt("certificate_id", details.certificate_id.clone())
        .set_opt("status_change_reasons", details.status_change_reasons.clone())
        .set_opt("applicable_legislation_code", legislation.and_then(|l| l.code.clone()))
        .set_opt(
            "applicable_legislation_legacy_directive",
            legislation.and_then(|l| l.legacy_directive.clone()),
        )
        .set_opt("type_code", code(&details.kind))
        .set_opt("status_code", code(&details.status))
        .set_opt("conditions_applicable", details.conditions_applicable.clone())
        .set_opt("animal_tissues", details.animal_tissues)
        .set_opt("human_tissues", details.human_tissues)
        .set_opt("sterile", details.sterile)
        .set_opt("in_vitro_diagnostics", details.in_vitro_diagnostics)
        .set_opt("intended_medical_purpose", details.intended_medical_purpose.clone())
        .set_opt("cecp_applicable", details.cecp_applicable)
        .set_opt("decision_comments", details.decision_comments.clone())
        .set_opt("other_decision_reasons", details.other_decision_reasons.clone())
        .set_opt("mos_outside_eudamed", details.mos_outside_eudamed.clone())
        .set_opt("ivdr_mechanism_of_scrutiny", details.ivdr_mechanism_of_scrutiny.clone())
        .set_opt("mechanism_of_scrutiny_enabled", details.mechanism_of_scrutiny_enabled)
        .set_opt("sscp_enabled", details.sscp_enabled)
        .set_opt(
            "starting_decision_applicability_date",
            details.starting_decision_applicability_date.clone(),
        )
        .set_opt("qms_mos_type", details.qms_mos_type.clone())
        .set_opt("version_date", details.version_date.clone())
        .set_opt("version_number", details.version_number.clone())
        .set_opt("version_state_code", code(&details.version_state))
        .set_opt("latest_version", details.latest_version)
        .set_opt("discarded_date", details.discarded_date.clone());

    payload
}

pub fn notified_body_fields(body: &NotifiedBody) -> UpdatePayload {
    let actor_type = body.actor_type.as_ref();
    let mut payload = UpdatePayload::new();
    payload
        .set_opt("eudamed_uuid", body.uuid.clone())
        .set_opt("version_number", body.version_number.clone())
        .set_opt("version_state_code", code(&body.version_state))
        .set_opt("latest_version", body.latest_version)
        .set_opt("last_update_date", body.last_update_date.clone())
        .set_opt("name", body.name.clone())
        .set_opt("actor_type_code", actor_type.and_then(|t| t.code.clone()))
        .set_opt("actor_type_srn_code", actor_type.and_then(|t| t.srn_code.clone()))
        .set_opt("actor_type_category", actor_type.and_then(|t| t.category.clone()))
        .set_opt("status_code", code(&body.status))
        .set_opt("status_from_date", body.status_from_date.clone())
        .set_opt("country_iso2_code", body.country_iso2_code.clone())
        .set_opt("country_name", body.country_name.clone())
        .set_opt("country_type", body.country_type.clone())
        .set_opt("geographical_address", body.geographical_address.clone())
        .set_opt("electronic_mail", body.electronic_mail.clone())
        .set_opt("telephone", body.telephone.clone())
        .set_opt("srn", body.srn.clone());
    payload
}

pub fn scope_fields(certificate_id: Uuid, scope: &Scope) -> UpdatePayload {
    let mut payload = UpdatePayload::new();
    payload
        .set("certificate_id", certificate_id.to_string())
        .set_opt("eudamed_uuid", scope.uuid.clone())
        .set_opt("type", scope.kind.clone())
        .set_opt("unregistered_device", scope.unregistered_device.clone())
        .set_opt("is_preceding", scope.is_preceding)
        .set_opt("quality_procedure_scope_type", scope.quality_procedure_scope_type.clone())
        .set_opt(
            "custom_made_class_iii_implantable",
            scope.custom_made_class_iii_implantable.clone(),
        )
        .set_opt("description", scope.description.clone())
        .set_opt("basic_udi_data", scope.basic_udi_data.clone())
        .set_opt("name", scope.name.clone())
        .set_opt("reference_catalogue_number", scope.reference_catalogue_number.clone())
        .set_opt("device_group_identification", scope.device_group_identification.clone())
        .set_opt("risk_classes", codes(&scope.risk_classes))
        .set_opt("device_characteristics", codes(&scope.device_characteristics))
        .set_opt("system_procedure_pack", scope.system_procedure_pack.clone());
    payload
}

pub fn document_fields(certificate_id: Uuid, document: &Document) -> UpdatePayload {
    let kind = document.kind.as_ref();
    let languages = document.languages.as_ref().map(|langs| {
        langs
            .iter()
            .filter_map(|l| l.iso_code.clone())
            .collect::<Vec<_>>()
    });
    let mut payload = UpdatePayload::new();
    payload
        .set("certificate_id", certificate_id.to_string())
        .set_opt("eudamed_uuid", document.uuid.clone())
        .set_opt("original_file_name", document.original_file_name.clone())
        .set_opt("file_content_type", document.file_content_type.clone())
        .set_opt("file_size", document.file_size.clone())
        .set_opt("temp_file_name", document.temp_file_name.clone())
        .set_opt("type_code", kind.and_then(|k| k.code.clone()))
        .set_opt("type_access_type", kind.and_then(|k| k.access_type.clone()))
        .set_opt("languages", languages)
        .set_opt("reference_doc_id", document.reference_doc_id.clone())
        .set_opt("primary_module_name", document.primary_module_name.clone())
        .set_opt("indexed", document.indexed)
        .set_opt("virus_check", document.virus_check.clone());
    payload
}

/// Enriches a certificate with its registry record, its notified body, its
/// scopes and its documents.
pub struct CertificateDetailsStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> CertificateDetailsStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    /// Inserts child rows not stored yet. Rows without a registry uuid
    /// cannot be deduplicated and are skipped.
    async fn insert_children(
        &self,
        table: Table,
        certificate_id: Uuid,
        children: Vec<(Option<String>, UpdatePayload)>,
    ) -> Result<usize, AppError> {
        let store = self.ctx.store.as_ref();
        let mut inserted = 0;
        for (uuid, payload) in children {
            let Some(uuid) = uuid else {
                tracing::debug!("Skipping {} row without uuid", table.name());
                continue;
            };
            if store
                .exists_pair(
                    table,
                    ("certificate_id", certificate_id),
                    (REGISTRY_ID_COLUMN, uuid.as_str()),
                )
                .await?
            {
                continue;
            }
            store.insert(table, &payload).await?;
            inserted += 1;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl<'a> StageWorker for CertificateDetailsStage<'a> {
    type Record = Certificate;

    fn target(&self) -> Stage {
        Stage::GotCertificateDetails
    }

    async fn process(&self, certificate: &Certificate) -> Result<Outcome, AppError> {
        let Some(uuid) = non_blank(certificate.eudamed_uuid.as_deref()) else {
            return Ok(Outcome::NoInput);
        };
        let store = self.ctx.store.as_ref();

        let details = self.ctx.registry.certificate_details(uuid).await?;
        let mut payload = certificate_fields(&details);

        if let Some(body) = &details.notified_body {
            if non_blank(body.uuid.as_deref()).is_some() {
                let body_id = store
                    .upsert(Table::NotifiedBodies, REGISTRY_ID_COLUMN, &notified_body_fields(body))
                    .await?;
                payload.set("notified_body_id", body_id.to_string());
            }
        }

        let manufacturer = details
            .manufacturer
            .as_ref()
            .and_then(|m| non_blank(m.uuid.as_deref()));
        if let Some(manufacturer) = manufacturer {
            if let Some(company_id) = find_by_registry_id(store, Table::Companies, manufacturer).await? {
                payload.set("company_id", company_id.to_string());
            }
        }

        let scopes = details
            .scopes
            .iter()
            .flatten()
            .map(|s| (s.uuid.clone(), scope_fields(certificate.id, s)))
            .collect();
        let documents = details
            .documents
            .iter()
            .flatten()
            .map(|d| (d.uuid.clone(), document_fields(certificate.id, d)))
            .collect();
        let scopes = self
            .insert_children(Table::CertificateScopes, certificate.id, scopes)
            .await?;
        let documents = self
            .insert_children(Table::CertificateDocuments, certificate.id, documents)
            .await?;
        tracing::debug!(
            "Certificate {}: {} new scope(s), {} new document(s)",
            uuid,
            scopes,
            documents
        );

        Ok(Outcome::Advance(payload))
    }
}
