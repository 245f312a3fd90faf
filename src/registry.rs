//! EUDAMED public registry client.
//!
//! Every response decodes once into an optional-field schema; fields the
//! registry omits or nulls simply stay `None`.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::errors::AppError;
use crate::retry::RetryPolicy;

pub const DEFAULT_PAGE_SIZE: u32 = 300;
const LANGUAGE: &str = "en";

// ============ Shared shapes ============

/// Reference-data value, e.g. `{"code": "refdata.risk-class.class-iib"}`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeRef {
    pub code: Option<String>,
    pub srn_code: Option<String>,
    pub category: Option<String>,
    pub access_type: Option<String>,
}

/// One page of a registry listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub content: Option<Vec<T>>,
    pub last: Option<bool>,
}

impl<T> Page<T> {
    pub fn into_items(self) -> Vec<T> {
        self.content.unwrap_or_default()
    }

    /// A page without a `last` flag is treated as the final one.
    pub fn is_last(&self) -> bool {
        self.last.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub iso2_code: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Entry of the registry's country reference list.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CountryEntry {
    pub name: Option<String>,
    /// `EU_MEMBER_STATE`, `EU_EXTENDED`, `EU_SPECIAL` or `NON_EU`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub iso2_code: Option<String>,
    #[serde(rename = "nonEUMemberState")]
    pub non_eu_member_state: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub city_name: Option<String>,
    pub country: Option<Country>,
}

// ============ Actors ============

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActorSummary {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub srn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactPersonView {
    pub first_name: Option<String>,
    pub family_name: Option<String>,
    pub electronic_mail: Option<String>,
    pub telephone: Option<String>,
    pub position: Option<String>,
    pub geographical_address: Option<Address>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActorPublicView {
    pub actor_status: Option<CodeRef>,
    pub actor_status_from_date: Option<String>,
    pub actor_address: Option<Address>,
    #[serde(rename = "type")]
    pub actor_type: Option<CodeRef>,
    pub country: Option<Country>,
    pub trade_register: Option<String>,
    pub eori: Option<String>,
    pub european_vat_number: Option<String>,
    pub european_vat_number_applicable: Option<bool>,
    pub eudamed_identifier: Option<String>,
    pub telephone: Option<String>,
    pub electronic_mail: Option<String>,
    pub website: Option<String>,
    pub validator_name: Option<String>,
    pub validator_uuid: Option<String>,
    pub validator_type: Option<CodeRef>,
    pub validator_srn: Option<String>,
    pub validator_email: Option<String>,
    pub validator_telephone: Option<String>,
    pub ulid: Option<String>,
    pub version_number: Option<Value>,
    pub version_state: Option<Value>,
    pub latest_version: Option<bool>,
    pub last_update_date: Option<String>,
    pub name: Option<Value>,
    pub abbreviated_name: Option<Value>,
    pub geographical_address: Option<Value>,
    pub competent_authority_responsibility: Option<Value>,
    pub organization_identification_documents: Option<Value>,
    pub authorised_representatives: Option<Value>,
    pub regulatory_compliance_responsibles: Option<Vec<ContactPersonView>>,
    pub legislation_links: Option<Value>,
    pub latest_subsidiary: Option<Value>,
    pub certificates: Option<Value>,
    pub accuracy_data: Option<Value>,
    pub last_accuracy_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActorDetails {
    /// Present only on error bodies.
    pub http_status_code: Option<i64>,
    pub http_status: Option<String>,
    pub actor_data_public_view: Option<ActorPublicView>,
    pub importers: Option<Value>,
    pub non_eu_manufacturers: Option<Value>,
    /// Undecoded response, stored verbatim.
    #[serde(skip)]
    pub raw: Value,
}

// ============ Devices ============

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub uuid: Option<String>,
    pub trade_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturerRef {
    pub uuid: Option<String>,
    pub ulid: Option<String>,
    pub version_number: Option<Value>,
    pub version_state: Option<CodeRef>,
    pub latest_version: Option<bool>,
    pub last_update_date: Option<String>,
    pub name: Option<String>,
    pub actor_type: Option<CodeRef>,
    pub status: Option<CodeRef>,
    pub country_iso2_code: Option<String>,
    pub country_name: Option<String>,
    pub country_type: Option<String>,
    pub geographical_address: Option<Value>,
    pub electronic_mail: Option<String>,
    pub telephone: Option<String>,
    pub srn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorisedRepresentativeRef {
    pub non_eu_manufacturer_uuid: Option<String>,
    pub authorised_representative_uuid: Option<String>,
    pub authorised_representative_ulid: Option<String>,
    pub name: Option<String>,
    pub srn: Option<String>,
    pub address: Option<Value>,
    pub country_name: Option<String>,
    pub email: Option<String>,
    pub telephone: Option<String>,
    pub version_number: Option<Value>,
    pub version_state: Option<CodeRef>,
    pub latest_version: Option<bool>,
    pub last_update_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BasicUdiRef {
    pub uuid: Option<String>,
    pub code: Option<String>,
    pub issuing_agency: Option<CodeRef>,
    #[serde(rename = "type")]
    pub kind: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub ulid: Option<String>,
    pub udi_di_data: Option<Value>,
    pub manufacturer: Option<ManufacturerRef>,
    pub authorised_representative: Option<AuthorisedRepresentativeRef>,
    pub active: Option<bool>,
    pub administering_medicine: Option<bool>,
    pub animal_tissues: Option<bool>,
    pub human_tissues: Option<bool>,
    pub human_product: Option<bool>,
    pub medicinal_product: Option<bool>,
    pub implantable: Option<bool>,
    pub measuring_function: Option<bool>,
    pub reusable: Option<bool>,
    pub nb_decision: Option<Value>,
    pub basic_udi: Option<BasicUdiRef>,
    pub device_criterion: Option<Value>,
    pub device_model: Option<Value>,
    pub device_model_applicable: Option<bool>,
    pub device_name: Option<Value>,
    pub legislation: Option<CodeRef>,
    pub risk_class: Option<CodeRef>,
    pub special_device_type_applicable: Option<bool>,
    pub version_date: Option<String>,
    pub version_state: Option<CodeRef>,
    pub latest_version: Option<bool>,
    pub version_number: Option<Value>,
}

// ============ Certificates ============

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub uuid: Option<String>,
    pub certificate_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotifiedBody {
    pub uuid: Option<String>,
    pub version_number: Option<Value>,
    pub version_state: Option<CodeRef>,
    pub latest_version: Option<bool>,
    pub last_update_date: Option<String>,
    pub name: Option<String>,
    pub actor_type: Option<CodeRef>,
    pub status: Option<CodeRef>,
    pub status_from_date: Option<String>,
    pub country_iso2_code: Option<String>,
    pub country_name: Option<String>,
    pub country_type: Option<String>,
    pub geographical_address: Option<Value>,
    pub electronic_mail: Option<String>,
    pub telephone: Option<String>,
    pub srn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub uuid: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<Value>,
    pub unregistered_device: Option<Value>,
    pub is_preceding: Option<bool>,
    pub quality_procedure_scope_type: Option<Value>,
    #[serde(rename = "customMadeClassIIIImplantable")]
    pub custom_made_class_iii_implantable: Option<Value>,
    pub description: Option<Value>,
    pub basic_udi_data: Option<Value>,
    pub name: Option<Value>,
    pub reference_catalogue_number: Option<Value>,
    pub device_group_identification: Option<Value>,
    pub risk_classes: Option<Vec<CodeRef>>,
    pub device_characteristics: Option<Vec<CodeRef>>,
    pub system_procedure_pack: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub iso_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub uuid: Option<String>,
    pub original_file_name: Option<String>,
    pub file_content_type: Option<String>,
    pub file_size: Option<Value>,
    pub temp_file_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<CodeRef>,
    pub languages: Option<Vec<Language>>,
    pub reference_doc_id: Option<Value>,
    pub primary_module_name: Option<String>,
    pub indexed: Option<bool>,
    pub virus_check: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Legislation {
    pub code: Option<String>,
    pub legacy_directive: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActorRef {
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDetails {
    pub manufacturer: Option<ActorRef>,
    pub notified_body: Option<NotifiedBody>,
    pub ulid: Option<String>,
    pub certificate_number: Option<String>,
    pub revision_number: Option<Value>,
    pub issue_date: Option<String>,
    pub decision_date: Option<String>,
    pub starting_validity_date: Option<String>,
    pub expiry_date: Option<String>,
    pub certificate_id: Option<Value>,
    pub status_change_reasons: Option<Value>,
    pub applicable_legislation: Option<Legislation>,
    #[serde(rename = "type")]
    pub kind: Option<CodeRef>,
    pub status: Option<CodeRef>,
    pub conditions_applicable: Option<Value>,
    pub animal_tissues: Option<bool>,
    pub human_tissues: Option<bool>,
    pub sterile: Option<bool>,
    pub in_vitro_diagnostics: Option<bool>,
    pub intended_medical_purpose: Option<Value>,
    pub cecp_applicable: Option<bool>,
    pub decision_comments: Option<Value>,
    pub other_decision_reasons: Option<Value>,
    pub mos_outside_eudamed: Option<Value>,
    pub ivdr_mechanism_of_scrutiny: Option<Value>,
    pub mechanism_of_scrutiny_enabled: Option<bool>,
    pub sscp_enabled: Option<bool>,
    pub starting_decision_applicability_date: Option<String>,
    pub qms_mos_type: Option<Value>,
    pub version_date: Option<String>,
    pub version_number: Option<Value>,
    pub version_state: Option<CodeRef>,
    pub latest_version: Option<bool>,
    pub discarded_date: Option<String>,
    pub scopes: Option<Vec<Scope>>,
    pub documents: Option<Vec<Document>>,
}

// ============ Client ============

pub struct RegistryClient {
    client: Client,
    base_url: String,
    page_size: u32,
    actor_retry: RetryPolicy,
    detail_retry: RetryPolicy,
    listing_retry: RetryPolicy,
}

impl RegistryClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build registry client: {}", e)))?;
        let delay = Duration::from_secs(config.registry_retry_delay_secs);

        Ok(Self {
            client,
            base_url: config.eudamed_base_url.clone(),
            page_size: DEFAULT_PAGE_SIZE,
            actor_retry: RetryPolicy::fixed(3, delay),
            detail_retry: RetryPolicy::fixed(2, delay),
            listing_retry: RetryPolicy::fixed(3, delay),
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, AppError> {
        Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| AppError::InternalError(format!("Failed to build registry URL: {}", e)))
    }

    fn paging(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("page", page.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("size", self.page_size.to_string()),
        ]
    }

    async fn get_value(&self, label: &str, url: Url) -> Result<Value, AppError> {
        tracing::debug!("Registry {} request: {}", label, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::from_request("Registry", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Registry {} returned error {}: {}", label, status, error_text);
            return Err(AppError::from_status(&format!("Registry {}", label), status));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::from_request("Registry", e))
    }

    async fn get_json<T: DeserializeOwned>(&self, label: &str, url: Url) -> Result<T, AppError> {
        let value = self.get_value(label, url).await?;
        serde_json::from_value(value).map_err(|e| {
            AppError::Decode(format!("Failed to parse registry {} response: {}", label, e))
        })
    }

    async fn get_listing<T: DeserializeOwned>(&self, label: &str, url: Url) -> Result<T, AppError> {
        self.listing_retry
            .run(&format!("Registry {}", label), || self.get_json(label, url.clone()))
            .await
    }

    /// Reference list of every country the registry knows, with its EU
    /// membership classification.
    pub async fn list_countries(&self) -> Result<Vec<CountryEntry>, AppError> {
        let url = self.url("/countries", &[("languageIso2Code", LANGUAGE.to_string())])?;
        self.get_listing("country list", url).await
    }

    /// One page of economic operators registered in `country`.
    pub async fn list_actors(
        &self,
        country: &str,
        page: u32,
    ) -> Result<Page<ActorSummary>, AppError> {
        let mut params = self.paging(page);
        params.push(("sort", "srn,ASC".to_string()));
        params.push(("countryIso2Code", country.to_string()));
        params.push(("languageIso2Code", LANGUAGE.to_string()));
        let url = self.url("/eos", &params)?;
        self.get_listing("actor list", url).await
    }

    /// Public information of one actor. An error body carrying
    /// `httpStatusCode` is reported as an API error.
    pub async fn actor_details(&self, uuid: &str) -> Result<ActorDetails, AppError> {
        let url = self.url(
            &format!("/actors/{}/publicInformation", uuid),
            &[("languageIso2Code", LANGUAGE.to_string())],
        )?;

        let raw = self
            .actor_retry
            .run("Registry actor details", || self.get_value("actor details", url.clone()))
            .await?;

        let mut details: ActorDetails = serde_json::from_value(raw.clone()).map_err(|e| {
            AppError::Decode(format!("Failed to parse registry actor {}: {}", uuid, e))
        })?;

        if let Some(code) = details.http_status_code {
            return Err(AppError::ExternalApiError(format!(
                "Registry returned error {} ({}) for actor {}",
                code,
                details.http_status.as_deref().unwrap_or("unknown"),
                uuid
            )));
        }

        details.raw = raw;
        Ok(details)
    }

    /// One page of devices registered under a manufacturer SRN.
    pub async fn list_devices(
        &self,
        srn: &str,
        page: u32,
    ) -> Result<Page<DeviceSummary>, AppError> {
        let mut params = self.paging(page);
        params.push(("iso2Code", LANGUAGE.to_string()));
        params.push(("srn", srn.to_string()));
        params.push(("languageIso2Code", LANGUAGE.to_string()));
        let url = self.url("/devices/udiDiData", &params)?;
        self.get_listing("device list", url).await
    }

    pub async fn device_details(&self, uuid: &str) -> Result<DeviceDetails, AppError> {
        let url = self.url(
            &format!("/devices/basicUdiData/udiDiData/{}", uuid),
            &[("languageIso2Code", LANGUAGE.to_string())],
        )?;
        self.detail_retry
            .run("Registry device details", || {
                self.get_json("device details", url.clone())
            })
            .await
    }

    /// One page of certificates held by a manufacturer SRN.
    pub async fn list_certificates(
        &self,
        srn: &str,
        page: u32,
    ) -> Result<Page<CertificateSummary>, AppError> {
        let mut params = self.paging(page);
        params.push(("srn", srn.to_string()));
        params.push(("languageIso2Code", LANGUAGE.to_string()));
        let url = self.url("/certificates/search", &params)?;
        self.get_listing("certificate list", url).await
    }

    pub async fn certificate_details(&self, uuid: &str) -> Result<CertificateDetails, AppError> {
        let url = self.url(
            &format!("/certificates/{}", uuid),
            &[("languageIso2Code", LANGUAGE.to_string())],
        )?;
        self.detail_retry
            .run("Registry certificate details", || {
                self.get_json("certificate details", url.clone())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_without_last_is_final() {
        let page: Page<DeviceSummary> =
            serde_json::from_value(json!({"content": [{"uuid": "d-1", "tradeName": "Stent"}]}))
                .unwrap();
        assert!(page.is_last());
        let items = page.into_items();
        assert_eq!(items[0].trade_name.as_deref(), Some("Stent"));
    }

    #[test]
    fn test_null_content_is_empty() {
        let page: Page<ActorSummary> =
            serde_json::from_value(json!({"content": null, "last": false})).unwrap();
        assert!(!page.is_last());
        assert!(page.into_items().is_empty());
    }

    #[test]
    fn test_actor_details_tolerates_missing_nested_fields() {
        let details: ActorDetails = serde_json::from_value(json!({
            "actorDataPublicView": {
                "type": {"srnCode": "MF"},
                "actorAddress": {"cityName": null},
                "website": "www.acme.at",
                "regulatoryComplianceResponsibles": null
            },
            "importers": []
        }))
        .unwrap();

        let view = details.actor_data_public_view.unwrap();
        assert_eq!(view.actor_type.unwrap().srn_code.as_deref(), Some("MF"));
        assert_eq!(view.actor_address.unwrap().city_name, None);
        assert!(view.regulatory_compliance_responsibles.is_none());
        assert_eq!(details.http_status_code, None);
    }

    #[test]
    fn test_country_entry_renames() {
        let entries: Vec<CountryEntry> = serde_json::from_value(json!([
            {"name": "Austria", "type": "EU_MEMBER_STATE", "iso2Code": "AT", "nonEUMemberState": false},
            {"name": "Switzerland", "type": "NON_EU", "iso2Code": "CH", "nonEUMemberState": true}
        ]))
        .unwrap();
        assert_eq!(entries[0].kind.as_deref(), Some("EU_MEMBER_STATE"));
        assert_eq!(entries[1].iso2_code.as_deref(), Some("CH"));
        assert_eq!(entries[1].non_eu_member_state, Some(true));
    }

    #[test]
    fn test_certificate_scope_renames() {
        let scope: Scope = serde_json::from_value(json!({
            "uuid": "s-1",
            "customMadeClassIIIImplantable": "NO",
            "riskClasses": [{"code": "refdata.risk-class.class-iii"}]
        }))
        .unwrap();
        assert_eq!(scope.custom_made_class_iii_implantable, Some(json!("NO")));
        assert_eq!(scope.risk_classes.unwrap()[0].code.as_deref(), Some("refdata.risk-class.class-iii"));
    }
}
