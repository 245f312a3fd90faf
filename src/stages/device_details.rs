use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::Product;
use crate::payload::UpdatePayload;
use crate::registry::{CodeRef, DeviceDetails};
use crate::runner::{Outcome, StageWorker};
use crate::status::Stage;

use super::{non_blank, PipelineContext};

pub struct DeviceDetailsStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> DeviceDetailsStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }
}

fn code(value: &Option<CodeRef>) -> Option<String> {
    value.as_ref().and_then(|c| c.code.clone())
}

/// Product columns derived from a device record.
pub fn product_fields(details: &DeviceDetails) -> UpdatePayload {
    let mut payload = UpdatePayload::new();

    payload
        .set_opt("eudamed_ulid", details.ulid.clone())
        .set_opt("udi_di_data", details.udi_di_data.clone())
        .set_opt("active", details.active)
        .set_opt("administering_medicine", details.administering_medicine)
        .set_opt("animal_tissues", details.animal_tissues)
        .set_opt("human_tissues", details.human_tissues)
        .set_opt("human_product", details.human_product)
        .set_opt("medicinal_product", details.medicinal_product)
        .set_opt("implantable", details.implantable)
        .set_opt("measuring_function", details.measuring_function)
        .set_opt("reusable", details.reusable)
        .set_opt("nb_decision", details.nb_decision.clone())
        .set_opt("device_criterion", details.device_criterion.clone())
        .set_opt("device_model", details.device_model.clone())
        .set_opt("device_model_applicable", details.device_model_applicable)
        .set_opt("device_name", details.device_name.clone())
        .set_opt("legislation", code(&details.legislation))
        .set_opt("risk_class", code(&details.risk_class))
        .set_opt(
            "special_device_type_applicable",
            details.special_device_type_applicable,
        )
        .set_opt("version_date", details.version_date.clone())
        .set_opt("version_state", code(&details.version_state))
        .set_opt("latest_version", details.latest_version)
        .set_opt("version_number", details.version_number.clone());

    if let Some(m) = &details.manufacturer {
        payload
            .set_opt("manufacturer_eudamed_uuid", m.uuid.clone())
            .set_opt("manufacturer_ulid", m.ulid.clone())
            .set_opt("manufacturer_version_number", m.version_number.clone())
            .set_opt("manufacturer_version_state", code(&m.version_state))
            .set_opt("manufacturer_latest_version", m.latest_version)
            .set_opt("manufacturer_last_update_date", m.last_update_date.clone())
            .set_opt("manufacturer_name", m.name.clone())
            .set_opt("manufacturer_actor_type", code(&m.actor_type))
            .set_opt("manufacturer_status", code(&m.status))
            .set_opt("manufacturer_country_iso2_code", m.country_iso2_code.clone())
            .set_opt("manufacturer_country_name", m.country_name.clone())
            .set_opt("manufacturer_country_type", m.country_type.clone())
            .set_opt("manufacturer_geographical_address", m.geographical_address.clone())
            .set_opt("manufacturer_electronic_mail", m.electronic_mail.clone())
            .set_opt("manufacturer_telephone", m.telephone.clone())
            .set_opt("manufacturer_srn", m.srn.clone());
    }

    if let Some(ar) = &details.authorised_representative {
        payload
            .set_opt("ar_non_eu_manufacturer_uuid", ar.non_eu_manufacturer_uuid.clone())
            .set_opt("ar_uuid", ar.authorised_representative_uuid.clone())
            .set_opt("ar_ulid", ar.authorised_representative_ulid.clone())
            .set_opt("ar_name", ar.name.clone())
            .set_opt("ar_srn", ar.srn.clone())
            .set_opt("ar_address", ar.address.clone())
            .set_opt("ar_country_name", ar.country_name.clone())
            .set_opt("ar_email", ar.email.clone())
            .set_opt("ar_telephone", ar.telephone.clone())
            .set_opt("ar_version_number", ar.version_number.clone())
            .set_opt("ar_version_state", code(&ar.version_state))
            .set_opt("ar_latest_version", ar.latest_version)
            .set_opt("ar_last_update_date", ar.last_update_date.clone());
    }

    if let Some(udi) = &details.basic_udi {
        payload
            .set_opt("basic_udi_uuid", udi.uuid.clone())
            .set_opt("basic_udi_code", udi.code.clone())
            .set_opt("basic_udi_issuing_agency", code(&udi.issuing_agency))
            .set_opt("basic_udi_type", udi.kind.clone());
    }

    payload
}

#[async_trait]
impl<'a> StageWorker for DeviceDetailsStage<'a> {
    type Record = Product;

    fn target(&self) -> Stage {
        Stage::GotCompanyDevicesDetails
    }

    async fn process(&self, product: &Product) -> Result<Outcome, AppError> {
        let Some(uuid) = non_blank(product.eudamed_uuid.as_deref()) else {
            return Ok(Outcome::NoInput);
        };

        let details = self.ctx.registry.device_details(uuid).await?;
        Ok(Outcome::Advance(product_fields(&details)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_fields_flatten_codes() {
        let details: DeviceDetails = serde_json::from_value(json!({
            "riskClass": {"code": "refdata.risk-class.class-iib"},
            "medicinalProduct": false,
            "humanTissues": null,
            "manufacturer": {"latestVersion": true, "srn": "DE-MF-000001"},
            "basicUdi": {"issuingAgency": {"code": "refdata.issuing-agency.gs1"}}
        }))
        .unwrap();

        let payload = product_fields(&details);
        assert_eq!(payload.get("risk_class"), Some(&json!("refdata.risk-class.class-iib")));
        assert_eq!(payload.get("medicinal_product"), Some(&json!(false)));
        assert_eq!(payload.get("manufacturer_latest_version"), Some(&json!(true)));
        assert_eq!(payload.get("manufacturer_srn"), Some(&json!("DE-MF-000001")));
        assert_eq!(
            payload.get("basic_udi_issuing_agency"),
            Some(&json!("refdata.issuing-agency.gs1"))
        );
        assert!(payload.get("human_tissues").is_none());
        assert!(payload.get("ar_name").is_none());
    }
}
