use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::status::Stage;

// ============ Database Models ============

/// A medical-device manufacturer (or other registry actor).
///
/// Only the columns the pipeline reads back are mapped here; the registry
/// fields written by the details stage live in the table but are never
/// read by the pipeline itself.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Company {
    /// Internal identifier.
    pub id: Uuid,
    /// Actor UUID in the registry.
    pub eudamed_uuid: Option<String>,
    /// Registered name.
    pub name: Option<String>,
    /// ISO 3166 alpha-2 country code.
    pub iso_code: Option<String>,
    /// Actor type code (e.g. "MF" for manufacturer).
    pub eudamed_type: Option<String>,
    /// Single registration number (SRN).
    pub eudamed_identifier: Option<String>,
    /// Verified or cleaned website domain.
    pub website: Option<String>,
    /// Website as declared in the registry.
    pub original_website: Option<String>,
    /// Employee count derived from web pages.
    pub empl_website: Option<i64>,
    /// Last completed pipeline stage.
    pub scraping_status: Option<String>,
    /// Stage whose last attempt failed, if any.
    pub error_stage: Option<String>,
}

fn parse_stage(tag: &Option<String>) -> Option<Stage> {
    tag.as_deref().and_then(|s| s.parse().ok())
}

impl Company {
    pub fn status(&self) -> Option<Stage> {
        parse_stage(&self.scraping_status)
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        parse_stage(&self.error_stage)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// The best website known for this company, if any.
    pub fn known_website(&self) -> Option<&str> {
        fn usable(w: &Option<String>) -> Option<&str> {
            w.as_deref().map(str::trim).filter(|w| !w.is_empty())
        }
        usable(&self.website).or_else(|| usable(&self.original_website))
    }
}

/// A device (product) registered by a company.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub eudamed_uuid: Option<String>,
    pub name: Option<String>,
    /// Registry risk class code, e.g. `refdata.risk-class.class-iii`.
    pub risk_class: Option<String>,
    pub medicinal_product: Option<bool>,
    pub human_tissues: Option<bool>,
    pub animal_tissues: Option<bool>,
    pub human_product: Option<bool>,
    pub administering_medicine: Option<bool>,
    pub active: Option<bool>,
    pub manufacturer_latest_version: Option<bool>,
    pub scraping_status: Option<String>,
    pub error_stage: Option<String>,
}

impl Product {
    pub fn status(&self) -> Option<Stage> {
        parse_stage(&self.scraping_status)
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        parse_stage(&self.error_stage)
    }
}

/// A certificate issued by a notified body.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Certificate {
    pub id: Uuid,
    pub eudamed_uuid: Option<String>,
    pub company_id: Option<Uuid>,
    pub certificate_number: Option<String>,
    pub scraping_status: Option<String>,
    pub error_stage: Option<String>,
}

impl Certificate {
    pub fn status(&self) -> Option<Stage> {
        parse_stage(&self.scraping_status)
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        parse_stage(&self.error_stage)
    }
}

/// Firmographic record from the company-enrichment provider.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize, PartialEq)]
pub struct PartnerCompany {
    pub id: Uuid,
    pub eudamed_company_id: Uuid,
    pub estimated_num_employees: Option<i64>,
    pub annual_revenue: Option<f64>,
}

/// Composite identity of a contact person, used for deduplication.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContactKey {
    pub company_id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub family_name: Option<String>,
    pub position: Option<String>,
}

/// A contact person ready for insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewContactPerson {
    #[serde(flatten)]
    pub key: ContactKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_code: Option<String>,
}

/// Number of records per status tag in one table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct StatusCount {
    pub scraping_status: Option<String>,
    pub count: i64,
    /// Records in this group whose last attempt at a stage failed.
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company() -> Company {
        Company {
            id: Uuid::new_v4(),
            eudamed_uuid: None,
            name: Some("Acme".into()),
            iso_code: Some("AT".into()),
            eudamed_type: Some("MF".into()),
            eudamed_identifier: None,
            website: None,
            original_website: None,
            empl_website: None,
            scraping_status: Some("GOT_COMPANY_DETAILS".into()),
            error_stage: None,
        }
    }

    #[test]
    fn test_known_website_prefers_cleaned() {
        let mut c = company();
        assert_eq!(c.known_website(), None);
        c.original_website = Some("http://www.acme.at/".into());
        assert_eq!(c.known_website(), Some("http://www.acme.at/"));
        c.website = Some("acme.at".into());
        assert_eq!(c.known_website(), Some("acme.at"));
        c.website = Some("   ".into());
        assert_eq!(c.known_website(), Some("http://www.acme.at/"));
    }

    #[test]
    fn test_status_parses_tag() {
        let mut c = company();
        assert_eq!(c.status(), Some(Stage::GotCompanyDetails));
        assert_eq!(c.failed_stage(), None);
        c.error_stage = Some("SEARCHED_FOR_WEBSITE".into());
        assert_eq!(c.failed_stage(), Some(Stage::SearchedForWebsite));
        assert_eq!(c.status(), Some(Stage::GotCompanyDetails));
    }
}
