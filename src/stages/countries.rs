//! Seeds the `countries` table that drives company discovery.

use crate::errors::AppError;
use crate::payload::UpdatePayload;
use crate::registry::CountryEntry;
use crate::store::Table;

use super::{non_blank, PipelineContext};

/// Country list shipped with the binary, in the registry's shape.
const BUNDLED_COUNTRIES: &str = include_str!("../../data/countries.json");

/// Where `seed_countries` takes the country list from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountrySource {
    Registry,
    Bundled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedReport {
    pub seen: usize,
    pub upserted: usize,
    /// Entries without an ISO code.
    pub skipped: usize,
}

pub fn bundled_countries() -> Result<Vec<CountryEntry>, AppError> {
    serde_json::from_str(BUNDLED_COUNTRIES)
        .map_err(|e| AppError::Decode(format!("Failed to parse bundled country list: {}", e)))
}

/// Upserts every country of `source` on `iso_code`.
pub async fn seed_countries(
    ctx: &PipelineContext,
    source: CountrySource,
) -> Result<SeedReport, AppError> {
    let entries = match source {
        CountrySource::Registry => ctx.registry.list_countries().await?,
        CountrySource::Bundled => bundled_countries()?,
    };

    let mut report = SeedReport::default();
    for entry in &entries {
        report.seen += 1;
        let Some(iso) = non_blank(entry.iso2_code.as_deref()) else {
            tracing::debug!("Skipping country without ISO code: {:?}", entry.name);
            report.skipped += 1;
            continue;
        };

        let mut payload = UpdatePayload::new();
        payload
            .set("iso_code", iso.to_uppercase())
            .set_opt("name", entry.name.clone())
            .set_opt("type", entry.kind.clone())
            .set_opt("non_EU_Member_State", entry.non_eu_member_state);
        ctx.store.upsert(Table::Countries, "iso_code", &payload).await?;
        report.upserted += 1;
    }

    tracing::info!(
        "Seeded {} countries ({} without ISO code skipped)",
        report.upserted,
        report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_list_decodes() {
        let countries = bundled_countries().unwrap();
        assert!(countries.len() > 200);
        let austria = countries
            .iter()
            .find(|c| c.iso2_code.as_deref() == Some("AT"))
            .unwrap();
        assert_eq!(austria.kind.as_deref(), Some("EU_MEMBER_STATE"));
        assert_eq!(austria.non_eu_member_state, Some(false));
        assert!(countries.iter().all(|c| c.iso2_code.is_some()));
    }
}
