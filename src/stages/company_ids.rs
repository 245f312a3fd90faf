//! Company discovery: walks the registry's actor listing per country and
//! inserts every actor not stored yet.

use crate::dedup::find_by_registry_id;
use crate::errors::AppError;
use crate::payload::UpdatePayload;
use crate::registry::ActorSummary;
use crate::status::Stage;
use crate::store::Table;

use super::{non_blank, PipelineContext, MAX_LISTING_PAGES};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub countries: usize,
    pub seen: usize,
    pub inserted: usize,
    /// Countries whose listing broke off, with the error.
    pub failed: Vec<(String, String)>,
}

/// Discovers companies in `countries`, or in every country of the store
/// when none are given.
pub async fn discover_companies(
    ctx: &PipelineContext,
    countries: Option<Vec<String>>,
) -> Result<DiscoveryReport, AppError> {
    let countries = match countries {
        Some(list) if !list.is_empty() => list,
        _ => ctx.store.country_codes().await?,
    };

    let mut report = DiscoveryReport::default();
    for country in countries {
        report.countries += 1;
        tracing::info!("Discovering companies in {}", country);

        match discover_country(ctx, &country, &mut report).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Discovery in {} stopped: {}", country, e);
                report.failed.push((country, e.to_string()));
            }
        }
    }

    tracing::info!(
        "Discovery finished: {} countries, {} actors seen, {} inserted",
        report.countries,
        report.seen,
        report.inserted
    );
    Ok(report)
}

async fn discover_country(
    ctx: &PipelineContext,
    country: &str,
    report: &mut DiscoveryReport,
) -> Result<(), AppError> {
    for page in 0..MAX_LISTING_PAGES {
        let listing = ctx.registry.list_actors(country, page).await?;
        let last = listing.is_last();
        let actors = listing.into_items();
        if actors.is_empty() {
            break;
        }

        for actor in &actors {
            report.seen += 1;
            if insert_if_new(ctx, actor, country).await? {
                report.inserted += 1;
            }
        }

        if last {
            break;
        }
    }
    Ok(())
}

async fn insert_if_new(
    ctx: &PipelineContext,
    actor: &ActorSummary,
    country: &str,
) -> Result<bool, AppError> {
    let Some(uuid) = non_blank(actor.uuid.as_deref()) else {
        tracing::debug!("Skipping actor without uuid: {:?}", actor.name);
        return Ok(false);
    };

    if find_by_registry_id(ctx.store.as_ref(), Table::Companies, uuid)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    let mut payload = UpdatePayload::new();
    payload
        .set("eudamed_uuid", uuid)
        .set("iso_code", country)
        .set_opt("name", actor.name.clone())
        .set_opt("eudamed_identifier", actor.srn.clone());
    ctx.store
        .insert(Table::Companies, &payload.with_status(Stage::GotCompanyId))
        .await?;

    tracing::debug!("Inserted company {} ({})", actor.name.as_deref().unwrap_or("?"), uuid);
    Ok(true)
}
