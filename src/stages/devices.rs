use async_trait::async_trait;

use crate::dedup::find_by_registry_id;
use crate::errors::AppError;
use crate::models::Company;
use crate::payload::UpdatePayload;
use crate::registry::DeviceSummary;
use crate::runner::{Outcome, StageWorker};
use crate::status::Stage;
use crate::store::Table;

use super::{non_blank, PipelineContext, MAX_LISTING_PAGES};

/// Lists every device registered under the company's SRN and stores each
/// one as a product.
pub struct DevicesStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> DevicesStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    /// Inserts a new product or refreshes the name and owner of a known one.
    /// Known products keep their status.
    async fn store_device(&self, company: &Company, device: &DeviceSummary) -> Result<bool, AppError> {
        let Some(uuid) = non_blank(device.uuid.as_deref()) else {
            return Ok(false);
        };
        let store = self.ctx.store.as_ref();

        let mut payload = UpdatePayload::new();
        payload
            .set_opt("name", device.trade_name.clone())
            .set("company_id", company.id.to_string());

        match find_by_registry_id(store, Table::Products, uuid).await? {
            Some(id) => {
                store.update(Table::Products, id, &payload).await?;
                Ok(false)
            }
            None => {
                payload.set("eudamed_uuid", uuid);
                store
                    .insert(Table::Products, &payload.with_status(Stage::GotCompanyDevices))
                    .await?;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl<'a> StageWorker for DevicesStage<'a> {
    type Record = Company;

    fn target(&self) -> Stage {
        Stage::GotCompanyDevices
    }

    async fn process(&self, company: &Company) -> Result<Outcome, AppError> {
        let Some(srn) = non_blank(company.eudamed_identifier.as_deref()) else {
            return Ok(Outcome::NoInput);
        };

        let (mut seen, mut inserted) = (0, 0);
        for page in 0..MAX_LISTING_PAGES {
            let listing = self.ctx.registry.list_devices(srn, page).await?;
            let last = listing.is_last();
            let devices = listing.into_items();
            if devices.is_empty() {
                break;
            }
            for device in &devices {
                seen += 1;
                if self.store_device(company, device).await? {
                    inserted += 1;
                }
            }
            if last {
                break;
            }
        }

        tracing::info!(
            "{}: {} device(s) listed, {} new",
            company.display_name(),
            seen,
            inserted
        );
        Ok(Outcome::Advance(UpdatePayload::new()))
    }
}
