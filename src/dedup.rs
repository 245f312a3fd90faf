//! Get-or-create and exists-before-insert helpers.
//!
//! All of these are check-then-insert; two writers racing on the same key
//! can still create a duplicate. City lookups are coalesced per process.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ContactKey, NewContactPerson};
use crate::payload::UpdatePayload;
use crate::store::{RecordStore, Table};

/// City name used when the registry gives none.
pub const UNKNOWN_CITY: &str = "Unknown";

/// Column holding the registry UUID on every registry-sourced table.
pub const REGISTRY_ID_COLUMN: &str = "eudamed_uuid";

/// Id of the record carrying registry UUID `eudamed_uuid`, if stored already.
pub async fn find_by_registry_id(
    store: &dyn RecordStore,
    table: Table,
    eudamed_uuid: &str,
) -> Result<Option<Uuid>, AppError> {
    store.find_id(table, REGISTRY_ID_COLUMN, eudamed_uuid).await
}

/// Cached name → id resolution over the `cities` table.
#[derive(Clone)]
pub struct CityResolver {
    store: Arc<dyn RecordStore>,
    cache: Cache<String, Uuid>,
}

impl CityResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(86400))
            .max_capacity(50_000)
            .build();
        Self { store, cache }
    }

    /// Returns the id of city `name`, creating the row on first reference.
    /// Blank or missing names resolve to [`UNKNOWN_CITY`].
    pub async fn get_or_create(&self, name: Option<&str>) -> Result<Uuid, AppError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_CITY)
            .to_string();

        let store = self.store.clone();
        let key = name.clone();
        self.cache
            .try_get_with(key, async move {
                if let Some(id) = store.find_id(Table::Cities, "name", &name).await? {
                    return Ok(id);
                }
                let mut payload = UpdatePayload::new();
                payload.set("name", name.as_str());
                let id = store.insert(Table::Cities, &payload).await?;
                tracing::debug!("Created city {} ({})", name, id);
                Ok(id)
            })
            .await
            .map_err(|e: Arc<AppError>| {
                Arc::try_unwrap(e).unwrap_or_else(|shared| shared.duplicate())
            })
    }
}

/// Inserts a contact person unless one with the same composite key exists.
/// Returns whether a row was inserted. The city is only resolved for new
/// contacts.
pub async fn insert_contact_if_absent(
    store: &dyn RecordStore,
    cities: &CityResolver,
    key: ContactKey,
    city_name: Option<&str>,
    iso_code: Option<String>,
) -> Result<bool, AppError> {
    if store.contact_exists(&key).await? {
        tracing::debug!("Contact already present for company {}", key.company_id);
        return Ok(false);
    }

    let city_id = cities.get_or_create(city_name).await?;
    let contact = NewContactPerson {
        key,
        city_id: Some(city_id),
        iso_code,
    };
    store
        .insert(Table::ContactPeople, &UpdatePayload::from_serializable(&contact)?)
        .await?;
    Ok(true)
}
