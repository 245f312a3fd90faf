//! Enrichment stages, one module per step of the pipeline.

use std::sync::Arc;

use crate::apollo::ApolloClient;
use crate::circuit_breaker::GuardedStore;
use crate::config::Config;
use crate::content::ContentExtractor;
use crate::dedup::CityResolver;
use crate::errors::AppError;
use crate::llm::LlmClient;
use crate::registry::RegistryClient;
use crate::search::SearchClient;
use crate::store::RecordStore;

pub mod apollo_enrich;
pub mod certificates;
pub mod company_details;
pub mod company_ids;
pub mod countries;
pub mod device_details;
pub mod devices;
pub mod employees;
pub mod ranking;
pub mod websites;

pub use apollo_enrich::ApolloStage;
pub use certificates::{CertificateDetailsStage, CertificateIdsStage};
pub use company_details::CompanyDetailsStage;
pub use company_ids::{discover_companies, DiscoveryReport};
pub use countries::{seed_countries, CountrySource, SeedReport};
pub use device_details::DeviceDetailsStage;
pub use devices::DevicesStage;
pub use employees::EmployeesStage;
pub use ranking::RankingStage;
pub use websites::{CleanWebsiteStage, SearchWebsiteStage};

/// Maximum registry pages read per company listing.
pub const MAX_LISTING_PAGES: u32 = 1000;

/// Store and external clients, built once per process.
pub struct PipelineContext {
    pub store: Arc<dyn RecordStore>,
    pub registry: RegistryClient,
    pub search: SearchClient,
    pub content: ContentExtractor,
    pub llm: LlmClient,
    pub apollo: ApolloClient,
    pub cities: CityResolver,
}

impl PipelineContext {
    /// Every write made through the context's store, stage inserts
    /// included, goes through one shared circuit breaker.
    pub fn new(config: &Config, store: Arc<dyn RecordStore>) -> Result<Self, AppError> {
        let store: Arc<dyn RecordStore> = Arc::new(GuardedStore::new(store));
        Ok(Self {
            registry: RegistryClient::new(config)?,
            search: SearchClient::new(config)?,
            content: ContentExtractor::new()?,
            llm: LlmClient::new(config)?,
            apollo: ApolloClient::new(config)?,
            cities: CityResolver::new(store.clone()),
            store,
        })
    }
}

/// Trimmed, non-empty text.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
