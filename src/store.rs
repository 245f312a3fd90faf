//! Record store abstraction consumed by the pipeline.
//!
//! The relational schema is owned elsewhere; this trait is the contract the
//! stages rely on. [`crate::db_storage::PgStore`] is the PostgreSQL backing.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Certificate, Company, ContactKey, PartnerCompany, Product, StatusCount,
};
use crate::payload::UpdatePayload;
use crate::status::{RecordKind, Stage};

/// Tables the pipeline reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Companies,
    Products,
    Certificates,
    NotifiedBodies,
    CertificateScopes,
    CertificateDocuments,
    PartnerCompanies,
    ContactPeople,
    Cities,
    Countries,
}

impl Table {
    /// Table name as it exists in the store.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Companies => "eudamed_companies",
            Table::Products => "eudamed_products",
            Table::Certificates => "eudamed_certificates",
            Table::NotifiedBodies => "eudamed_notifiedBodies",
            Table::CertificateScopes => "certificate_scopes",
            Table::CertificateDocuments => "certificate_documents",
            Table::PartnerCompanies => "apollo_companies",
            Table::ContactPeople => "eudamed_contactpeople",
            Table::Cities => "cities",
            Table::Countries => "countries",
        }
    }

    pub fn for_kind(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Company => Table::Companies,
            RecordKind::Product => Table::Products,
            RecordKind::Certificate => Table::Certificates,
        }
    }
}

/// Source filter applied on top of the status selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilter {
    /// ISO country code of the company.
    pub country: Option<String>,
    /// Registry actor type code of the company.
    pub actor_type: Option<String>,
}

/// One page of records that have not reached a stage yet.
///
/// A record with a recorded failure is held back until that stage is
/// retried: it qualifies only when its `error_stage` equals `retry_stage`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingQuery {
    /// Status tags that qualify a record for the stage.
    pub statuses: Vec<Stage>,
    /// Failed stage to pick up again, if retrying.
    pub retry_stage: Option<Stage>,
    pub filter: SourceFilter,
    /// Keyset cursor: only ids strictly greater than this are returned.
    pub after_id: Option<Uuid>,
    pub limit: usize,
}

impl PendingQuery {
    pub fn status_tags(&self) -> Vec<String> {
        self.statuses.iter().map(|s| s.as_str().to_string()).collect()
    }

    pub fn retry_tag(&self) -> Option<&'static str> {
        self.retry_stage.as_ref().map(Stage::as_str)
    }

    /// Whether a record whose last failure is `error_stage` qualifies.
    pub fn admits_failure(&self, error_stage: Option<&str>) -> bool {
        match error_stage {
            None => true,
            Some(failed) => self.retry_tag() == Some(failed),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Companies matching the query, ordered by id.
    async fn pending_companies(&self, query: &PendingQuery) -> Result<Vec<Company>, AppError>;

    /// Products matching the query, ordered by id. The source filter applies
    /// to the owning company.
    async fn pending_products(&self, query: &PendingQuery) -> Result<Vec<Product>, AppError>;

    /// Certificates matching the query, ordered by id.
    async fn pending_certificates(
        &self,
        query: &PendingQuery,
    ) -> Result<Vec<Certificate>, AppError>;

    /// Partial update of one record by id.
    async fn update(&self, table: Table, id: Uuid, payload: &UpdatePayload)
        -> Result<(), AppError>;

    /// Records that `stage` failed for a record, leaving its status tag alone.
    async fn mark_failed(
        &self,
        table: Table,
        id: Uuid,
        stage: Stage,
        message: &str,
    ) -> Result<(), AppError>;

    /// Removes a recorded failure.
    async fn clear_failure(&self, table: Table, id: Uuid) -> Result<(), AppError>;

    /// Inserts a record and returns its id.
    async fn insert(&self, table: Table, payload: &UpdatePayload) -> Result<Uuid, AppError>;

    /// Inserts or updates on a unique column and returns the record id.
    async fn upsert(
        &self,
        table: Table,
        conflict_column: &'static str,
        payload: &UpdatePayload,
    ) -> Result<Uuid, AppError>;

    /// Id of the first record whose text column equals `value`.
    async fn find_id(
        &self,
        table: Table,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Uuid>, AppError>;

    /// Whether a record with both column values already exists.
    async fn exists_pair(
        &self,
        table: Table,
        first: (&'static str, Uuid),
        second: (&'static str, &str),
    ) -> Result<bool, AppError>;

    /// Whether a contact person with this exact composite key exists.
    async fn contact_exists(&self, key: &ContactKey) -> Result<bool, AppError>;

    /// Active, latest-version products of a company.
    async fn scoring_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError>;

    /// Enrichment-partner record of a company, if any.
    async fn partner_company(&self, company_id: Uuid)
        -> Result<Option<PartnerCompany>, AppError>;

    /// All country codes known to the store.
    async fn country_codes(&self) -> Result<Vec<String>, AppError>;

    /// Record counts per status tag, with the failed records among them.
    async fn status_counts(&self, table: Table) -> Result<Vec<StatusCount>, AppError>;

    /// Raw rows of a table, ordered by id, for export.
    async fn export_page(
        &self,
        table: Table,
        after_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Value>, AppError>;
}
