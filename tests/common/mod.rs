//! Shared helpers for integration tests: an in-memory store and a test
//! configuration pointing every adapter at one mock server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use eudamed_enrichment::config::{ApolloRateLimitPolicy, Config, SearchProvider};
use eudamed_enrichment::errors::AppError;
use eudamed_enrichment::models::{Certificate, Company, ContactKey, PartnerCompany, Product, StatusCount};
use eudamed_enrichment::payload::UpdatePayload;
use eudamed_enrichment::status::Stage;
use eudamed_enrichment::store::{PendingQuery, RecordStore, SourceFilter, Table};

type Row = Map<String, Value>;

/// Config with every external base URL on `base`, all keys set and no
/// registry retry delay.
pub fn create_test_config(base: &str) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        eudamed_base_url: format!("{}/eudamed", base),
        registry_retry_delay_secs: 0,
        openai_api_key: Some("test_openai_key".to_string()),
        openai_base_url: format!("{}/v1", base),
        openai_model: "test-model".to_string(),
        search_provider: SearchProvider::Bing,
        bing_subscription_key: Some("test_bing_key".to_string()),
        bing_endpoint: format!("{}/bing/v7.0/search", base),
        google_api_key: Some("test_google_key".to_string()),
        google_cse_id: Some("test_cse".to_string()),
        google_cse_endpoint: format!("{}/customsearch/v1", base),
        apollo_api_key: Some("test_apollo_key".to_string()),
        apollo_api_url: format!("{}/apollo/organizations/enrich", base),
        apollo_rate_limit_policy: ApolloRateLimitPolicy::Abort,
    }
}

/// Postgres stand-in keeping every table as a list of JSON rows.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<Row>>>,
    /// Number of upcoming writes that fail.
    failing_writes: AtomicUsize,
}

fn row_uuid(row: &Row, column: &str) -> Option<Uuid> {
    row.get(column)
        .and_then(Value::as_str)
        .and_then(|v| Uuid::parse_str(v).ok())
}

fn decode<T: DeserializeOwned>(row: &Row) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(row.clone()))
        .map_err(|e| AppError::Decode(format!("memory row: {}", e)))
}

fn text_eq(row: &Row, column: &str, expected: &Option<String>) -> bool {
    match (row.get(column), expected) {
        (None | Some(Value::Null), None) => true,
        (Some(Value::String(s)), Some(e)) => s == e,
        _ => false,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row as-is, assigning an id, and returns it.
    pub fn seed(&self, table: Table, fields: Value) -> Uuid {
        let id = Uuid::new_v4();
        let mut row = fields.as_object().cloned().unwrap_or_default();
        row.insert("id".into(), Value::String(id.to_string()));
        self.tables.lock().unwrap().entry(table).or_default().push(row);
        id
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row(&self, table: Table, id: Uuid) -> Option<Row> {
        self.rows(table)
            .into_iter()
            .find(|row| row_uuid(row, "id") == Some(id))
    }

    pub fn status_of(&self, table: Table, id: Uuid) -> Option<String> {
        self.row(table, id)?
            .get("scraping_status")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn error_stage_of(&self, table: Table, id: Uuid) -> Option<String> {
        self.row(table, id)?
            .get("error_stage")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Makes the next `count` writes of any kind fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn take_write_failure(&self) -> Result<(), AppError> {
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            return Err(AppError::InternalError("injected write failure".into()));
        }
        Ok(())
    }

    fn write_row(
        &self,
        table: Table,
        id: Uuid,
        apply: impl FnOnce(&mut Row),
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|row| row_uuid(row, "id") == Some(id))
            .ok_or_else(|| AppError::NotFound(format!("{} {}", table.name(), id)))?;
        apply(row);
        Ok(())
    }

    fn merge_row(&self, table: Table, id: Uuid, payload: &UpdatePayload) -> Result<(), AppError> {
        self.write_row(table, id, |row| {
            for (column, value) in payload.as_map() {
                row.insert(column.clone(), value.clone());
            }
        })
    }

    fn company_matches(&self, company_id: Option<Uuid>, filter: &SourceFilter) -> bool {
        if filter.country.is_none() && filter.actor_type.is_none() {
            return true;
        }
        let Some(company) = company_id.and_then(|id| self.row(Table::Companies, id)) else {
            return false;
        };
        text_eq_opt(&company, "iso_code", &filter.country)
            && text_eq_opt(&company, "eudamed_type", &filter.actor_type)
    }

    fn pending<T: DeserializeOwned>(
        &self,
        table: Table,
        query: &PendingQuery,
        company_column: &str,
    ) -> Result<Vec<T>, AppError> {
        let tags = query.status_tags();
        let mut rows: Vec<(Uuid, Row)> = self
            .rows(table)
            .into_iter()
            .filter(|row| {
                row.get("scraping_status")
                    .and_then(Value::as_str)
                    .is_some_and(|s| tags.iter().any(|t| t == s))
            })
            .filter(|row| query.admits_failure(row.get("error_stage").and_then(Value::as_str)))
            .filter(|row| self.company_matches(row_uuid(row, company_column), &query.filter))
            .filter_map(|row| row_uuid(&row, "id").map(|id| (id, row)))
            .filter(|(id, _)| query.after_id.map_or(true, |after| *id > after))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        rows.truncate(query.limit);
        rows.iter().map(|(_, row)| decode(row)).collect()
    }
}

fn text_eq_opt(row: &Row, column: &str, expected: &Option<String>) -> bool {
    expected.is_none() || text_eq(row, column, expected)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn pending_companies(&self, query: &PendingQuery) -> Result<Vec<Company>, AppError> {
        self.pending(Table::Companies, query, "id")
    }

    async fn pending_products(&self, query: &PendingQuery) -> Result<Vec<Product>, AppError> {
        self.pending(Table::Products, query, "company_id")
    }

    async fn pending_certificates(
        &self,
        query: &PendingQuery,
    ) -> Result<Vec<Certificate>, AppError> {
        self.pending(Table::Certificates, query, "company_id")
    }

    async fn update(&self, table: Table, id: Uuid, payload: &UpdatePayload) -> Result<(), AppError> {
        self.take_write_failure()?;
        self.merge_row(table, id, payload)
    }

    async fn mark_failed(
        &self,
        table: Table,
        id: Uuid,
        stage: Stage,
        message: &str,
    ) -> Result<(), AppError> {
        self.take_write_failure()?;
        self.write_row(table, id, |row| {
            row.insert("error_stage".into(), Value::from(stage.as_str()));
            row.insert("scraping_error".into(), Value::from(message));
        })
    }

    async fn clear_failure(&self, table: Table, id: Uuid) -> Result<(), AppError> {
        self.take_write_failure()?;
        self.write_row(table, id, |row| {
            row.remove("error_stage");
            row.remove("scraping_error");
        })
    }

    async fn insert(&self, table: Table, payload: &UpdatePayload) -> Result<Uuid, AppError> {
        self.take_write_failure()?;
        Ok(self.seed(table, Value::Object(payload.as_map().clone())))
    }

    async fn upsert(
        &self,
        table: Table,
        conflict_column: &'static str,
        payload: &UpdatePayload,
    ) -> Result<Uuid, AppError> {
        self.take_write_failure()?;
        let key = payload.get(conflict_column).cloned();
        let existing = self
            .rows(table)
            .into_iter()
            .find(|row| key.is_some() && row.get(conflict_column) == key.as_ref())
            .and_then(|row| row_uuid(&row, "id"));
        match existing {
            Some(id) => {
                self.merge_row(table, id, payload)?;
                Ok(id)
            }
            None => Ok(self.seed(table, Value::Object(payload.as_map().clone()))),
        }
    }

    async fn find_id(
        &self,
        table: Table,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .rows(table)
            .iter()
            .find(|row| row.get(column).and_then(Value::as_str) == Some(value))
            .and_then(|row| row_uuid(row, "id")))
    }

    async fn exists_pair(
        &self,
        table: Table,
        first: (&'static str, Uuid),
        second: (&'static str, &str),
    ) -> Result<bool, AppError> {
        Ok(self.rows(table).iter().any(|row| {
            row_uuid(row, first.0) == Some(first.1)
                && row.get(second.0).and_then(Value::as_str) == Some(second.1)
        }))
    }

    async fn contact_exists(&self, key: &ContactKey) -> Result<bool, AppError> {
        Ok(self.rows(Table::ContactPeople).iter().any(|row| {
            row_uuid(row, "company_id") == Some(key.company_id)
                && text_eq(row, "email", &key.email)
                && text_eq(row, "phone", &key.phone)
                && text_eq(row, "first_name", &key.first_name)
                && text_eq(row, "family_name", &key.family_name)
                && text_eq(row, "position", &key.position)
        }))
    }

    async fn scoring_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError> {
        self.rows(Table::Products)
            .iter()
            .filter(|row| row_uuid(row, "company_id") == Some(company_id))
            .filter(|row| row.get("active") == Some(&Value::Bool(true)))
            .filter(|row| row.get("manufacturer_latest_version") == Some(&Value::Bool(true)))
            .map(decode)
            .collect()
    }

    async fn partner_company(&self, company_id: Uuid) -> Result<Option<PartnerCompany>, AppError> {
        self.rows(Table::PartnerCompanies)
            .iter()
            .find(|row| row_uuid(row, "eudamed_company_id") == Some(company_id))
            .map(decode)
            .transpose()
    }

    async fn country_codes(&self) -> Result<Vec<String>, AppError> {
        let mut codes: Vec<String> = self
            .rows(Table::Countries)
            .iter()
            .filter_map(|row| row.get("iso_code").and_then(Value::as_str).map(str::to_string))
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn status_counts(&self, table: Table) -> Result<Vec<StatusCount>, AppError> {
        let mut counts: HashMap<Option<String>, (i64, i64)> = HashMap::new();
        for row in self.rows(table) {
            let status = row
                .get("scraping_status")
                .and_then(Value::as_str)
                .map(str::to_string);
            let entry = counts.entry(status).or_default();
            entry.0 += 1;
            if row.get("error_stage").is_some_and(|v| !v.is_null()) {
                entry.1 += 1;
            }
        }
        let mut counts: Vec<StatusCount> = counts
            .into_iter()
            .map(|(scraping_status, (count, failed))| StatusCount {
                scraping_status,
                count,
                failed,
            })
            .collect();
        counts.sort_by(|a, b| a.scraping_status.cmp(&b.scraping_status));
        Ok(counts)
    }

    async fn export_page(
        &self,
        table: Table,
        after_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Value>, AppError> {
        let mut rows: Vec<(Uuid, Row)> = self
            .rows(table)
            .into_iter()
            .filter_map(|row| row_uuid(&row, "id").map(|id| (id, row)))
            .filter(|(id, _)| after_id.map_or(true, |after| *id > after))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        rows.truncate(limit);
        Ok(rows.into_iter().map(|(_, row)| Value::Object(row)).collect())
    }
}
