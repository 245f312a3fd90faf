use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    Certificate, Company, ContactKey, PartnerCompany, Product, StatusCount,
};
use crate::payload::UpdatePayload;
use crate::status::Stage;
use crate::store::{PendingQuery, RecordStore, Table};

const COMPANY_COLUMNS: &str = r#"
    c.id, c.eudamed_uuid::text AS eudamed_uuid, c.name, c.iso_code, c.eudamed_type,
    c.eudamed_identifier, c.website, c.original_website,
    c.empl_website::int8 AS empl_website, c.scraping_status, c.error_stage
"#;

const PRODUCT_COLUMNS: &str = r#"
    p.id, p.company_id, p.eudamed_uuid::text AS eudamed_uuid, p.name, p.risk_class,
    p.medicinal_product, p.human_tissues, p.animal_tissues, p.human_product,
    p.administering_medicine, p.active, p.manufacturer_latest_version, p.scraping_status,
    p.error_stage
"#;

/// Quotes a column or table identifier, rejecting anything that is not a
/// plain identifier. Column names come from payload keys, so this is the
/// only thing standing between a payload and the SQL text.
fn quote_ident(name: &str) -> Result<String, AppError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::InternalError(format!(
            "Refusing unsafe identifier: {:?}",
            name
        )));
    }
    Ok(format!("\"{}\"", name))
}

fn quoted_columns(payload: &UpdatePayload) -> Result<Vec<String>, AppError> {
    if payload.is_empty() {
        return Err(AppError::InternalError("Empty write payload".to_string()));
    }
    payload.columns().map(quote_ident).collect()
}

/// `UPDATE` statement projecting a JSON object onto the table's row type.
pub fn build_update_sql(table: Table, payload: &UpdatePayload) -> Result<String, AppError> {
    let table_name = quote_ident(table.name())?;
    let assignments = quoted_columns(payload)?
        .iter()
        .map(|c| format!("{c} = r.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "UPDATE {table_name} AS t SET {assignments} \
         FROM jsonb_populate_record(NULL::{table_name}, $1) AS r \
         WHERE t.id = $2"
    ))
}

/// `INSERT` statement, optionally upserting on a unique column.
pub fn build_insert_sql(
    table: Table,
    payload: &UpdatePayload,
    conflict_column: Option<&str>,
) -> Result<String, AppError> {
    let table_name = quote_ident(table.name())?;
    let columns = quoted_columns(payload)?;
    let column_list = columns.join(", ");
    let mut sql = format!(
        "INSERT INTO {table_name} ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_record(NULL::{table_name}, $1)"
    );
    if let Some(conflict) = conflict_column {
        let conflict = quote_ident(conflict)?;
        let updates = columns
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ON CONFLICT ({conflict}) DO UPDATE SET {updates}"));
    }
    sql.push_str(" RETURNING id");
    Ok(sql)
}

/// PostgreSQL-backed record store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn pending_companies(&self, query: &PendingQuery) -> Result<Vec<Company>, AppError> {
        let sql = format!(
            "SELECT {COMPANY_COLUMNS} FROM eudamed_companies c
             WHERE c.scraping_status = ANY($1)
               AND ($2::text IS NULL OR c.iso_code = $2)
               AND ($3::text IS NULL OR c.eudamed_type = $3)
               AND ($4::uuid IS NULL OR c.id > $4)
               AND (c.error_stage IS NULL OR c.error_stage = $6)
             ORDER BY c.id
             LIMIT $5"
        );
        sqlx::query_as::<_, Company>(&sql)
            .bind(query.status_tags())
            .bind(query.filter.country.as_deref())
            .bind(query.filter.actor_type.as_deref())
            .bind(query.after_id)
            .bind(query.limit as i64)
            .bind(query.retry_tag())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch pending companies")
    }

    async fn pending_products(&self, query: &PendingQuery) -> Result<Vec<Product>, AppError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM eudamed_products p
             LEFT JOIN eudamed_companies c ON c.id = p.company_id
             WHERE p.scraping_status = ANY($1)
               AND ($2::text IS NULL OR c.iso_code = $2)
               AND ($3::text IS NULL OR c.eudamed_type = $3)
               AND ($4::uuid IS NULL OR p.id > $4)
               AND (p.error_stage IS NULL OR p.error_stage = $6)
             ORDER BY p.id
             LIMIT $5"
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(query.status_tags())
            .bind(query.filter.country.as_deref())
            .bind(query.filter.actor_type.as_deref())
            .bind(query.after_id)
            .bind(query.limit as i64)
            .bind(query.retry_tag())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch pending products")
    }

    async fn pending_certificates(
        &self,
        query: &PendingQuery,
    ) -> Result<Vec<Certificate>, AppError> {
        sqlx::query_as::<_, Certificate>(
            r#"
            SELECT ce.id, ce.eudamed_uuid::text AS eudamed_uuid, ce.company_id,
                   ce.certificate_number, ce.scraping_status, ce.error_stage
            FROM eudamed_certificates ce
            LEFT JOIN eudamed_companies c ON c.id = ce.company_id
            WHERE ce.scraping_status = ANY($1)
              AND ($2::text IS NULL OR c.iso_code = $2)
              AND ($3::text IS NULL OR c.eudamed_type = $3)
              AND ($4::uuid IS NULL OR ce.id > $4)
              AND (ce.error_stage IS NULL OR ce.error_stage = $6)
            ORDER BY ce.id
            LIMIT $5
            "#,
        )
        .bind(query.status_tags())
        .bind(query.filter.country.as_deref())
        .bind(query.filter.actor_type.as_deref())
        .bind(query.after_id)
        .bind(query.limit as i64)
        .bind(query.retry_tag())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch pending certificates")
    }

    async fn update(
        &self,
        table: Table,
        id: Uuid,
        payload: &UpdatePayload,
    ) -> Result<(), AppError> {
        let sql = build_update_sql(table, payload)?;
        sqlx::query(&sql)
            .bind(Json(payload.as_map()))
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to update {} {}", table.name(), id))?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        table: Table,
        id: Uuid,
        stage: Stage,
        message: &str,
    ) -> Result<(), AppError> {
        let sql = format!(
            "UPDATE {} SET error_stage = $1, scraping_error = $2 WHERE id = $3",
            quote_ident(table.name())?
        );
        sqlx::query(&sql)
            .bind(stage.as_str())
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to record failure on {} {}", table.name(), id))?;
        Ok(())
    }

    async fn clear_failure(&self, table: Table, id: Uuid) -> Result<(), AppError> {
        let sql = format!(
            "UPDATE {} SET error_stage = NULL, scraping_error = NULL WHERE id = $1",
            quote_ident(table.name())?
        );
        sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to clear failure on {} {}", table.name(), id))?;
        Ok(())
    }

    async fn insert(&self, table: Table, payload: &UpdatePayload) -> Result<Uuid, AppError> {
        let sql = build_insert_sql(table, payload, None)?;
        let (id,): (Uuid,) = sqlx::query_as(&sql)
            .bind(Json(payload.as_map()))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to insert into {}", table.name()))?;
        Ok(id)
    }

    async fn upsert(
        &self,
        table: Table,
        conflict_column: &'static str,
        payload: &UpdatePayload,
    ) -> Result<Uuid, AppError> {
        let sql = build_insert_sql(table, payload, Some(conflict_column))?;
        let (id,): (Uuid,) = sqlx::query_as(&sql)
            .bind(Json(payload.as_map()))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to upsert into {}", table.name()))?;
        Ok(id)
    }

    async fn find_id(
        &self,
        table: Table,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Uuid>, AppError> {
        let sql = format!(
            "SELECT id FROM {} WHERE {}::text = $1 LIMIT 1",
            quote_ident(table.name())?,
            quote_ident(column)?
        );
        let row: Option<(Uuid,)> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to look up {}.{}", table.name(), column))?;
        Ok(row.map(|(id,)| id))
    }

    async fn exists_pair(
        &self,
        table: Table,
        first: (&'static str, Uuid),
        second: (&'static str, &str),
    ) -> Result<bool, AppError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1 AND {}::text = $2)",
            quote_ident(table.name())?,
            quote_ident(first.0)?,
            quote_ident(second.0)?
        );
        let (exists,): (bool,) = sqlx::query_as(&sql)
            .bind(first.1)
            .bind(second.1)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to check {} for duplicates", table.name()))?;
        Ok(exists)
    }

    async fn contact_exists(&self, key: &ContactKey) -> Result<bool, AppError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM eudamed_contactpeople
                WHERE company_id = $1
                  AND email IS NOT DISTINCT FROM $2
                  AND phone IS NOT DISTINCT FROM $3
                  AND first_name IS NOT DISTINCT FROM $4
                  AND family_name IS NOT DISTINCT FROM $5
                  AND position IS NOT DISTINCT FROM $6
            )
            "#,
        )
        .bind(key.company_id)
        .bind(key.email.as_deref())
        .bind(key.phone.as_deref())
        .bind(key.first_name.as_deref())
        .bind(key.family_name.as_deref())
        .bind(key.position.as_deref())
        .fetch_one(&self.pool)
        .await
        .context("Failed to check contact person")?;
        Ok(exists)
    }

    async fn scoring_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM eudamed_products p
             WHERE p.company_id = $1
               AND p.active = true
               AND p.manufacturer_latest_version = true"
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(company_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch products for scoring")
    }

    async fn partner_company(
        &self,
        company_id: Uuid,
    ) -> Result<Option<PartnerCompany>, AppError> {
        sqlx::query_as::<_, PartnerCompany>(
            r#"
            SELECT id, eudamed_company_id,
                   estimated_num_employees::int8 AS estimated_num_employees,
                   annual_revenue::float8 AS annual_revenue
            FROM apollo_companies
            WHERE eudamed_company_id = $1
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch partner company")
    }

    async fn country_codes(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT iso_code FROM countries WHERE iso_code IS NOT NULL ORDER BY iso_code")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch country codes")?;
        Ok(rows.into_iter().map(|(code,)| code).collect())
    }

    async fn status_counts(&self, table: Table) -> Result<Vec<StatusCount>, AppError> {
        let sql = format!(
            "SELECT scraping_status, COUNT(*)::int8 AS count, \
                    COUNT(error_stage)::int8 AS failed FROM {} \
             GROUP BY scraping_status ORDER BY scraping_status",
            quote_ident(table.name())?
        );
        sqlx::query_as::<_, StatusCount>(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to count statuses in {}", table.name()))
    }

    async fn export_page(
        &self,
        table: Table,
        after_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Value>, AppError> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} AS t \
             WHERE ($1::uuid IS NULL OR t.id > $1) ORDER BY t.id LIMIT $2",
            quote_ident(table.name())?
        );
        let rows: Vec<(Value,)> = sqlx::query_as(&sql)
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to export {}", table.name()))?;
        Ok(rows.into_iter().map(|(row,)| row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_sql_projects_payload_columns() {
        let mut payload = UpdatePayload::new();
        payload.set("website", "acme.at");
        let payload = payload.with_status(Stage::CleanedWebsite);

        let sql = build_update_sql(Table::Companies, &payload).unwrap();
        assert!(sql.starts_with("UPDATE \"eudamed_companies\" AS t SET "));
        assert!(sql.contains("\"website\" = r.\"website\""));
        assert!(sql.contains("\"scraping_status\" = r.\"scraping_status\""));
        assert!(sql.contains("jsonb_populate_record(NULL::\"eudamed_companies\", $1)"));
        assert!(sql.ends_with("WHERE t.id = $2"));
    }

    #[test]
    fn test_upsert_sql_quotes_mixed_case_table() {
        let mut payload = UpdatePayload::new();
        payload.set("eudamed_uuid", "nb-1").set("name", "TÜV");
        let sql = build_insert_sql(Table::NotifiedBodies, &payload, Some("eudamed_uuid")).unwrap();
        assert!(sql.starts_with("INSERT INTO \"eudamed_notifiedBodies\""));
        assert!(sql.contains("ON CONFLICT (\"eudamed_uuid\") DO UPDATE SET"));
        assert!(sql.contains("\"name\" = EXCLUDED.\"name\""));
        assert!(sql.ends_with("RETURNING id"));
    }

    #[test]
    fn test_unsafe_identifier_rejected() {
        let mut payload = UpdatePayload::new();
        payload.set("name\"; DROP TABLE cities; --", "x");
        assert!(build_update_sql(Table::Companies, &payload).is_err());
        assert!(quote_ident("1abc").is_err());
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(build_insert_sql(Table::Cities, &UpdatePayload::new(), None).is_err());
    }
}
