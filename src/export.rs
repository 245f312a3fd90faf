//! CSV exports of the enrichment tables.

use std::io::Write;
use std::path::Path;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm::normalize_domain;
use crate::store::{RecordStore, Table};

/// Rows read per store round trip.
pub const EXPORT_PAGE_SIZE: usize = 1000;

fn csv_error(err: csv::Error) -> AppError {
    AppError::InternalError(format!("CSV write failed: {}", err))
}

fn row_id(row: &Value) -> Option<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// Walks every row of `table` in id order, one page at a time.
async fn for_each_row<F>(store: &dyn RecordStore, table: Table, mut visit: F) -> Result<usize, AppError>
where
    F: FnMut(&Map<String, Value>) -> Result<(), AppError>,
{
    let mut after_id = None;
    let mut total = 0;
    loop {
        let rows = store.export_page(table, after_id, EXPORT_PAGE_SIZE).await?;
        if rows.is_empty() {
            break;
        }
        let last_id = rows.last().and_then(row_id);
        for row in &rows {
            if let Some(fields) = row.as_object() {
                visit(fields)?;
                total += 1;
            }
        }
        if rows.len() < EXPORT_PAGE_SIZE || last_id.is_none() {
            break;
        }
        after_id = last_id;
        tracing::debug!("Exported {} rows of {} so far", total, table.name());
    }
    Ok(total)
}

/// Union of the keys of all rows, in first-seen order.
pub fn merge_columns(columns: &mut Vec<String>, row: &Map<String, Value>) {
    for key in row.keys() {
        if !columns.iter().any(|c| c == key) {
            columns.push(key.clone());
        }
    }
}

/// Text of one CSV cell: strings verbatim, null empty, everything else JSON.
pub fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Filter pattern for a website, `*.{domain}/*`.
pub fn website_pattern(website: &str) -> Option<String> {
    normalize_domain(website).map(|domain| format!("*.{}/*", domain))
}

/// Writes every row of `table` as CSV. Returns the number of rows written.
///
/// The header is only known after a full scan, so the table is read twice.
pub async fn export_table<W: Write>(
    store: &dyn RecordStore,
    table: Table,
    out: W,
) -> Result<usize, AppError> {
    let mut columns: Vec<String> = Vec::new();
    for_each_row(store, table, |row| {
        merge_columns(&mut columns, row);
        Ok(())
    })
    .await?;

    let mut writer = csv::Writer::from_writer(out);
    if columns.is_empty() {
        tracing::info!("{} is empty, nothing to export", table.name());
        writer.flush().map_err(|e| AppError::InternalError(e.to_string()))?;
        return Ok(0);
    }
    writer.write_record(&columns).map_err(csv_error)?;

    let written = for_each_row(store, table, |row| {
        let record = columns.iter().map(|c| cell(row.get(c)));
        writer.write_record(record).map_err(csv_error)
    })
    .await?;

    writer.flush().map_err(|e| AppError::InternalError(e.to_string()))?;
    tracing::info!("Exported {} row(s) of {}", written, table.name());
    Ok(written)
}

/// Writes one website pattern per company with a usable website.
pub async fn export_websites<W: Write>(store: &dyn RecordStore, out: W) -> Result<usize, AppError> {
    let mut writer = csv::Writer::from_writer(out);
    let mut written = 0;
    for_each_row(store, Table::Companies, |row| {
        let Some(pattern) = row
            .get("website")
            .and_then(Value::as_str)
            .and_then(website_pattern)
        else {
            return Ok(());
        };
        written += 1;
        writer.write_record([pattern]).map_err(csv_error)
    })
    .await?;

    writer.flush().map_err(|e| AppError::InternalError(e.to_string()))?;
    tracing::info!("Exported {} website pattern(s)", written);
    Ok(written)
}

/// Opens `path` for writing, creating or truncating it.
pub fn create_output(path: &Path) -> Result<std::fs::File, AppError> {
    std::fs::File::create(path)
        .map_err(|e| AppError::InternalError(format!("Cannot create {}: {}", path.display(), e)))
}
