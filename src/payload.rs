//! Null-stripped write payloads.
//!
//! Every write to the store goes through [`UpdatePayload`], which drops
//! null-valued fields so a stage can never overwrite populated data with
//! absence of data.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::AppError;
use crate::status::Stage;

/// Column name used for the pipeline status tag on every enrichable table.
pub const STATUS_COLUMN: &str = "scraping_status";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePayload {
    fields: Map<String, Value>,
}

impl UpdatePayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a payload from any serializable struct, dropping null fields.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, AppError> {
        match serde_json::to_value(value)? {
            Value::Object(map) => {
                let mut payload = Self::new();
                for (key, value) in map {
                    payload.set(key, value);
                }
                Ok(payload)
            }
            other => Err(AppError::InternalError(format!(
                "Update payload must be an object, got {}",
                other
            ))),
        }
    }

    /// Sets a column unless the value is null.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if !value.is_null() {
            self.fields.insert(column.into(), value);
        }
        self
    }

    /// Sets a column when an optional value is present.
    pub fn set_opt<V: Into<Value>>(&mut self, column: impl Into<String>, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.set(column, value);
        }
        self
    }

    /// Stamps the pipeline status tag.
    pub fn with_status(mut self, stage: Stage) -> Self {
        self.fields
            .insert(STATUS_COLUMN.to_string(), Value::String(stage.as_str().to_string()));
        self
    }

    /// Folds another payload into this one; later values win.
    pub fn merge(&mut self, other: UpdatePayload) -> &mut Self {
        for (key, value) in other.fields {
            self.fields.insert(key, value);
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Sample {
        name: Option<String>,
        phone: Option<String>,
        employees: Option<i64>,
    }

    #[test]
    fn test_from_serializable_strips_nulls() {
        let payload = UpdatePayload::from_serializable(&Sample {
            name: Some("Acme Medical".into()),
            phone: None,
            employees: Some(120),
        })
        .unwrap();

        assert_eq!(payload.len(), 2);
        assert!(payload.get("phone").is_none());
        assert_eq!(payload.get("employees"), Some(&json!(120)));
    }

    #[test]
    fn test_set_ignores_null_and_keeps_false() {
        let mut payload = UpdatePayload::new();
        payload
            .set("active", false)
            .set("website", Value::Null)
            .set_opt("email", None::<String>);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get("active"), Some(&json!(false)));
    }

    #[test]
    fn test_with_status_stamps_tag() {
        let payload = UpdatePayload::new().with_status(Stage::GotCompanyDetails);
        assert_eq!(
            payload.get(STATUS_COLUMN),
            Some(&json!("GOT_COMPANY_DETAILS"))
        );
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(UpdatePayload::from_serializable(&42).is_err());
    }
}
