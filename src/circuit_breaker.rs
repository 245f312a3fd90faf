use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{CircuitBreaker, Config, StateMachine};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Certificate, Company, ContactKey, PartnerCompany, Product, StatusCount};
use crate::payload::UpdatePayload;
use crate::status::Stage;
use crate::store::{PendingQuery, RecordStore, Table};

/// Circuit breaker guarding record-store writes.
pub type StoreBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Number of consecutive failed writes that opens the circuit.
pub const STORE_FAILURE_THRESHOLD: u32 = 5;

/// Creates the circuit breaker for store writes.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// While OPEN every write is refused with [`AppError::StoreUnavailable`],
/// which is fatal to the run.
pub fn create_store_circuit_breaker() -> StoreBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy =
        failure_policy::consecutive_failures(STORE_FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Runs one store write through the breaker.
pub async fn guarded_write<T, Fut>(breaker: &StoreBreaker, write: Fut) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, AppError>>,
{
    if !breaker.is_call_permitted() {
        return Err(AppError::StoreUnavailable(format!(
            "{} consecutive store writes failed",
            STORE_FAILURE_THRESHOLD
        )));
    }

    let result = write.await;
    match breaker.call(|| result) {
        Ok(value) => Ok(value),
        Err(failsafe::Error::Inner(e)) => Err(e),
        Err(failsafe::Error::Rejected) => Err(AppError::StoreUnavailable(
            "store circuit breaker is open".to_string(),
        )),
    }
}

/// Record store whose writes all share one breaker. Reads pass through.
pub struct GuardedStore {
    inner: Arc<dyn RecordStore>,
    breaker: StoreBreaker,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            breaker: create_store_circuit_breaker(),
        }
    }
}

#[async_trait]
impl RecordStore for GuardedStore {
    async fn pending_companies(&self, query: &PendingQuery) -> Result<Vec<Company>, AppError> {
        self.inner.pending_companies(query).await
    }

    async fn pending_products(&self, query: &PendingQuery) -> Result<Vec<Product>, AppError> {
        self.inner.pending_products(query).await
    }

    async fn pending_certificates(
        &self,
        query: &PendingQuery,
    ) -> Result<Vec<Certificate>, AppError> {
        self.inner.pending_certificates(query).await
    }

    async fn update(&self, table: Table, id: Uuid, payload: &UpdatePayload) -> Result<(), AppError> {
        guarded_write(&self.breaker, self.inner.update(table, id, payload)).await
    }

    async fn mark_failed(
        &self,
        table: Table,
        id: Uuid,
        stage: Stage,
        message: &str,
    ) -> Result<(), AppError> {
        guarded_write(
            &self.breaker,
            self.inner.mark_failed(table, id, stage, message),
        )
        .await
    }

    async fn clear_failure(&self, table: Table, id: Uuid) -> Result<(), AppError> {
        guarded_write(&self.breaker, self.inner.clear_failure(table, id)).await
    }

    async fn insert(&self, table: Table, payload: &UpdatePayload) -> Result<Uuid, AppError> {
        guarded_write(&self.breaker, self.inner.insert(table, payload)).await
    }

    async fn upsert(
        &self,
        table: Table,
        conflict_column: &'static str,
        payload: &UpdatePayload,
    ) -> Result<Uuid, AppError> {
        guarded_write(
            &self.breaker,
            self.inner.upsert(table, conflict_column, payload),
        )
        .await
    }

    async fn find_id(
        &self,
        table: Table,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Uuid>, AppError> {
        self.inner.find_id(table, column, value).await
    }

    async fn exists_pair(
        &self,
        table: Table,
        first: (&'static str, Uuid),
        second: (&'static str, &str),
    ) -> Result<bool, AppError> {
        self.inner.exists_pair(table, first, second).await
    }

    async fn contact_exists(&self, key: &ContactKey) -> Result<bool, AppError> {
        self.inner.contact_exists(key).await
    }

    async fn scoring_products(&self, company_id: Uuid) -> Result<Vec<Product>, AppError> {
        self.inner.scoring_products(company_id).await
    }

    async fn partner_company(
        &self,
        company_id: Uuid,
    ) -> Result<Option<PartnerCompany>, AppError> {
        self.inner.partner_company(company_id).await
    }

    async fn country_codes(&self) -> Result<Vec<String>, AppError> {
        self.inner.country_codes().await
    }

    async fn status_counts(&self, table: Table) -> Result<Vec<StatusCount>, AppError> {
        self.inner.status_counts(table).await
    }

    async fn export_page(
        &self,
        table: Table,
        after_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Value>, AppError> {
        self.inner.export_page(table, after_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let cb = create_store_circuit_breaker();

        // Simulate 5 consecutive failures
        for _ in 0..STORE_FAILURE_THRESHOLD {
            let result: Result<(), AppError> = guarded_write(&cb, async {
                Err(AppError::InternalError("simulated error".into()))
            })
            .await;
            assert!(matches!(result, Err(AppError::InternalError(_))));
        }

        // Next write should be refused without running
        let result: Result<(), AppError> = guarded_write(&cb, async { Ok(()) }).await;
        let err = result.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_circuit_breaker_allows_success() {
        let cb = create_store_circuit_breaker();

        let result = guarded_write(&cb, async { Ok::<i32, AppError>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = create_store_circuit_breaker();

        for round in 0..3 {
            for _ in 0..STORE_FAILURE_THRESHOLD - 1 {
                let _ = guarded_write(&cb, async {
                    Err::<(), _>(AppError::InternalError("flaky".into()))
                })
                .await;
            }
            let ok = guarded_write(&cb, async { Ok::<_, AppError>(round) }).await;
            assert_eq!(ok.unwrap(), round);
        }
    }
}
