//! Status-driven stage runner.
//!
//! A stage walks every record of its kind that has not reached the stage's
//! tag yet, in id order, one keyset page at a time. Each record is visited at
//! most once per run, so a run terminates even when records keep failing.
//!
//! A failed record keeps its status tag and gets the failed stage recorded
//! beside it. Later stages pass it over until that stage is retried with
//! `retry_errors` and succeeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Certificate, Company, Product};
use crate::payload::UpdatePayload;
use crate::status::{RecordKind, Stage};
use crate::store::{PendingQuery, RecordStore, SourceFilter, Table};

pub const MAX_BATCH_SIZE: usize = 50;

/// A record type a stage can walk.
#[async_trait]
pub trait PendingRecord: Sized + Send + Sync + 'static {
    const KIND: RecordKind;

    fn id(&self) -> Uuid;

    /// Short human-readable label for logs.
    fn label(&self) -> String;

    fn status(&self) -> Option<Stage>;

    /// Stage whose last attempt failed, if any.
    fn failed_stage(&self) -> Option<Stage>;

    async fn fetch_pending(
        store: &dyn RecordStore,
        query: &PendingQuery,
    ) -> Result<Vec<Self>, AppError>;
}

#[async_trait]
impl PendingRecord for Company {
    const KIND: RecordKind = RecordKind::Company;

    fn id(&self) -> Uuid {
        self.id
    }

    fn label(&self) -> String {
        format!("{} ({})", self.display_name(), self.id)
    }

    fn status(&self) -> Option<Stage> {
        Company::status(self)
    }

    fn failed_stage(&self) -> Option<Stage> {
        Company::failed_stage(self)
    }

    async fn fetch_pending(
        store: &dyn RecordStore,
        query: &PendingQuery,
    ) -> Result<Vec<Self>, AppError> {
        store.pending_companies(query).await
    }
}

#[async_trait]
impl PendingRecord for Product {
    const KIND: RecordKind = RecordKind::Product;

    fn id(&self) -> Uuid {
        self.id
    }

    fn label(&self) -> String {
        format!("product {}", self.eudamed_uuid.as_deref().unwrap_or("?"))
    }

    fn status(&self) -> Option<Stage> {
        Product::status(self)
    }

    fn failed_stage(&self) -> Option<Stage> {
        Product::failed_stage(self)
    }

    async fn fetch_pending(
        store: &dyn RecordStore,
        query: &PendingQuery,
    ) -> Result<Vec<Self>, AppError> {
        store.pending_products(query).await
    }
}

#[async_trait]
impl PendingRecord for Certificate {
    const KIND: RecordKind = RecordKind::Certificate;

    fn id(&self) -> Uuid {
        self.id
    }

    fn label(&self) -> String {
        format!(
            "certificate {}",
            self.certificate_number
                .as_deref()
                .or(self.eudamed_uuid.as_deref())
                .unwrap_or("?")
        )
    }

    fn status(&self) -> Option<Stage> {
        Certificate::status(self)
    }

    fn failed_stage(&self) -> Option<Stage> {
        Certificate::failed_stage(self)
    }

    async fn fetch_pending(
        store: &dyn RecordStore,
        query: &PendingQuery,
    ) -> Result<Vec<Self>, AppError> {
        store.pending_certificates(query).await
    }
}

/// What a worker decided for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Merge these fields and stamp the stage tag.
    Advance(UpdatePayload),
    /// Nothing to look up; stamp the stage tag only.
    NoInput,
}

/// One enrichment stage.
#[async_trait]
pub trait StageWorker: Send + Sync {
    type Record: PendingRecord;

    /// Status tag written on success.
    fn target(&self) -> Stage;

    async fn process(&self, record: &Self::Record) -> Result<Outcome, AppError>;
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Page size and concurrent fan-out width.
    pub batch_size: usize,
    pub filter: SourceFilter,
    /// Also pick up records whose last attempt at this stage failed.
    pub retry_errors: bool,
    /// Pause between batches.
    pub pause: Option<Duration>,
    /// Stop after this many records.
    pub limit: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            filter: SourceFilter::default(),
            retry_errors: false,
            pause: None,
            limit: None,
        }
    }
}

impl RunOptions {
    pub fn width(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

/// Per-run summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub processed: usize,
    pub advanced: usize,
    /// Advanced without an adapter call for lack of input.
    pub skipped: usize,
    pub failed: Vec<(Uuid, String)>,
}

impl StageReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What gets written back for one record.
enum RecordWrite {
    Advance(UpdatePayload),
    Failure(String),
}

/// Walks the pending records of one stage.
///
/// Writes go to the store as given; [`crate::stages::PipelineContext`] hands
/// out a store whose writes sit behind the circuit breaker.
pub struct StageRunner {
    store: Arc<dyn RecordStore>,
}

impl StageRunner {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn persist<R: PendingRecord>(
        &self,
        table: Table,
        record: &R,
        target: Stage,
        write: RecordWrite,
    ) -> Result<(), AppError> {
        match write {
            RecordWrite::Advance(payload) => {
                self.store.update(table, record.id(), &payload).await?;
                if record.failed_stage().is_some() {
                    self.store.clear_failure(table, record.id()).await?;
                }
                Ok(())
            }
            RecordWrite::Failure(message) => {
                self.store
                    .mark_failed(table, record.id(), target, &message)
                    .await
            }
        }
    }

    pub async fn run<W: StageWorker>(
        &self,
        worker: &W,
        options: &RunOptions,
    ) -> Result<StageReport, AppError> {
        let kind = W::Record::KIND;
        let target = worker.target();
        let table = Table::for_kind(kind);
        let statuses = kind.pending_states(target);
        let retry_stage = options.retry_errors.then_some(target);
        let width = options.width();
        let mut report = StageReport::default();

        if statuses.is_empty() {
            tracing::warn!("No status precedes {} for {:?} records", target, kind);
            return Ok(report);
        }

        tracing::info!(
            "Running stage {} over {} (batch size {}, retry errors: {})",
            target,
            table.name(),
            width,
            options.retry_errors
        );

        let mut after_id = None;
        loop {
            let mut page_size = width;
            if let Some(limit) = options.limit {
                page_size = page_size.min(limit.saturating_sub(report.processed));
                if page_size == 0 {
                    break;
                }
            }

            let query = PendingQuery {
                statuses: statuses.clone(),
                retry_stage,
                filter: options.filter.clone(),
                after_id,
                limit: page_size,
            };
            let records = W::Record::fetch_pending(self.store.as_ref(), &query).await?;
            if records.is_empty() {
                break;
            }
            let last_page = records.len() < page_size;
            after_id = records.iter().map(|r| r.id()).max();

            let results: Vec<_> = stream::iter(records.iter())
                .map(|record| async move { (record, worker.process(record).await) })
                .buffer_unordered(width)
                .collect()
                .await;

            let mut fatal = None;
            for (record, result) in results {
                report.processed += 1;

                if let Some(current) = record.status() {
                    if !kind.can_transition(current, target) {
                        tracing::warn!(
                            "Skipping {}: {} cannot move from {} to {}",
                            record.label(),
                            table.name(),
                            current,
                            target
                        );
                        continue;
                    }
                }

                let (write, label) = match result {
                    Ok(Outcome::Advance(payload)) => {
                        report.advanced += 1;
                        (RecordWrite::Advance(payload.with_status(target)), "advanced")
                    }
                    Ok(Outcome::NoInput) => {
                        report.skipped += 1;
                        (
                            RecordWrite::Advance(UpdatePayload::new().with_status(target)),
                            "no input",
                        )
                    }
                    Err(e) if e.is_fatal() => {
                        tracing::error!("Stopping {}: {} on {}", target, e, record.label());
                        fatal.get_or_insert(e);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("{} failed for {}: {}", target, record.label(), e);
                        report.failed.push((record.id(), e.to_string()));
                        (RecordWrite::Failure(e.to_string()), "failure recorded")
                    }
                };

                match self.persist(table, record, target, write).await {
                    Ok(()) => tracing::debug!("{} {}: {}", target, label, record.label()),
                    Err(e) if e.is_fatal() => {
                        fatal.get_or_insert(e);
                    }
                    Err(e) => {
                        tracing::error!("Failed to write {} for {}: {}", target, record.label(), e);
                        report.failed.push((record.id(), e.to_string()));
                    }
                }
            }

            tracing::info!(
                "{}: {} processed, {} advanced, {} without input, {} failed",
                target,
                report.processed,
                report.advanced,
                report.skipped,
                report.failed.len()
            );

            if let Some(e) = fatal {
                return Err(e);
            }
            if last_page {
                break;
            }

            if let Some(pause) = options.pause {
                tokio::time::sleep(pause).await;
            }
        }

        tracing::info!(
            "Finished stage {}: {} processed, {} advanced, {} without input, {} failed",
            target,
            report.processed,
            report.advanced,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }
}
