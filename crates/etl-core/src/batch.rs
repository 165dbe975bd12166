//! Batch execution: feed a row source through the resolver and tally
//! what happened to every record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::LoadOptions;
use crate::error::{BatchError, ResolveError, SourceError};
use crate::partition::{self, Stage};
use crate::resolver::{InstanceResolver, Outcome, ResolveInput, ResolveOptions};
use crate::store::Store;
use crate::value::{RawRecord, RawValue};

/// Outcome counters for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: u64,
    pub created: u64,
    pub updated: u64,
    pub existing: u64,
    pub rejected: u64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created(_) => self.created += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Exists(_) => self.existing += 1,
            Outcome::Rejected(_) => self.rejected += 1,
        }
        self.total += 1;
    }

    /// Mark stats as completed
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    /// Sum the counters of another batch into this one; timing is left to
    /// the caller
    pub fn absorb(&mut self, other: &BatchStats) {
        self.total += other.total;
        self.created += other.created;
        self.updated += other.updated;
        self.existing += other.existing;
        self.rejected += other.rejected;
    }

    pub fn records_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.total as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// One rejected input row
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    /// 1-based position in the source
    pub ordinal: u64,
    pub reason: String,
    /// Raw input as read; absent when the row could not be read at all
    pub record: Option<RawRecord>,
}

impl RejectedRecord {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ordinal": self.ordinal,
            "reason": self.reason,
            "record": self.record.clone().map(|r| RawValue::Record(r).to_json()),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub stats: BatchStats,
    pub rejected: Vec<RejectedRecord>,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

impl BatchReport {
    fn new() -> Self {
        Self {
            stats: BatchStats::new(),
            ..Default::default()
        }
    }
}

/// Receives every outcome of a batch in the order it is decided
pub trait OutcomeSink: Send {
    fn outcome(&mut self, ordinal: u64, outcome: &Outcome);

    /// Called every `feedback_size` records
    fn progress(&mut self, _stats: &BatchStats) {}
}

/// Logs outcomes through `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn outcome(&mut self, ordinal: u64, outcome: &Outcome) {
        match outcome.row() {
            Some(row) => tracing::debug!(ordinal, outcome = outcome.label(), row = %row, "Record loaded"),
            None => tracing::debug!(ordinal, outcome = %outcome, "Record not loaded"),
        }
    }

    fn progress(&mut self, stats: &BatchStats) {
        tracing::info!(
            processed = stats.total,
            created = stats.created,
            updated = stats.updated,
            existing = stats.existing,
            rejected = stats.rejected,
            "Batch progress"
        );
    }
}

type Validator = Arc<dyn Fn(&RawRecord) -> Result<(), String> + Send + Sync>;
type Transform = Arc<dyn Fn(RawRecord) -> RawRecord + Send + Sync>;

/// Fill fields the record leaves absent or null
pub fn apply_defaults(mut record: RawRecord, defaults: &RawRecord) -> RawRecord {
    for (name, value) in defaults {
        let missing = record.get(name).map_or(true, RawValue::is_null);
        if missing {
            record.insert(name.clone(), value.clone());
        }
    }
    record
}

/// Runs one root entity's records through an [`InstanceResolver`]
#[derive(Clone)]
pub struct BatchRunner {
    resolver: Arc<InstanceResolver>,
    entity: String,
    options: LoadOptions,
    resolve_options: ResolveOptions,
    defaults: RawRecord,
    cancel: CancellationToken,
    validator: Option<Validator>,
    transform: Option<Transform>,
}

impl BatchRunner {
    pub fn new(resolver: Arc<InstanceResolver>, entity: impl Into<String>, options: LoadOptions) -> Self {
        Self {
            resolver,
            entity: entity.into(),
            resolve_options: options.resolve_options(),
            defaults: options.defaults_record(),
            options,
            cancel: CancellationToken::new(),
            validator: None,
            transform: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Reject records the validator refuses before they reach the store
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&RawRecord) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Reshape each record after defaults are applied
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(RawRecord) -> RawRecord + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Schema checks that must pass before the first record is touched
    pub fn preflight(&self) -> Result<(), BatchError> {
        self.resolver
            .schema()
            .check_keys(&self.entity, self.options.persistence_key.as_deref())?;
        Ok(())
    }

    /// Process `source` record by record on one store
    #[tracing::instrument(skip_all, fields(entity = %self.entity))]
    pub async fn run<I>(
        &self,
        store: &mut dyn Store,
        source: I,
        sink: &mut dyn OutcomeSink,
    ) -> Result<BatchReport, BatchError>
    where
        I: IntoIterator<Item = Result<RawRecord, SourceError>>,
    {
        self.preflight()?;
        tracing::info!(
            slice_begin = ?self.options.slice_begin,
            slice_end = ?self.options.slice_end,
            "Batch started"
        );

        let feedback = self.options.feedback_size.max(1);
        let mut report = BatchReport::new();
        for (ordinal, item) in (1u64..).zip(source) {
            if self.options.past_slice(ordinal) {
                break;
            }
            if !self.options.in_slice(ordinal) {
                continue;
            }
            if self.cancel.is_cancelled() {
                tracing::info!(ordinal, "Batch cancelled");
                report.cancelled = true;
                break;
            }

            let outcome = self.handle(store, ordinal, item, &mut report).await?;
            sink.outcome(ordinal, &outcome);
            if report.stats.total % feedback == 0 {
                sink.progress(&report.stats);
            }
        }

        report.stats.complete();
        self.log_summary(&report);
        Ok(report)
    }

    /// Process `source` on one store per worker.
    ///
    /// Records are routed by the hash of their coerced root persistence-key
    /// values and keep their input order within a worker. Records whose key
    /// is only partly filled run on their own between the parallel stages.
    /// Only root-entity rows are guaranteed to be owned by a single worker;
    /// related rows shared by records of different workers can still
    /// collide.
    #[tracing::instrument(skip_all, fields(entity = %self.entity, workers = stores.len()))]
    pub async fn run_partitioned<I>(
        &self,
        mut stores: Vec<Box<dyn Store>>,
        source: I,
        sink: &mut dyn OutcomeSink,
    ) -> Result<BatchReport, BatchError>
    where
        I: IntoIterator<Item = Result<RawRecord, SourceError>>,
    {
        self.preflight()?;
        if stores.is_empty() {
            return Err(BatchError::Worker {
                worker: 0,
                message: "no store handles given".to_string(),
            });
        }
        let workers = stores.len();
        let feedback = self.options.feedback_size.max(1);
        let schema = self.resolver.schema();
        let def = schema.entity(&self.entity)?;
        let key = schema.persistence_key(&self.entity, self.options.persistence_key.as_deref())?;

        let mut report = BatchReport::new();
        let mut live = BatchStats::new();
        let mut routed = Vec::new();
        for (ordinal, item) in (1u64..).zip(source) {
            if self.options.past_slice(ordinal) {
                break;
            }
            if !self.options.in_slice(ordinal) {
                continue;
            }
            match item {
                Ok(raw) => {
                    let record = self.prepare(raw.clone());
                    let route = partition::route(&record, def, &key, ordinal, workers);
                    routed.push((ordinal, (raw, record), route));
                }
                Err(err) => {
                    let outcome = self.reject(&mut report, ordinal, None, err.to_string());
                    emit(sink, &mut live, feedback, ordinal, &outcome);
                }
            }
        }

        let stages = partition::stages(routed, workers);
        tracing::info!(stages = stages.len(), "Batch partitioned");

        for stage in stages {
            if self.cancel.is_cancelled() {
                tracing::info!("Batch cancelled");
                report.cancelled = true;
                break;
            }
            match stage {
                Stage::Serial(run) => {
                    let store = stores[0].as_mut();
                    for (ordinal, (raw, record)) in run {
                        if self.cancel.is_cancelled() {
                            tracing::info!(ordinal, "Batch cancelled");
                            report.cancelled = true;
                            break;
                        }
                        let outcome = self.process(store, ordinal, raw, record, &mut report).await?;
                        emit(sink, &mut live, feedback, ordinal, &outcome);
                    }
                }
                Stage::Parallel(parts) => {
                    tracing::debug!(
                        sizes = ?parts.iter().map(Vec::len).collect::<Vec<_>>(),
                        "Parallel stage"
                    );
                    stores = self
                        .run_stage(stores, parts, sink, &mut live, feedback, &mut report)
                        .await?;
                }
            }
        }
        report.rejected.sort_by_key(|r| r.ordinal);

        report.stats.complete();
        self.log_summary(&report);
        Ok(report)
    }

    /// One parallel stage: a task per store, outcomes streamed back as they
    /// happen. The stores are handed back for the next stage.
    async fn run_stage(
        &self,
        stores: Vec<Box<dyn Store>>,
        parts: Vec<Vec<(u64, (RawRecord, RawRecord))>>,
        sink: &mut dyn OutcomeSink,
        live: &mut BatchStats,
        feedback: u64,
        report: &mut BatchReport,
    ) -> Result<Vec<Box<dyn Store>>, BatchError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, Outcome)>();
        let mut handles = Vec::with_capacity(stores.len());
        for (worker, (mut store, part)) in stores.into_iter().zip(parts).enumerate() {
            let runner = self.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let mut report = BatchReport::new();
                for (ordinal, (raw, record)) in part {
                    if runner.cancel.is_cancelled() {
                        tracing::info!(worker, ordinal, "Worker cancelled");
                        report.cancelled = true;
                        break;
                    }
                    let outcome = runner
                        .process(store.as_mut(), ordinal, raw, record, &mut report)
                        .await?;
                    // The receiver only goes away if the coordinator is gone
                    let _ = tx.send((ordinal, outcome));
                }
                Ok::<_, BatchError>((store, report))
            }));
        }
        drop(tx);

        while let Some((ordinal, outcome)) = rx.recv().await {
            emit(sink, live, feedback, ordinal, &outcome);
        }

        let mut stores = Vec::with_capacity(handles.len());
        for (worker, handle) in handles.into_iter().enumerate() {
            let (store, part) = handle.await.map_err(|err| BatchError::Worker {
                worker,
                message: err.to_string(),
            })??;
            stores.push(store);
            report.stats.absorb(&part.stats);
            report.rejected.extend(part.rejected);
            report.cancelled |= part.cancelled;
        }
        Ok(stores)
    }

    /// Defaults, then the transform
    fn prepare(&self, raw: RawRecord) -> RawRecord {
        let record = apply_defaults(raw, &self.defaults);
        match self.transform {
            Some(ref transform) => transform(record),
            None => record,
        }
    }

    async fn handle(
        &self,
        store: &mut dyn Store,
        ordinal: u64,
        item: Result<RawRecord, SourceError>,
        report: &mut BatchReport,
    ) -> Result<Outcome, BatchError> {
        match item {
            Ok(raw) => {
                let record = self.prepare(raw.clone());
                self.process(store, ordinal, raw, record, report).await
            }
            Err(err) => Ok(self.reject(report, ordinal, None, err.to_string())),
        }
    }

    /// Validate and resolve one prepared record; `raw` is kept for the
    /// rejection log
    async fn process(
        &self,
        store: &mut dyn Store,
        ordinal: u64,
        raw: RawRecord,
        record: RawRecord,
        report: &mut BatchReport,
    ) -> Result<Outcome, BatchError> {
        if let Some(ref validator) = self.validator {
            if let Err(reason) = validator(&record) {
                return Ok(self.reject(report, ordinal, Some(raw), format!("invalid record: {}", reason)));
            }
        }

        let result = self
            .resolver
            .resolve(store, &self.entity, ResolveInput::Fields(record), &self.resolve_options)
            .await;

        match result {
            Ok(resolution) => match resolution.outcome {
                Outcome::Rejected(reason) => Ok(self.reject(report, ordinal, Some(raw), reason)),
                outcome => {
                    report.stats.record(&outcome);
                    Ok(outcome)
                }
            },
            Err(ResolveError::Schema(err)) => {
                tracing::error!(ordinal, error = %err, "Schema error, aborting batch");
                Err(BatchError::Schema(err))
            }
            Err(err) => Ok(self.reject(report, ordinal, Some(raw), err.to_string())),
        }
    }

    fn reject(
        &self,
        report: &mut BatchReport,
        ordinal: u64,
        record: Option<RawRecord>,
        reason: String,
    ) -> Outcome {
        tracing::warn!(ordinal, reason = %reason, "Record rejected");
        let outcome = Outcome::Rejected(reason.clone());
        report.stats.record(&outcome);
        report.rejected.push(RejectedRecord {
            ordinal,
            reason,
            record,
        });
        outcome
    }

    fn log_summary(&self, report: &BatchReport) {
        let stats = &report.stats;
        tracing::info!(
            total = stats.total,
            created = stats.created,
            updated = stats.updated,
            existing = stats.existing,
            rejected = stats.rejected,
            cancelled = report.cancelled,
            duration_secs = stats.duration_secs,
            records_per_second = stats.records_per_second(),
            "Batch finished"
        );
    }
}

/// Forward one outcome to the sink, with a progress report every
/// `feedback` records
fn emit(sink: &mut dyn OutcomeSink, live: &mut BatchStats, feedback: u64, ordinal: u64, outcome: &Outcome) {
    live.record(outcome);
    sink.outcome(ordinal, outcome);
    if live.total % feedback == 0 {
        sink.progress(live);
    }
}
