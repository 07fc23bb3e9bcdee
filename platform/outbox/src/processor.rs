//! Background outbox processor.
//!
//! Two loops share one cancellation token:
//!
//! - **drain** (every `poll_interval`): fetch up to `batch_size` unprocessed
//!   records, dispatch each through the handler registry, mark successes processed
//! - **cleanup** (every `cleanup_interval`): purge records processed more than
//!   `retention` ago
//!
//! Delivery is at-least-once. A record is marked processed only after every
//! handler for its type succeeded, so a crash between handling and marking
//! re-delivers the event on the next drain. A failing record never blocks the
//! rest of its batch.

use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::{OutboxError, OutboxRecord, OutboxResult, OutboxStats, OutboxStore};
use chrono::Utc;
use event_bus::{DispatchOutcome, DomainEvent, HandlerRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention: Duration,
    /// Move an event to the dead-letter sink after `dead_letter_threshold`
    /// consecutive failures. Off by default: failing events are retried forever.
    pub enable_dead_letter: bool,
    pub dead_letter_threshold: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            enable_dead_letter: false,
            dead_letter_threshold: 5,
        }
    }
}

impl ProcessorConfig {
    /// Intervals and batch size must be non-zero, and an enabled dead letter
    /// needs a threshold of at least one failure
    pub fn validate(&self) -> OutboxResult<()> {
        if self.batch_size == 0 {
            return Err(OutboxError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(OutboxError::InvalidConfig("poll_interval must be non-zero".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(OutboxError::InvalidConfig("cleanup_interval must be non-zero".into()));
        }
        if self.enable_dead_letter && self.dead_letter_threshold == 0 {
            return Err(OutboxError::InvalidConfig(
                "dead_letter_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// What one drain pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub fetched: usize,
    pub processed: usize,
    /// No handler registered; marked processed without dispatch
    pub dropped_unknown: usize,
    /// Left unprocessed for the next pass
    pub failed: usize,
    pub dead_lettered: usize,
}

/// What one replay did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_unknown: usize,
}

/// Outbox counts plus processor counters
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    #[serde(flatten)]
    pub outbox: OutboxStats,
    pub is_running: bool,
    pub processed_total: u64,
    pub failed_total: u64,
    pub dropped_unknown_total: u64,
    pub dead_lettered_total: u64,
    /// Events handled per second since `start`
    pub processing_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Processed,
    DroppedUnknown,
    Failed,
    DeadLettered,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    dropped_unknown: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
    started_at: Option<Instant>,
}

pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    registry: Arc<HandlerRegistry>,
    config: ProcessorConfig,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    failures: Mutex<HashMap<Uuid, u32>>,
    counters: Counters,
    lifecycle: Mutex<Lifecycle>,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: Arc<HandlerRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            dead_letter: None,
            failures: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Attach the sink used when `enable_dead_letter` is set
    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Spawn the drain and cleanup loops
    pub fn start(self: &Arc<Self>) -> OutboxResult<()> {
        self.config.validate()?;
        let mut lifecycle = self.lifecycle()?;
        if lifecycle.cancel.is_some() {
            return Err(OutboxError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        lifecycle.tasks = vec![
            tokio::spawn(Arc::clone(self).drain_loop(cancel.clone())),
            tokio::spawn(Arc::clone(self).cleanup_loop(cancel.clone())),
        ];
        lifecycle.cancel = Some(cancel);
        lifecycle.started_at = Some(Instant::now());

        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            cleanup_interval_secs = self.config.cleanup_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            dead_letter = self.config.enable_dead_letter,
            "Outbox processor started"
        );
        Ok(())
    }

    /// Cancel both loops and wait for them. A drain pass already in progress
    /// finishes its batch first. Stopping a stopped processor is a no-op.
    pub async fn stop(&self) {
        let (cancel, tasks) = match self.lifecycle() {
            Ok(mut lifecycle) => {
                lifecycle.started_at = None;
                (lifecycle.cancel.take(), std::mem::take(&mut lifecycle.tasks))
            }
            Err(e) => {
                tracing::error!(error = %e, "Outbox processor lifecycle unavailable");
                return;
            }
        };

        let Some(cancel) = cancel else {
            return;
        };
        cancel.cancel();

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Outbox processor task ended abnormally");
            }
        }
        tracing::info!("Outbox processor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle()
            .map(|lifecycle| lifecycle.cancel.is_some())
            .unwrap_or(false)
    }

    /// Not running, or running with a loop that has exited, is unhealthy
    pub fn health(&self) -> OutboxResult<()> {
        let lifecycle = self.lifecycle()?;
        if lifecycle.cancel.is_none() {
            return Err(OutboxError::NotRunning);
        }
        if lifecycle.tasks.iter().any(JoinHandle::is_finished) {
            return Err(OutboxError::Internal(
                "outbox processor loop exited unexpectedly".to_string(),
            ));
        }
        Ok(())
    }

    /// Run one drain pass
    pub async fn drain_once(&self) -> OutboxResult<DrainReport> {
        let records = self.store.fetch_unprocessed(self.config.batch_size).await?;
        let mut report = DrainReport {
            fetched: records.len(),
            ..DrainReport::default()
        };

        for record in &records {
            match self.process_record(record).await {
                RecordOutcome::Processed => report.processed += 1,
                RecordOutcome::DroppedUnknown => report.dropped_unknown += 1,
                RecordOutcome::Failed => report.failed += 1,
                RecordOutcome::DeadLettered => report.dead_lettered += 1,
            }
        }

        Ok(report)
    }

    /// Run one retention purge
    pub async fn cleanup_once(&self) -> OutboxResult<u64> {
        self.store
            .purge_processed_older_than(self.config.retention)
            .await
    }

    /// Re-dispatch every stored record of one aggregate, processed or not
    pub async fn replay_by_aggregate(&self, aggregate_id: &str) -> OutboxResult<ReplayReport> {
        let records = self.store.fetch_by_aggregate(aggregate_id).await?;
        tracing::info!(aggregate_id, count = records.len(), "Replaying events by aggregate");
        Ok(self.replay(&records).await)
    }

    /// Re-dispatch up to `limit` stored records of one event type
    pub async fn replay_by_type(&self, event_type: &str, limit: usize) -> OutboxResult<ReplayReport> {
        let records = self.store.fetch_by_type(event_type, limit).await?;
        tracing::info!(event_type, count = records.len(), "Replaying events by type");
        Ok(self.replay(&records).await)
    }

    pub async fn stats(&self) -> OutboxResult<ProcessorStats> {
        let outbox = self.store.stats_snapshot().await?;
        let started_at = self.lifecycle()?.started_at;
        let processed_total = self.counters.processed.load(Ordering::Relaxed);

        let processing_rate = match started_at {
            Some(started) => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    processed_total as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        Ok(ProcessorStats {
            outbox,
            is_running: started_at.is_some(),
            processed_total,
            failed_total: self.counters.failed.load(Ordering::Relaxed),
            dropped_unknown_total: self.counters.dropped_unknown.load(Ordering::Relaxed),
            dead_lettered_total: self.counters.dead_lettered.load(Ordering::Relaxed),
            processing_rate,
        })
    }

    async fn replay(&self, records: &[OutboxRecord]) -> ReplayReport {
        let mut report = ReplayReport {
            replayed: records.len(),
            ..ReplayReport::default()
        };

        for record in records {
            match self.process_record(record).await {
                RecordOutcome::Processed => report.succeeded += 1,
                RecordOutcome::DroppedUnknown => report.skipped_unknown += 1,
                RecordOutcome::Failed | RecordOutcome::DeadLettered => report.failed += 1,
            }
        }

        report
    }

    async fn process_record(&self, record: &OutboxRecord) -> RecordOutcome {
        let event = &record.event;
        let span = tracing::info_span!(
            "outbox_dispatch",
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            aggregate_id = %event.aggregate_id(),
            tenant_id = %event.tenant_id(),
        );

        async {
            let outcome = match self.registry.dispatch(event).await {
                Ok(DispatchOutcome::NoHandler) => {
                    tracing::warn!("No handler registered for event type, marking processed");
                    self.finish(event, RecordOutcome::DroppedUnknown).await
                }
                Ok(DispatchOutcome::Handled { handlers }) => {
                    tracing::debug!(handlers, "Event handled");
                    self.finish(event, RecordOutcome::Processed).await
                }
                Err(e) => {
                    let failures = self.record_failure(event.event_id());
                    tracing::error!(
                        handler = %e.handler,
                        retriable = e.source.is_retriable(),
                        failures,
                        error = %e.source,
                        "Event handler failed, leaving event unprocessed"
                    );

                    if self.should_dead_letter(failures) {
                        self.move_to_dead_letter(event, &e.handler, &e.source.to_string(), failures)
                            .await
                    } else {
                        RecordOutcome::Failed
                    }
                }
            };

            let counter = match outcome {
                RecordOutcome::Processed => &self.counters.processed,
                RecordOutcome::DroppedUnknown => &self.counters.dropped_unknown,
                RecordOutcome::Failed => &self.counters.failed,
                RecordOutcome::DeadLettered => &self.counters.dead_lettered,
            };
            counter.fetch_add(1, Ordering::Relaxed);

            outcome
        }
        .instrument(span)
        .await
    }

    /// Mark processed and forget the failure streak. If marking fails the
    /// event stays unprocessed and will be handled again.
    async fn finish(&self, event: &DomainEvent, outcome: RecordOutcome) -> RecordOutcome {
        match self.store.mark_processed(event.event_id()).await {
            Ok(()) => {
                self.clear_failures(event.event_id());
                outcome
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark event processed");
                RecordOutcome::Failed
            }
        }
    }

    fn should_dead_letter(&self, failures: u32) -> bool {
        self.config.enable_dead_letter
            && self.dead_letter.is_some()
            && failures >= self.config.dead_letter_threshold
    }

    async fn move_to_dead_letter(
        &self,
        event: &DomainEvent,
        handler: &str,
        error: &str,
        failures: u32,
    ) -> RecordOutcome {
        let Some(sink) = &self.dead_letter else {
            return RecordOutcome::Failed;
        };

        let letter = DeadLetter {
            event: event.clone(),
            handler: handler.to_string(),
            error: error.to_string(),
            failure_count: failures,
            failed_at: Utc::now(),
        };

        if let Err(e) = sink.write(&letter).await {
            tracing::error!(error = %e, "Failed to write dead letter, event will be retried");
            return RecordOutcome::Failed;
        }

        tracing::warn!(failures, "Event dead-lettered");
        self.finish(event, RecordOutcome::DeadLettered).await
    }

    fn record_failure(&self, event_id: Uuid) -> u32 {
        match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(event_id).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 1,
        }
    }

    fn clear_failures(&self, event_id: Uuid) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(&event_id);
        }
    }

    fn lifecycle(&self) -> OutboxResult<std::sync::MutexGuard<'_, Lifecycle>> {
        self.lifecycle
            .lock()
            .map_err(|_| OutboxError::Internal("processor lifecycle mutex poisoned".to_string()))
    }

    async fn drain_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tick_count += 1;

            match self.drain_once().await {
                Ok(report) if report.fetched > 0 => {
                    tracing::info!(
                        tick = tick_count,
                        fetched = report.fetched,
                        processed = report.processed,
                        dropped_unknown = report.dropped_unknown,
                        failed = report.failed,
                        dead_lettered = report.dead_lettered,
                        "Outbox drain pass"
                    );
                }
                Ok(_) => {
                    if tick_count <= 3 || tick_count % 60 == 0 {
                        tracing::info!(tick = tick_count, "Outbox drain pass: no unprocessed events");
                    }
                }
                Err(e) => {
                    tracing::error!(tick = tick_count, error = %e, "Outbox drain pass failed");
                }
            }
        }

        tracing::debug!("Outbox drain loop exited");
    }

    async fn cleanup_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.cleanup_once().await {
                Ok(0) => tracing::debug!("Outbox cleanup: nothing to purge"),
                Ok(purged) => tracing::info!(purged, "Outbox cleanup purged processed events"),
                Err(e) => tracing::error!(error = %e, "Outbox cleanup failed"),
            }
        }

        tracing::debug!("Outbox cleanup loop exited");
    }
}

impl std::fmt::Debug for OutboxProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxProcessor")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("is_running", &self.is_running())
            .finish()
    }
}
