//! CDC consumer task
//!
//! Subscribes to the capture stream and, for each message:
//! 1. Parses the change record (malformed records are logged and skipped)
//! 2. Adapts it into a domain event (unknown ops and tables are dropped)
//! 3. Publishes the event, retrying retriable failures with backoff

use crate::record::CdcRecord;
use crate::stream::{ChangeStream, RawMessage};
use crate::{CdcAdapter, CdcResult};
use event_bus::{retry_with_backoff_if, BusError, DomainEvent, EventPublisher, RetryConfig};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Counters for one consumer task
#[derive(Debug, Default)]
pub struct CdcConsumerStats {
    pub received: AtomicU64,
    pub published: AtomicU64,
    pub skipped: AtomicU64,
    pub rejected: AtomicU64,
    pub failed: AtomicU64,
}

impl CdcConsumerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to a running CDC consumer
pub struct CdcConsumer {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    stats: Arc<CdcConsumerStats>,
}

impl CdcConsumer {
    pub fn stats(&self) -> &CdcConsumerStats {
        &self.stats
    }

    /// Stop pulling new records and wait for the one in progress
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "CDC consumer task ended abnormally");
        }
    }
}

/// Subscribe to `subject` and spawn the consumer task.
///
/// Fails only if the subscription itself fails. The task runs until `cancel`
/// fires or the stream ends.
pub async fn start_cdc_consumer(
    stream: Arc<dyn ChangeStream>,
    subject: &str,
    adapter: Arc<CdcAdapter>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> CdcResult<CdcConsumer> {
    let mut messages = stream.subscribe(subject).await?;
    tracing::info!(subject, "Subscribed to CDC stream");

    let stats = Arc::new(CdcConsumerStats::default());
    let task_stats = stats.clone();
    let task_cancel = cancel.clone();
    let subject = subject.to_string();

    let handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                msg = messages.next() => match msg {
                    Some(msg) => msg,
                    None => {
                        tracing::warn!(subject = %subject, "CDC stream ended");
                        break;
                    }
                },
            };

            CdcConsumerStats::bump(&task_stats.received);
            handle_message(&msg, &adapter, publisher.as_ref(), &retry, &task_stats).await;
        }

        tracing::info!(subject = %subject, "CDC consumer stopped");
    });

    Ok(CdcConsumer {
        handle,
        cancel,
        stats,
    })
}

async fn handle_message(
    msg: &RawMessage,
    adapter: &CdcAdapter,
    publisher: &dyn EventPublisher,
    retry: &RetryConfig,
    stats: &CdcConsumerStats,
) {
    let mut record = match CdcRecord::from_slice(&msg.payload) {
        Ok(record) => record,
        Err(e) => {
            CdcConsumerStats::bump(&stats.rejected);
            tracing::error!(subject = %msg.subject, error = %e, "Malformed CDC record skipped");
            return;
        }
    };

    // Debezium topics end in the table name when the source block omits it
    if record.source.table.is_none() {
        record.source.table = msg.subject.rsplit('.').next().map(str::to_string);
    }

    let event = match adapter.adapt(&record) {
        Ok(Some(event)) => event,
        Ok(None) => {
            CdcConsumerStats::bump(&stats.skipped);
            return;
        }
        Err(e) => {
            CdcConsumerStats::bump(&stats.rejected);
            tracing::error!(
                subject = %msg.subject,
                op = %record.op,
                error = %e,
                "CDC record rejected"
            );
            return;
        }
    };

    let span = tracing::info_span!(
        "cdc_publish",
        event_id = %event.event_id(),
        event_type = %event.event_type(),
        aggregate_id = %event.aggregate_id(),
        tenant_id = %event.tenant_id(),
    );

    async {
        let result = retry_with_backoff_if(
            || publish(publisher, event.clone()),
            retry,
            "cdc_consumer",
            BusError::is_retriable,
        )
        .await;

        match result {
            Ok(()) => CdcConsumerStats::bump(&stats.published),
            Err(e) => {
                CdcConsumerStats::bump(&stats.failed);
                tracing::error!(
                    error = %e,
                    attempts = retry.max_attempts,
                    "CDC event could not be published, record dropped"
                );
            }
        }
    }
    .instrument(span)
    .await;
}

async fn publish(publisher: &dyn EventPublisher, event: DomainEvent) -> Result<(), BusError> {
    publisher.publish(event).await
}
