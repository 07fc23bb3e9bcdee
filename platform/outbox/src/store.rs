use crate::{OutboxRecord, OutboxResult, OutboxStats};
use async_trait::async_trait;
use event_bus::DomainEvent;
use std::time::Duration;
use uuid::Uuid;

/// Durable, append-mostly log of domain events awaiting dispatch.
///
/// Implementations must keep `fetch_unprocessed` ordered by `created_at`
/// (ties broken by insertion order) and must never purge a record that has
/// not been processed.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Store a new, unprocessed record. Fails with `DuplicateKey` if the
    /// event_id is already present.
    async fn append(&self, event: &DomainEvent) -> OutboxResult<()>;

    /// Up to `limit` unprocessed records, oldest first
    async fn fetch_unprocessed(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>>;

    /// Set `processed_at`. Idempotent: a second call keeps the first timestamp.
    async fn mark_processed(&self, event_id: Uuid) -> OutboxResult<()>;

    /// Delete records processed more than `retention` ago. Returns the number removed.
    async fn purge_processed_older_than(&self, retention: Duration) -> OutboxResult<u64>;

    async fn stats_snapshot(&self) -> OutboxResult<OutboxStats>;

    /// Every stored record for one aggregate, oldest first, processed or not
    async fn fetch_by_aggregate(&self, aggregate_id: &str) -> OutboxResult<Vec<OutboxRecord>>;

    /// Up to `limit` stored records of one event type, oldest first
    async fn fetch_by_type(&self, event_type: &str, limit: usize)
        -> OutboxResult<Vec<OutboxRecord>>;
}

pub(crate) fn retention_cutoff(
    retention: Duration,
) -> OutboxResult<chrono::DateTime<chrono::Utc>> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| crate::OutboxError::InvalidRetention(e.to_string()))?;
    chrono::Utc::now()
        .checked_sub_signed(retention)
        .ok_or_else(|| crate::OutboxError::InvalidRetention("retention out of range".to_string()))
}
