//! In-memory outbox for tests and single-process deployments without Postgres.
//!
//! A transaction is emulated with [`InMemoryOutboxTx`]: events appended to it
//! are staged and only become visible to the processor on `commit`. Dropping
//! the transaction discards them, the same way a rolled-back SQL transaction
//! discards its outbox rows.

use crate::store::retention_cutoff;
use crate::{OutboxError, OutboxRecord, OutboxResult, OutboxStats, OutboxStore};
use async_trait::async_trait;
use chrono::Utc;
use event_bus::DomainEvent;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    records: Mutex<Vec<OutboxRecord>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a staging transaction
    pub fn begin(&self) -> InMemoryOutboxTx<'_> {
        InMemoryOutboxTx {
            store: self,
            staged: Vec::new(),
        }
    }

    /// Insert a record with its bookkeeping as-is (restores, backfills)
    pub fn insert_record(&self, record: OutboxRecord) -> OutboxResult<()> {
        let mut records = self.lock()?;
        if records
            .iter()
            .any(|r| r.event.event_id() == record.event.event_id())
        {
            return Err(OutboxError::DuplicateKey(record.event.event_id()));
        }
        records.push(record);
        Ok(())
    }

    /// Copy of one record, if stored
    pub fn get(&self, event_id: Uuid) -> OutboxResult<Option<OutboxRecord>> {
        Ok(self
            .lock()?
            .iter()
            .find(|r| r.event.event_id() == event_id)
            .cloned())
    }

    pub fn len(&self) -> OutboxResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> OutboxResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> OutboxResult<MutexGuard<'_, Vec<OutboxRecord>>> {
        self.records
            .lock()
            .map_err(|_| OutboxError::Internal("outbox mutex poisoned".to_string()))
    }

    fn append_all(&self, events: Vec<DomainEvent>) -> OutboxResult<()> {
        let mut records = self.lock()?;
        for event in &events {
            if records.iter().any(|r| r.event.event_id() == event.event_id()) {
                return Err(OutboxError::DuplicateKey(event.event_id()));
            }
        }

        let now = Utc::now();
        for event in events {
            tracing::debug!(
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                "Event appended to outbox"
            );
            records.push(OutboxRecord::new(event, now));
        }
        Ok(())
    }

    /// Records matching `keep`, sorted oldest first. The sort is stable so
    /// records sharing a `created_at` stay in insertion order.
    fn select(
        &self,
        limit: Option<usize>,
        keep: impl Fn(&OutboxRecord) -> bool,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let records = self.lock()?;
        let mut selected: Vec<OutboxRecord> = records.iter().filter(|r| keep(r)).cloned().collect();
        selected.sort_by_key(|r| r.created_at);
        if let Some(limit) = limit {
            selected.truncate(limit);
        }
        Ok(selected)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, event: &DomainEvent) -> OutboxResult<()> {
        event.validate().map_err(OutboxError::InvalidEvent)?;
        self.append_all(vec![event.clone()])
    }

    async fn fetch_unprocessed(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>> {
        self.select(Some(limit), |r| !r.is_processed())
    }

    async fn mark_processed(&self, event_id: Uuid) -> OutboxResult<()> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.event.event_id() == event_id)
            .ok_or(OutboxError::NotFound(event_id))?;

        if record.processed_at.is_none() {
            record.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn purge_processed_older_than(&self, retention: Duration) -> OutboxResult<u64> {
        let cutoff = retention_cutoff(retention)?;
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|r| !matches!(r.processed_at, Some(at) if at < cutoff));
        Ok((before - records.len()) as u64)
    }

    async fn stats_snapshot(&self) -> OutboxResult<OutboxStats> {
        let records = self.lock()?;
        let unprocessed = records.iter().filter(|r| !r.is_processed()).count() as u64;
        let total = records.len() as u64;

        Ok(OutboxStats {
            total,
            unprocessed,
            processed: total - unprocessed,
            oldest: records.iter().map(|r| r.created_at).min(),
            newest: records.iter().map(|r| r.created_at).max(),
        })
    }

    async fn fetch_by_aggregate(&self, aggregate_id: &str) -> OutboxResult<Vec<OutboxRecord>> {
        self.select(None, |r| r.event.aggregate_id() == aggregate_id)
    }

    async fn fetch_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        self.select(Some(limit), |r| r.event.event_type() == event_type)
    }
}

/// Events staged for one business transaction
#[derive(Debug)]
pub struct InMemoryOutboxTx<'a> {
    store: &'a InMemoryOutboxStore,
    staged: Vec<DomainEvent>,
}

impl InMemoryOutboxTx<'_> {
    pub fn append(&mut self, event: DomainEvent) -> OutboxResult<()> {
        event.validate().map_err(OutboxError::InvalidEvent)?;
        if self
            .staged
            .iter()
            .any(|staged| staged.event_id() == event.event_id())
        {
            return Err(OutboxError::DuplicateKey(event.event_id()));
        }
        self.staged.push(event);
        Ok(())
    }

    /// Make every staged event visible at once. Nothing is stored if any
    /// staged event_id already exists.
    pub fn commit(self) -> OutboxResult<()> {
        self.store.append_all(self.staged)
    }

    pub fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(aggregate_id: &str, event_type: &str) -> DomainEvent {
        DomainEvent::new(event_type, "organization", aggregate_id, "tenant-1", json!({}))
    }

    #[tokio::test]
    async fn test_fetch_unprocessed_is_oldest_first_and_limited() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let late = event("org-late", "organization.created");
        let early = event("org-early", "organization.created");
        store
            .insert_record(OutboxRecord::new(late.clone(), now))
            .unwrap();
        store
            .insert_record(OutboxRecord::new(
                early.clone(),
                now - chrono::Duration::minutes(5),
            ))
            .unwrap();
        store.append(&event("org-new", "organization.created")).await.unwrap();

        let batch = store.fetch_unprocessed(2).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].event.event_id(), early.event_id());
        assert_eq!(batch[1].event.event_id(), late.event_id());
    }

    #[tokio::test]
    async fn test_duplicate_event_id_rejected() {
        let store = InMemoryOutboxStore::new();
        let e = event("org-1", "organization.created");
        store.append(&e).await.unwrap();

        let err = store.append(&e).await.unwrap_err();
        assert!(matches!(err, OutboxError::DuplicateKey(id) if id == e.event_id()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_processed_keeps_first_timestamp() {
        let store = InMemoryOutboxStore::new();
        let e = event("org-1", "organization.created");
        store.append(&e).await.unwrap();

        store.mark_processed(e.event_id()).await.unwrap();
        let first = store.get(e.event_id()).unwrap().unwrap().processed_at;
        store.mark_processed(e.event_id()).await.unwrap();
        let second = store.get(e.event_id()).unwrap().unwrap().processed_at;

        assert!(first.is_some());
        assert_eq!(first, second);
        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_processed_unknown_event() {
        let store = InMemoryOutboxStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.mark_processed(id).await,
            Err(OutboxError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_purge_never_removes_unprocessed() {
        let store = InMemoryOutboxStore::new();
        let old = Utc::now() - chrono::Duration::days(10);

        let processed = event("org-1", "organization.created");
        let mut processed_record = OutboxRecord::new(processed.clone(), old);
        processed_record.processed_at = Some(old);
        store.insert_record(processed_record).unwrap();

        let pending = event("org-2", "organization.created");
        store
            .insert_record(OutboxRecord::new(pending.clone(), old))
            .unwrap();

        let purged = store
            .purge_processed_older_than(Duration::from_secs(7 * 24 * 3600))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(store.get(processed.event_id()).unwrap().is_none());
        assert!(store.get(pending.event_id()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let store = InMemoryOutboxStore::new();
        assert_eq!(store.stats_snapshot().await.unwrap(), OutboxStats::default());

        let a = event("org-1", "organization.created");
        store.append(&a).await.unwrap();
        store.append(&event("org-2", "organization.created")).await.unwrap();
        store.mark_processed(a.event_id()).await.unwrap();

        let stats = store.stats_snapshot().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unprocessed, 1);
        assert_eq!(stats.processed, 1);
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_invisible() {
        let store = InMemoryOutboxStore::new();

        let mut tx = store.begin();
        tx.append(event("org-1", "organization.created")).unwrap();
        tx.append(event("org-1", "organization.moved")).unwrap();
        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
        tx.commit().unwrap();
        assert_eq!(store.fetch_unprocessed(10).await.unwrap().len(), 2);

        let mut rolled_back = store.begin();
        rolled_back
            .append(event("org-2", "organization.created"))
            .unwrap();
        drop(rolled_back);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_by_aggregate_and_type() {
        let store = InMemoryOutboxStore::new();
        store.append(&event("org-1", "organization.created")).await.unwrap();
        store.append(&event("org-2", "organization.created")).await.unwrap();
        store.append(&event("org-1", "organization.moved")).await.unwrap();

        let by_aggregate = store.fetch_by_aggregate("org-1").await.unwrap();
        assert_eq!(by_aggregate.len(), 2);
        assert!(by_aggregate.iter().all(|r| r.event.aggregate_id() == "org-1"));

        let by_type = store.fetch_by_type("organization.created", 1).await.unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].event.aggregate_id(), "org-1");
    }
}
